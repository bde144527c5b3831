use crate::config::{DetectorConfig, Isotope};
use crate::localization::samples::LocalPoint;
use crate::math::quadrature::adaptive_simpson;
use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult};

/// Distances below this (m) are clamped; the detector is not a point.
const MIN_RANGE: f64 = 1.0;

/// Point source seen through air: `I = A·exp(-μr) / (C·r²)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttenuationModel {
    /// Linear attenuation coefficient of air, 1/m.
    pub mu: f64,
    /// `4π / (efficiency · active area · yield)`.
    pub c: f64,
}

impl AttenuationModel {
    pub fn new(isotope: &Isotope, detector: &DetectorConfig) -> CoreResult<Self> {
        if isotope.yield_fraction <= 0.0 || isotope.energy_kev <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "isotope {} needs a positive energy and yield",
                isotope.name
            )));
        }
        let mu =
            StatsHelper::polyval(&detector.attenuation_polynomial, isotope.energy_kev / 1000.0);
        if !mu.is_finite() || mu < 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "attenuation fit gives μ = {} at {} keV",
                mu, isotope.energy_kev
            )));
        }
        let c = 4.0 * std::f64::consts::PI
            / (detector.efficiency * detector.active_area * isotope.yield_fraction);
        Ok(Self { mu, c })
    }

    pub fn kernel(&self, range: f64) -> f64 {
        let r = range.max(MIN_RANGE);
        (-self.mu * r).exp() / (r * r)
    }

    /// Count rate produced by `activity` (Bq) at `range` metres.
    pub fn intensity_at(&self, activity: f64, range: f64) -> f64 {
        activity * self.kernel(range) / self.c
    }

    /// Activity implied by one count rate observed at a known range.
    pub fn point_activity(&self, intensity: f64, range: f64) -> f64 {
        self.c * intensity / self.kernel(range)
    }

    /// Path average of the kernel over the two half-segments around `at`:
    /// from the midpoint with `prev`, through `at`, to the midpoint with `next`.
    pub fn geometry_factor(
        &self,
        prev: LocalPoint,
        at: LocalPoint,
        next: LocalPoint,
        source: LocalPoint,
        tolerance: f64,
    ) -> f64 {
        let legs = [(prev.midpoint(at), at), (at, at.midpoint(next))];
        let mut weighted = 0.0;
        let mut length = 0.0;
        for (a, b) in legs {
            let leg = a.distance(b);
            if leg == 0.0 {
                continue;
            }
            let mean = adaptive_simpson(
                |t| self.kernel(a.lerp(b, t).distance(source)),
                0.0,
                1.0,
                tolerance,
            );
            weighted += mean * leg;
            length += leg;
        }
        if length == 0.0 {
            self.kernel(at.distance(source))
        } else {
            weighted / length
        }
    }
}
