use serde::{Deserialize, Serialize};

use crate::config::{Isotope, PeakConfig};
use crate::prelude::{CoreError, CoreResult};
use crate::processing::spectrum::SpectrumProcessor;
use crate::survey::{EnergyCalibration, Flight, Spectrum};
use crate::telemetry::log::LogManager;

/// 11-point quadratic Savitzky–Golay weights.
const SMOOTHING_KERNEL: [f64; 11] = [
    -36.0, 9.0, 44.0, 69.0, 84.0, 89.0, 84.0, 69.0, 44.0, 9.0, -36.0,
];
const SMOOTHING_NORM: f64 = 429.0;
const SMOOTHING_HALF: usize = SMOOTHING_KERNEL.len() / 2;

const FWHM_TO_SIGMA: f64 = 2.35;
const HALF_WIDTH_SIGMAS: f64 = 3.0;

/// Photopeak region `[left, right)` in channels; may extend past the histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakBounds {
    pub left: isize,
    pub right: isize,
}

impl PeakBounds {
    pub fn width(&self) -> isize {
        self.right - self.left
    }
}

/// Outcome of a per-flight recalibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationUpdate {
    pub previous: EnergyCalibration,
    pub updated: EnergyCalibration,
    pub peak_channel: usize,
    pub measured_kev: f64,
    pub reference_kev: f64,
    pub peak_area: f64,
}

pub struct PeakCalibrationEngine;

impl PeakCalibrationEngine {
    /// Smooths channels `[5, n - 6)`; the edges are copied through.
    pub fn smooth(spectrum: &Spectrum) -> Vec<f64> {
        let counts: Vec<f64> = spectrum.counts.iter().map(|&c| c as f64).collect();
        let n = counts.len();
        let mut smoothed = counts.clone();
        if n <= 2 * SMOOTHING_HALF + 1 {
            return smoothed;
        }
        for i in SMOOTHING_HALF..n - SMOOTHING_HALF - 1 {
            let window = &counts[i - SMOOTHING_HALF..=i + SMOOTHING_HALF];
            let acc: f64 = window
                .iter()
                .zip(SMOOTHING_KERNEL.iter())
                .map(|(c, w)| c * w)
                .sum();
            smoothed[i] = acc / SMOOTHING_NORM;
        }
        smoothed
    }

    /// Global maximum of the smoothed spectrum, or `approx` when disabled.
    pub fn refine_peak_center(spectrum: &Spectrum, approx: usize, enabled: bool) -> usize {
        Self::refine_within(spectrum, approx, enabled, 0, spectrum.len())
    }

    /// Maximum of the smoothed spectrum restricted to channels `[lo, hi)`.
    fn refine_within(
        spectrum: &Spectrum,
        approx: usize,
        enabled: bool,
        lo: usize,
        hi: usize,
    ) -> usize {
        if !enabled {
            return approx;
        }
        let smoothed = Self::smooth(spectrum);
        let hi = hi.min(smoothed.len());
        if lo >= hi {
            return approx;
        }
        let mut best = lo;
        for i in lo + 1..hi {
            if smoothed[i] > smoothed[best] {
                best = i;
            }
        }
        best
    }

    /// Peak region sized from the detector resolution, which scales as
    /// `1/sqrt(E)` from the reference line.
    pub fn peak_bounds(
        center: usize,
        calibration: EnergyCalibration,
        config: &PeakConfig,
    ) -> CoreResult<PeakBounds> {
        calibration.validate()?;
        let energy = calibration.energy(center as f64);
        if energy <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "channel {} maps to non-positive energy {:.1} keV",
                center, energy
            )));
        }
        let resolution = config.resolution_at_reference * (config.reference_kev / energy).sqrt();
        let fwhm = resolution * energy;
        let half = (HALF_WIDTH_SIGMAS * fwhm / FWHM_TO_SIGMA / calibration.p1).round() as isize;
        let half = half.saturating_add(1);
        let center = center as isize;
        Ok(PeakBounds {
            left: center.saturating_sub(half),
            right: center.saturating_add(half),
        })
    }

    /// Counts in the two side-bands, each half the peak width, flanking the peak.
    pub fn background_level(spectrum: &Spectrum, bounds: PeakBounds) -> f64 {
        let side = bounds.width() / 2;
        SpectrumProcessor::value_in_channels(spectrum, bounds.left - side, bounds.left - 1, false)
            + SpectrumProcessor::value_in_channels(
                spectrum,
                bounds.right,
                bounds.right + side - 1,
                false,
            )
    }

    /// Net counts of the photopeak near `peak_channel`, never negative.
    pub fn peak_area(
        spectrum: &Spectrum,
        peak_channel: usize,
        calibration: EnergyCalibration,
        config: &PeakConfig,
    ) -> CoreResult<f64> {
        let (_, bounds) = Self::locate(spectrum, peak_channel, calibration, config)?;
        Ok(Self::net_counts(spectrum, bounds))
    }

    /// Single-point damped correction of the energy scale.
    ///
    /// The offset moves by `damping` times the observed error; the slope is
    /// then chosen so `reference_kev` lands on `refined_channel`.
    pub fn calibration_shift(
        calibration: EnergyCalibration,
        refined_channel: usize,
        measured_kev: f64,
        reference_kev: f64,
        damping: f64,
    ) -> CoreResult<EnergyCalibration> {
        if refined_channel == 0 {
            return Err(CoreError::InvalidInput(
                "cannot rescale slope from channel 0".into(),
            ));
        }
        let p0 = calibration.p0 - (measured_kev - reference_kev) * damping;
        let p1 = (reference_kev - p0) / refined_channel as f64;
        let updated = EnergyCalibration::new(p0, p1);
        updated.validate()?;
        Ok(updated)
    }

    /// Recalibrates a flight from the isotope line in its summed spectrum.
    pub fn calibrate_flight(
        flight: &Flight,
        isotope: &Isotope,
        config: &PeakConfig,
    ) -> CoreResult<CalibrationUpdate> {
        let calibration = flight.calibration()?;
        let spectra: Vec<&Spectrum> = flight
            .measurements
            .iter()
            .filter_map(|m| m.spectrum.as_ref())
            .collect();
        if spectra.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "flight {} carries no spectra",
                flight.id
            )));
        }
        let aggregate = SpectrumProcessor::sum_spectra(&spectra)?;

        let approx = calibration.channel_of(isotope.energy_kev).round();
        if approx < 1.0 || approx >= aggregate.len() as f64 {
            return Err(CoreError::InvalidInput(format!(
                "{} line at {:.1} keV falls outside the spectrum",
                isotope.name, isotope.energy_kev
            )));
        }
        let (center, bounds) = Self::locate(&aggregate, approx as usize, calibration, config)?;
        let area = Self::net_counts(&aggregate, bounds);
        let centroid = Self::centroid(&aggregate, bounds).unwrap_or(center as f64);
        let measured_kev = calibration.energy(centroid);

        let updated = Self::calibration_shift(
            calibration,
            center,
            measured_kev,
            isotope.energy_kev,
            config.damping,
        )?;

        LogManager::new().record(&format!(
            "flight {} {} peak at channel {} ({:.1} keV, area {:.0}): \
             p0 {:.3} -> {:.3}, p1 {:.4} -> {:.4}",
            flight.id,
            isotope.name,
            center,
            measured_kev,
            area,
            calibration.p0,
            updated.p0,
            calibration.p1,
            updated.p1
        ));

        Ok(CalibrationUpdate {
            previous: calibration,
            updated,
            peak_channel: center,
            measured_kev,
            reference_kev: isotope.energy_kev,
            peak_area: area,
        })
    }

    /// Refined centre and final bounds. The maximum search is confined to
    /// the region the approximate channel implies, so continuum below the
    /// line cannot capture it.
    fn locate(
        spectrum: &Spectrum,
        approx: usize,
        calibration: EnergyCalibration,
        config: &PeakConfig,
    ) -> CoreResult<(usize, PeakBounds)> {
        let search = Self::peak_bounds(approx, calibration, config)?;
        let center = Self::refine_within(
            spectrum,
            approx,
            config.refine,
            search.left.max(0) as usize,
            search.right.max(0) as usize,
        );
        let bounds = Self::peak_bounds(center, calibration, config)?;
        Ok((center, bounds))
    }

    fn net_counts(spectrum: &Spectrum, bounds: PeakBounds) -> f64 {
        let gross =
            SpectrumProcessor::value_in_channels(spectrum, bounds.left, bounds.right - 1, false);
        (gross - Self::background_level(spectrum, bounds)).max(0.0)
    }

    /// Background-subtracted centroid channel, if the peak has net counts.
    fn centroid(spectrum: &Spectrum, bounds: PeakBounds) -> Option<f64> {
        let width = bounds.width().max(1) as f64;
        let per_channel = Self::background_level(spectrum, bounds) / width;
        let lo = bounds.left.max(0) as usize;
        let hi = (bounds.right.max(0) as usize).min(spectrum.len());
        let (mut weight, mut moment) = (0.0, 0.0);
        for i in lo..hi {
            let net = (spectrum.counts[i] as f64 - per_channel).max(0.0);
            weight += net;
            moment += net * i as f64;
        }
        (weight > 0.0).then(|| moment / weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::{EcefPosition, FlightMetadata, Measurement};
    use approx::assert_abs_diff_eq;

    fn gaussian_spectrum(
        len: usize,
        center: f64,
        sigma: f64,
        amplitude: f64,
        floor: f64,
    ) -> Spectrum {
        let counts = (0..len)
            .map(|i| {
                let z = (i as f64 - center) / sigma;
                (floor + amplitude * (-0.5 * z * z).exp()).round() as u32
            })
            .collect();
        Spectrum::new(counts, 1.0)
    }

    fn peak_config() -> PeakConfig {
        PeakConfig {
            reference_kev: 661.7,
            resolution_at_reference: 0.075,
            refine: true,
            damping: 1.0,
        }
    }

    #[test]
    fn smoothing_preserves_linear_ramp_and_edges() {
        let spectrum = Spectrum::new((0..20).map(|i| 10 + 3 * i).collect(), 1.0);
        let smoothed = PeakCalibrationEngine::smooth(&spectrum);
        for (i, value) in smoothed.iter().enumerate() {
            assert_abs_diff_eq!(*value, spectrum.counts[i] as f64, epsilon = 1e-9);
        }

        let spike = Spectrum::new(
            (0..20).map(|i| if i == 10 { 429 } else { 0 }).collect(),
            1.0,
        );
        let smoothed = PeakCalibrationEngine::smooth(&spike);
        assert_abs_diff_eq!(smoothed[10], 89.0, epsilon = 1e-9);
        assert_abs_diff_eq!(smoothed[5], -36.0, epsilon = 1e-9);
        // channel n - 6 is outside the smoothed range
        assert_eq!(smoothed[14], 0.0);
    }

    #[test]
    fn refine_finds_smoothed_maximum_only_when_enabled() {
        let spectrum = gaussian_spectrum(128, 70.0, 4.0, 500.0, 5.0);
        assert_eq!(PeakCalibrationEngine::refine_peak_center(&spectrum, 60, true), 70);
        assert_eq!(PeakCalibrationEngine::refine_peak_center(&spectrum, 60, false), 60);
    }

    #[test]
    fn bounds_follow_resolution_scaling() {
        let calibration = EnergyCalibration::new(0.0, 3.0);
        let bounds = PeakCalibrationEngine::peak_bounds(221, calibration, &peak_config()).unwrap();
        // E = 663 keV, FWHM ≈ 49.7 keV → half width round(21.1) + 1 channels
        assert_eq!(bounds, PeakBounds { left: 199, right: 243 });
        assert_eq!(bounds.width() % 2, 0);

        let high = PeakCalibrationEngine::peak_bounds(443, calibration, &peak_config()).unwrap();
        assert!(high.width() > bounds.width());
        assert!((high.width() as f64) < 2.0 * bounds.width() as f64);
    }

    #[test]
    fn bounds_reject_vanishing_slope() {
        let calibration = EnergyCalibration::new(0.0, 1e-300);
        assert!(matches!(
            PeakCalibrationEngine::peak_bounds(100, calibration, &peak_config()),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn gaussian_peak_area_matches_integral() {
        let sigma = 7.0;
        let amplitude = 1000.0;
        let spectrum = gaussian_spectrum(512, 221.0, sigma, amplitude, 20.0);
        let area = PeakCalibrationEngine::peak_area(
            &spectrum,
            215,
            EnergyCalibration::new(0.0, 3.0),
            &peak_config(),
        )
        .unwrap();
        let analytic = amplitude * sigma * (2.0 * std::f64::consts::PI).sqrt();
        assert!(
            (area - analytic).abs() / analytic < 0.015,
            "area {} vs {}",
            area,
            analytic
        );
    }

    #[test]
    fn flat_spectrum_has_no_peak() {
        let spectrum = Spectrum::new(vec![37; 512], 1.0);
        let area = PeakCalibrationEngine::peak_area(
            &spectrum,
            221,
            EnergyCalibration::new(0.0, 3.0),
            &peak_config(),
        )
        .unwrap();
        assert_eq!(area, 0.0);
    }

    #[test]
    fn shift_keeps_reference_on_refined_channel() {
        let calibration = EnergyCalibration::new(5.0, 3.0);
        let updated =
            PeakCalibrationEngine::calibration_shift(calibration, 220, 680.0, 661.7, 0.5).unwrap();
        assert_abs_diff_eq!(updated.p0, 5.0 - 18.3 * 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(updated.energy(220.0), 661.7, epsilon = 1e-9);
        assert!(
            PeakCalibrationEngine::calibration_shift(calibration, 0, 680.0, 661.7, 0.5).is_err()
        );
    }

    #[test]
    fn flight_calibration_pulls_drifted_scale_back() {
        // The line sits on channel 221; the stored slope reads about 3% high.
        let line_channel = 221.0;
        let mut flight = Flight::new("cal", FlightMetadata::default());
        flight.calibration = Some(EnergyCalibration::new(0.0, 3.084));
        flight.measurements = (0..20)
            .map(|i| {
                Measurement::new(
                    i,
                    i as f64,
                    EcefPosition::new(280_000_000, 210_000_000, 520_000_000),
                    50.0,
                )
                .with_spectrum(gaussian_spectrum(512, line_channel, 7.0, 60.0, 4.0))
            })
            .collect();

        let isotope = Isotope::new("Cs-137", 661.7, 0.851);
        let update =
            PeakCalibrationEngine::calibrate_flight(&flight, &isotope, &peak_config()).unwrap();
        assert_eq!(update.peak_channel, 221);
        assert!(update.measured_kev > 661.7);
        assert_abs_diff_eq!(update.updated.energy(221.0), 661.7, epsilon = 1e-9);
        assert!(update.peak_area > 0.0);
    }

    #[test]
    fn flight_without_spectra_is_invalid() {
        let mut flight = Flight::new("empty", FlightMetadata::default());
        flight.calibration = Some(EnergyCalibration::new(0.0, 3.0));
        let isotope = Isotope::new("Cs-137", 661.7, 0.851);
        assert!(matches!(
            PeakCalibrationEngine::calibrate_flight(&flight, &isotope, &peak_config()),
            Err(CoreError::InvalidInput(_))
        ));
    }
}
