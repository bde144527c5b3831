//! Point-source localization from the intensity variation along a flight.
//!
//! Each call is self-contained: the intensity series, the search lattice and
//! every accumulator are built inside [`localize`] and dropped when it
//! returns, so concurrent calls for different flights share nothing mutable.

pub mod grid;
pub mod interpolation;
pub mod model;
pub mod samples;
pub mod triangulation;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{LocalizationConfig, StrategyKind, SurveyConfig};
use crate::prelude::{CancelToken, CoreResult};
use crate::survey::Flight;
use crate::telemetry::log::LogManager;

pub use grid::{GridCell, SearchGrid};
pub use interpolation::InterpolationLocalizer;
pub use model::AttenuationModel;
pub use samples::{GeoBounds, GeoCoordinate, LocalPoint, Projection, SurveySample};
pub use triangulation::GridSearchLocalizer;

/// Fewest fixes that leave two interior samples to compare.
const MIN_TRACK_LEN: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalizationRequest {
    /// Search rectangle; ignored when its corners coincide on either axis.
    pub bounds: Option<GeoBounds>,
    /// Overrides the configured strategy.
    pub strategy: Option<StrategyKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalizationResult {
    pub coordinate: GeoCoordinate,
    /// Estimated source activity, Bq.
    pub activity: f64,
    pub deviation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    Detected,
    NoSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalizationReport {
    pub strategy: StrategyKind,
    pub result: LocalizationResult,
    pub signal: SignalStatus,
    pub samples_used: usize,
    pub bounds: GeoBounds,
    /// Best node of the coarse grid-search pass.
    pub coarse: Option<GeoCoordinate>,
    /// Best node of the refinement pass.
    pub refined: Option<GeoCoordinate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocalizationOutcome {
    Located(LocalizationReport),
    InsufficientData { available: usize, required: usize },
}

/// Everything a strategy reads; immutable for the duration of a search.
#[derive(Debug, Clone)]
pub struct LocalizationInput {
    pub samples: Vec<SurveySample>,
    pub bounds: GeoBounds,
    pub projection: Projection,
    pub model: AttenuationModel,
    pub config: LocalizationConfig,
}

impl LocalizationInput {
    pub fn new(
        samples: Vec<SurveySample>,
        bounds: GeoBounds,
        model: AttenuationModel,
        config: LocalizationConfig,
    ) -> Self {
        Self {
            samples,
            projection: Projection::for_bounds(&bounds),
            bounds,
            model,
            config,
        }
    }

    /// Sample positions in the metric frame, `z` being the flight height.
    pub fn local_points(&self) -> Vec<LocalPoint> {
        self.samples
            .iter()
            .map(|s| self.projection.to_local(s.coordinate, s.height))
            .collect()
    }

    pub fn intensities(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.intensity).collect()
    }
}

pub trait LocalizationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn localize(
        &self,
        input: &LocalizationInput,
        cancel: &CancelToken,
    ) -> CoreResult<LocalizationReport>;
}

pub fn strategy_for(kind: StrategyKind) -> Box<dyn LocalizationStrategy> {
    match kind {
        StrategyKind::GridSearch => Box::new(GridSearchLocalizer),
        StrategyKind::Interpolation => Box::new(InterpolationLocalizer),
    }
}

/// Search bounds: the requested rectangle when it spans an area, otherwise
/// the padded bounding box of the samples.
pub fn resolve_bounds(requested: Option<GeoBounds>, samples: &[SurveySample]) -> Option<GeoBounds> {
    if let Some(bounds) = requested.filter(|b| !b.is_degenerate()) {
        return Some(bounds);
    }
    if requested.is_some() {
        debug!("requested bounds are degenerate, using the flight extent");
    }
    GeoBounds::enclosing(samples.iter().map(|s| s.coordinate)).map(GeoBounds::padded)
}

/// Estimates position and activity of a point source under `flight`.
pub fn localize(
    flight: &Flight,
    request: &LocalizationRequest,
    config: &SurveyConfig,
    cancel: &CancelToken,
) -> CoreResult<LocalizationOutcome> {
    let settings = &config.localization;
    let isotope = config.isotope(settings.intensity.isotope())?;
    let samples = samples::intensity_series(flight, &settings.intensity, isotope, &config.peak)?;

    let required = settings.min_samples.max(MIN_TRACK_LEN);
    let bounds = match resolve_bounds(request.bounds, &samples) {
        Some(bounds) if samples.len() >= required => bounds,
        _ => {
            LogManager::new().record(&format!(
                "flight {}: {} usable samples, localization needs {}",
                flight.id,
                samples.len(),
                required
            ));
            return Ok(LocalizationOutcome::InsufficientData {
                available: samples.len(),
                required,
            });
        }
    };

    let model = AttenuationModel::new(isotope, &config.detector)?;
    let strategy = strategy_for(request.strategy.unwrap_or(settings.strategy));
    let input = LocalizationInput::new(samples, bounds, model, settings.clone());
    let report = strategy.localize(&input, cancel)?;

    LogManager::new().record(&format!(
        "flight {} {:?}: source at ({:.6}, {:.6}), activity {:.3e} Bq ± {:.3e}, {:?}",
        flight.id,
        report.strategy,
        report.result.coordinate.lat,
        report.result.coordinate.lon,
        report.result.activity,
        report.result.deviation,
        report.signal
    ));
    Ok(LocalizationOutcome::Located(report))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{DetectorConfig, Isotope};

    pub const SOURCE_ACTIVITY: f64 = 3.7e10;

    pub fn cs137() -> Isotope {
        Isotope::new("Cs-137", 661.7, 0.851)
    }

    pub fn model() -> AttenuationModel {
        AttenuationModel::new(&cs137(), &DetectorConfig::default()).unwrap()
    }

    pub fn bounds() -> GeoBounds {
        GeoBounds::from_corners(
            GeoCoordinate::new(54.995, 36.99),
            GeoCoordinate::new(55.005, 37.01),
        )
    }

    /// East-west pass along lat 55.0 at 60 m, with exact point-model rates
    /// from a source on the ground at `source`.
    pub fn straight_pass(source: GeoCoordinate, activity: f64) -> Vec<SurveySample> {
        let projection = Projection::for_bounds(&bounds());
        let model = model();
        let origin = projection.to_local(source, 0.0);
        (0..81)
            .map(|i| {
                let coordinate = GeoCoordinate::new(55.0, 36.99 + i as f64 * 0.00025);
                let at = projection.to_local(coordinate, 60.0);
                SurveySample {
                    measurement_id: i as u64,
                    coordinate,
                    height: 60.0,
                    intensity: model.intensity_at(activity, at.distance(origin)),
                }
            })
            .collect()
    }

    pub fn input(samples: Vec<SurveySample>) -> LocalizationInput {
        LocalizationInput::new(samples, bounds(), model(), LocalizationConfig::default())
    }
}
