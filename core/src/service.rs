//! In-process entry points an outer request layer calls per flight.

use std::sync::Arc;

use crate::config::SurveyConfig;
use crate::localization::{self, LocalizationOutcome, LocalizationRequest};
use crate::prelude::{CancelToken, CoreResult};
use crate::processing::dose::{DoseEstimate, DoseRateCalculator};
use crate::processing::peak::{CalibrationUpdate, PeakCalibrationEngine};
use crate::survey::FlightRepository;
use crate::telemetry::metrics::MetricsRecorder;

pub struct FlightAnalyzer {
    repository: Arc<dyn FlightRepository>,
    config: SurveyConfig,
    metrics: MetricsRecorder,
}

impl FlightAnalyzer {
    pub fn new(repository: Arc<dyn FlightRepository>, config: SurveyConfig) -> Self {
        Self {
            repository,
            config,
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    /// Dose records processed and dropped since construction.
    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn dose_estimates(&self, flight_id: &str) -> CoreResult<Vec<DoseEstimate>> {
        let flight = self.repository.fetch_flight(flight_id)?;
        DoseRateCalculator::batch(&flight, &self.config.dose, &self.metrics)
    }

    /// Recalibrates the flight on `isotope` and stores the new energy scale.
    pub fn recalibrate(&self, flight_id: &str, isotope: &str) -> CoreResult<CalibrationUpdate> {
        let isotope = self.config.isotope(isotope)?;
        let flight = self.repository.fetch_flight(flight_id)?;
        let update = PeakCalibrationEngine::calibrate_flight(&flight, isotope, &self.config.peak)?;
        self.repository.store_calibration(flight_id, update.updated)?;
        Ok(update)
    }

    pub fn localize(
        &self,
        flight_id: &str,
        request: &LocalizationRequest,
        cancel: &CancelToken,
    ) -> CoreResult<LocalizationOutcome> {
        let flight = self.repository.fetch_flight(flight_id)?;
        localization::localize(&flight, request, &self.config, cancel)
    }
}
