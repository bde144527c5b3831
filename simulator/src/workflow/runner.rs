use crate::generator::flight::build_flight;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use gammacore::localization::LocalizationOutcome;
use gammacore::prelude::CancelToken;
use gammacore::processing::{CalibrationUpdate, DoseEstimate};
use gammacore::survey::InMemoryRepository;
use gammacore::FlightAnalyzer;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct DoseSummary {
    pub processed: usize,
    pub skipped: usize,
    pub mean_usv_h: f64,
    pub max_usv_h: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub flight_id: String,
    pub measurements: usize,
    pub dose_summary: DoseSummary,
    pub doses: Vec<DoseEstimate>,
    pub calibration: CalibrationUpdate,
    pub localization: LocalizationOutcome,
    pub elapsed_ms: u128,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    /// Generates a flight, then runs dose, recalibration and localization
    /// against it in that order.
    pub fn execute(&self, cancel: &CancelToken) -> anyhow::Result<WorkflowResult> {
        let started = Instant::now();
        let flight = build_flight(&self.config.generator, &self.config.survey)
            .context("generating synthetic flight")?;
        let flight_id = flight.id.clone();
        let measurements = flight.len();

        let repository = Arc::new(InMemoryRepository::new());
        repository
            .insert(flight)
            .context("storing synthetic flight")?;
        let analyzer = FlightAnalyzer::new(repository, self.config.survey.clone());

        let doses = analyzer
            .dose_estimates(&flight_id)
            .context("computing dose estimates")?;
        let (processed, skipped) = analyzer.metrics().snapshot();
        let dose_summary = DoseSummary {
            processed,
            skipped,
            mean_usv_h: if doses.is_empty() {
                0.0
            } else {
                doses.iter().map(|d| d.dose_at_1m).sum::<f64>() / doses.len() as f64
            },
            max_usv_h: doses.iter().map(|d| d.dose_at_1m).fold(0.0, f64::max),
        };

        let calibration = analyzer
            .recalibrate(&flight_id, &self.config.calibration_isotope)
            .context("recalibrating energy scale")?;

        let localization = analyzer
            .localize(&flight_id, &self.config.request, cancel)
            .context("localizing source")?;

        Ok(WorkflowResult {
            flight_id,
            measurements,
            dose_summary,
            doses,
            calibration,
            localization,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }
}
