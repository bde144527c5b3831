use log::warn;
use serde::{Deserialize, Serialize};

use crate::config::DoseConfig;
use crate::math::stats::StatsHelper;
use crate::prelude::{CoreError, CoreResult};
use crate::processing::spectrum::SpectrumProcessor;
use crate::survey::{EnergyCalibration, Flight, Measurement, Spectrum};
use crate::telemetry::log::LogManager;
use crate::telemetry::metrics::MetricsRecorder;

/// Sv/s to µSv/h.
const SV_PER_S_TO_USV_PER_H: f64 = 1e6 * 3600.0;

/// Air-scatter model: `Kh = HEIGHT_INTERCEPT - HEIGHT_SLOPE * ln|h|`.
const HEIGHT_INTERCEPT: f64 = 0.988;
const HEIGHT_SLOPE: f64 = 0.1768;
/// Doses at or below this level (µSv/h) are not height corrected.
const SCATTER_FLOOR: f64 = 0.15;

/// Which sensitivity coefficient converts a count rate into dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterSelector {
    Sensitive,
    Coarse,
    SpectralWindow,
}

/// Sensor that produced a fused dose value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseSource {
    CoarseCounter,
    SensitiveCounter,
    Spectrum,
}

/// Ambient dose rate of one measurement, µSv/h.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoseEstimate {
    pub measurement_id: u64,
    pub source: DoseSource,
    pub dose_at_height: f64,
    pub dose_at_1m: f64,
}

pub struct DoseRateCalculator;

impl DoseRateCalculator {
    /// Sv per count at `energy_kev`, from the piecewise quartic response fit.
    pub fn conversion_factor(energy_kev: f64, config: &DoseConfig) -> f64 {
        let coefficients = if energy_kev <= config.break_kev {
            &config.low_polynomial
        } else {
            &config.high_polynomial
        };
        StatsHelper::polyval(coefficients, energy_kev)
    }

    pub fn conversion_factors(
        calibration: EnergyCalibration,
        channels: usize,
        config: &DoseConfig,
    ) -> Vec<f64> {
        (0..channels)
            .map(|i| Self::conversion_factor(calibration.energy(i as f64), config))
            .collect()
    }

    /// Spectral dose in µSv/h from count rates and per-channel factors.
    pub fn total_dose(spectrum: &Spectrum, factors: &[f64]) -> CoreResult<f64> {
        if factors.len() < spectrum.len() {
            return Err(CoreError::InvalidInput(format!(
                "{} conversion factors for {} channels",
                factors.len(),
                spectrum.len()
            )));
        }
        let dose: f64 = SpectrumProcessor::normalize(spectrum)
            .iter()
            .zip(factors)
            .map(|(rate, factor)| rate * factor)
            .sum();
        Ok(dose * SV_PER_S_TO_USV_PER_H)
    }

    /// Air-scatter coefficient, defined only above one metre.
    pub fn height_coefficient(height: f64) -> Option<f64> {
        if height > 1.0 {
            Some(HEIGHT_INTERCEPT - HEIGHT_SLOPE * height.abs().ln())
        } else {
            None
        }
    }

    /// Projects a dose measured at `height` down to 1 m.
    pub fn height_correct(dose: f64, height: f64) -> f64 {
        match Self::height_coefficient(height) {
            Some(kh) if kh != 0.0 && dose > SCATTER_FLOOR => {
                (dose - SCATTER_FLOOR) / kh + SCATTER_FLOOR
            }
            _ => dose,
        }
    }

    pub fn counter_dose(
        rate: f64,
        height: f64,
        height_correct: bool,
        selector: CounterSelector,
        config: &DoseConfig,
    ) -> f64 {
        let coefficient = match selector {
            CounterSelector::Sensitive => config.gm1_coeff,
            CounterSelector::Coarse => config.gm2_coeff,
            CounterSelector::SpectralWindow => config.window_coeff,
        };
        let dose = rate * coefficient;
        if height_correct {
            Self::height_correct(dose, height)
        } else {
            dose
        }
    }

    /// Dose at 1 m from the count rate inside the configured energy window.
    pub fn window_dose(spectrum: &Spectrum, height: f64, config: &DoseConfig) -> f64 {
        let rate = SpectrumProcessor::window_intensity(spectrum, config.window);
        Self::counter_dose(rate, height, true, CounterSelector::SpectralWindow, config)
    }

    /// Picks the coarse counter, then the sensitive counter, then the
    /// spectrum, so a saturated sensitive tube never drives the result.
    pub fn fused_dose(
        measurement: &Measurement,
        factors: &[f64],
        config: &DoseConfig,
    ) -> CoreResult<DoseEstimate> {
        let (source, dose) = if measurement.gm2 >= config.high_threshold {
            (
                DoseSource::CoarseCounter,
                Self::counter_dose(
                    measurement.gm2,
                    measurement.height,
                    false,
                    CounterSelector::Coarse,
                    config,
                ),
            )
        } else if measurement.gm1 >= config.low_threshold {
            (
                DoseSource::SensitiveCounter,
                Self::counter_dose(
                    measurement.gm1,
                    measurement.height,
                    false,
                    CounterSelector::Sensitive,
                    config,
                ),
            )
        } else {
            let spectrum = measurement.spectrum.as_ref().ok_or_else(|| {
                CoreError::InvalidInput(format!(
                    "measurement {} has no spectrum",
                    measurement.id
                ))
            })?;
            (DoseSource::Spectrum, Self::total_dose(spectrum, factors)?)
        };

        Ok(DoseEstimate {
            measurement_id: measurement.id,
            source,
            dose_at_height: dose,
            dose_at_1m: Self::height_correct(dose, measurement.height),
        })
    }

    /// Dose for every measurement of a flight.
    ///
    /// A missing calibration fails the whole call; a record that cannot be
    /// evaluated is logged, counted and dropped.
    pub fn batch(
        flight: &Flight,
        config: &DoseConfig,
        metrics: &MetricsRecorder,
    ) -> CoreResult<Vec<DoseEstimate>> {
        let calibration = flight.calibration()?;
        let channels = flight
            .measurements
            .iter()
            .filter_map(|m| m.spectrum.as_ref().map(Spectrum::len))
            .max()
            .unwrap_or(0);
        let factors = Self::conversion_factors(calibration, channels, config);

        let mut estimates = Vec::with_capacity(flight.len());
        let mut skipped = 0usize;
        for measurement in &flight.measurements {
            match Self::fused_dose(measurement, &factors, config) {
                Ok(estimate) => {
                    metrics.record_processed();
                    estimates.push(estimate);
                }
                Err(err) => {
                    metrics.record_skipped();
                    skipped += 1;
                    warn!(
                        "flight {}: skipping measurement {}: {}",
                        flight.id, measurement.id, err
                    );
                }
            }
        }

        LogManager::new().record(&format!(
            "flight {} dose batch: {} processed, {} skipped",
            flight.id,
            estimates.len(),
            skipped
        ));
        Ok(estimates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnergyWindow;
    use crate::survey::{EcefPosition, FlightMetadata};
    use approx::assert_abs_diff_eq;

    fn measurement(id: u64, height: f64, gm1: f64, gm2: f64) -> Measurement {
        Measurement::new(id, 0.0, EcefPosition::new(280_000_000, 210_000_000, 520_000_000), height)
            .with_counters(gm1, gm2)
    }

    #[test]
    fn height_correction_matches_scatter_model() {
        let kh = DoseRateCalculator::height_coefficient(10.0).unwrap();
        assert_abs_diff_eq!(kh, 0.5809, epsilon = 1e-4);
        assert_abs_diff_eq!(
            DoseRateCalculator::height_correct(1.0, 10.0),
            (1.0 - 0.15) / kh + 0.15,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(DoseRateCalculator::height_correct(1.0, 10.0), 1.613, epsilon = 1e-3);
    }

    #[test]
    fn low_heights_and_low_doses_are_untouched() {
        for &dose in &[0.0, 0.1, 1.0, 250.0] {
            assert_eq!(DoseRateCalculator::height_correct(dose, 1.0), dose);
            assert_eq!(DoseRateCalculator::height_correct(dose, 0.3), dose);
            assert_eq!(DoseRateCalculator::height_correct(dose, -40.0), dose);
        }
        assert_eq!(DoseRateCalculator::height_correct(0.15, 50.0), 0.15);
    }

    #[test]
    fn conversion_factor_switches_polynomial_at_break() {
        let config = DoseConfig {
            low_polynomial: [1.0, 0.0, 0.0, 0.0, 0.0],
            high_polynomial: [0.0, 1.0, 0.0, 0.0, 0.0],
            ..DoseConfig::default()
        };
        assert_eq!(DoseRateCalculator::conversion_factor(550.0, &config), 1.0);
        assert_eq!(DoseRateCalculator::conversion_factor(551.0, &config), 551.0);

        let factors = DoseRateCalculator::conversion_factors(
            EnergyCalibration::new(500.0, 25.0),
            4,
            &config,
        );
        assert_eq!(factors, vec![1.0, 1.0, 1.0, 575.0]);
    }

    #[test]
    fn default_factors_are_positive_over_detector_range() {
        let config = DoseConfig::default();
        for energy in (20..3000).step_by(10) {
            assert!(DoseRateCalculator::conversion_factor(energy as f64, &config) > 0.0);
        }
    }

    #[test]
    fn total_dose_scales_to_microsievert_per_hour() {
        let spectrum = Spectrum::new(vec![2, 4], 2.0);
        let dose = DoseRateCalculator::total_dose(&spectrum, &[1e-12, 2e-12]).unwrap();
        assert_abs_diff_eq!(dose, (1.0 * 1e-12 + 2.0 * 2e-12) * 3.6e9, epsilon = 1e-12);
        assert!(DoseRateCalculator::total_dose(&spectrum, &[1e-12]).is_err());
    }

    #[test]
    fn counter_selector_picks_coefficient() {
        let config = DoseConfig::default();
        let sensitive =
            DoseRateCalculator::counter_dose(100.0, 0.0, true, CounterSelector::Sensitive, &config);
        let coarse =
            DoseRateCalculator::counter_dose(10.0, 0.0, true, CounterSelector::Coarse, &config);
        let window = DoseRateCalculator::counter_dose(
            1000.0,
            0.0,
            false,
            CounterSelector::SpectralWindow,
            &config,
        );
        assert_abs_diff_eq!(sensitive, 100.0 * config.gm1_coeff, epsilon = 1e-12);
        assert_abs_diff_eq!(coarse, 10.0 * config.gm2_coeff, epsilon = 1e-12);
        assert_abs_diff_eq!(window, 1000.0 * config.window_coeff, epsilon = 1e-12);

        let corrected =
            DoseRateCalculator::counter_dose(10.0, 10.0, true, CounterSelector::Coarse, &config);
        assert_abs_diff_eq!(
            corrected,
            DoseRateCalculator::height_correct(10.0 * config.gm2_coeff, 10.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn window_dose_uses_configured_channels() {
        let config = DoseConfig {
            window: EnergyWindow { start: 2, end: 5 },
            ..DoseConfig::default()
        };
        let mut counts = vec![1000u32; 10];
        counts[2..=5].copy_from_slice(&[500, 500, 500, 500]);
        let spectrum = Spectrum::new(counts, 2.0);
        let rate = 2000.0 / 2.0;

        assert_abs_diff_eq!(
            DoseRateCalculator::window_dose(&spectrum, 0.5, &config),
            rate * config.window_coeff,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            DoseRateCalculator::window_dose(&spectrum, 80.0, &config),
            DoseRateCalculator::height_correct(rate * config.window_coeff, 80.0),
            epsilon = 1e-12
        );
        assert!(
            DoseRateCalculator::window_dose(&spectrum, 80.0, &config)
                > rate * config.window_coeff
        );
    }

    #[test]
    fn fusion_prefers_coarse_then_sensitive_then_spectrum() {
        let config = DoseConfig::default();
        let factors = vec![1e-13; 4];

        let coarse = measurement(1, 10.0, 500.0, config.high_threshold);
        let estimate = DoseRateCalculator::fused_dose(&coarse, &factors, &config).unwrap();
        assert_eq!(estimate.source, DoseSource::CoarseCounter);
        assert_abs_diff_eq!(estimate.dose_at_height, config.high_threshold * config.gm2_coeff);

        let sensitive = measurement(2, 10.0, config.low_threshold, 0.5);
        let estimate = DoseRateCalculator::fused_dose(&sensitive, &factors, &config).unwrap();
        assert_eq!(estimate.source, DoseSource::SensitiveCounter);

        let spectral =
            measurement(3, 10.0, 1.0, 0.0).with_spectrum(Spectrum::new(vec![10; 4], 1.0));
        let estimate = DoseRateCalculator::fused_dose(&spectral, &factors, &config).unwrap();
        assert_eq!(estimate.source, DoseSource::Spectrum);
        assert_abs_diff_eq!(estimate.dose_at_height, 40.0 * 1e-13 * 3.6e9, epsilon = 1e-9);
        assert_abs_diff_eq!(
            estimate.dose_at_1m,
            DoseRateCalculator::height_correct(estimate.dose_at_height, 10.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn spectral_fallback_without_spectrum_is_invalid() {
        let config = DoseConfig::default();
        let bare = measurement(9, 10.0, 0.0, 0.0);
        assert!(matches!(
            DoseRateCalculator::fused_dose(&bare, &[], &config),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn batch_drops_bad_records_and_keeps_going() {
        let mut flight = Flight::new("batch", FlightMetadata::default());
        flight.calibration = Some(EnergyCalibration::new(0.0, 12.0));
        flight.measurements = vec![
            measurement(1, 50.0, 5.0, 0.0).with_spectrum(Spectrum::new(vec![3; 8], 1.0)),
            measurement(2, 50.0, 5.0, 0.0),
            measurement(3, 50.0, 80.0, 0.0),
        ];
        let metrics = MetricsRecorder::new();
        let estimates =
            DoseRateCalculator::batch(&flight, &DoseConfig::default(), &metrics).unwrap();
        let ids: Vec<u64> = estimates.iter().map(|e| e.measurement_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(metrics.snapshot(), (2, 1));
    }

    #[test]
    fn repeated_batches_share_one_recorder() {
        let mut flight = Flight::new("repeat", FlightMetadata::default());
        flight.calibration = Some(EnergyCalibration::new(0.0, 12.0));
        flight.measurements = vec![
            measurement(1, 50.0, 80.0, 0.0),
            measurement(2, 50.0, 5.0, 0.0),
        ];
        let metrics = MetricsRecorder::new();
        for round in 1..=3 {
            let estimates =
                DoseRateCalculator::batch(&flight, &DoseConfig::default(), &metrics).unwrap();
            assert_eq!(estimates.len(), 1);
            assert_eq!(metrics.snapshot(), (round, round));
        }
    }

    #[test]
    fn batch_without_calibration_fails() {
        let flight = Flight::new("nocal", FlightMetadata::default());
        let result =
            DoseRateCalculator::batch(&flight, &DoseConfig::default(), &MetricsRecorder::new());
        assert!(matches!(result, Err(CoreError::MissingCalibration(_))));
    }
}
