use anyhow::{ensure, Context};
use gammacore::config::SurveyConfig;
use gammacore::localization::{AttenuationModel, GeoBounds, GeoCoordinate, Projection};
use gammacore::math::geodesy::to_ecef;
use gammacore::processing::DoseRateCalculator;
use gammacore::survey::{EnergyCalibration, Flight, FlightMetadata, Measurement, Spectrum};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::generator::template::{exponential_continuum, gaussian_line};

const FWHM_TO_SIGMA: f64 = 2.355;

/// Point source placed on the ground inside the survey area.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub lat: f64,
    pub lon: f64,
    pub activity_bq: f64,
    pub isotope: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            lat: 55.002,
            lon: 37.0052,
            activity_bq: 3.7e10,
            isotope: "Cs-137".into(),
        }
    }
}

/// Configuration for generating a synthetic survey flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub flight_id: String,
    pub seed: u64,
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
    /// East-west survey lines, flown alternately in opposite directions.
    pub lines: usize,
    pub samples_per_line: usize,
    /// Ellipsoidal altitude of the ground.
    pub ground_altitude_m: f64,
    pub height_m: f64,
    pub height_jitter_m: f64,
    pub channels: usize,
    pub live_time: f64,
    pub p0: f64,
    pub p1: f64,
    /// Relative slope error of the calibration stored with the flight.
    pub calibration_drift: f64,
    pub background_cps: f64,
    pub continuum_slope: f64,
    /// Scale of the counting-noise jitter; 0 gives expected counts.
    pub noise: f64,
    pub source: Option<SourceConfig>,
    pub description: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            flight_id: "synthetic-001".into(),
            seed: 0,
            south: 54.998,
            west: 36.995,
            north: 55.006,
            east: 37.015,
            lines: 5,
            samples_per_line: 60,
            ground_altitude_m: 150.0,
            height_m: 60.0,
            height_jitter_m: 2.0,
            channels: 512,
            live_time: 1.0,
            p0: 0.0,
            p1: 3.0,
            calibration_drift: 0.02,
            background_cps: 400.0,
            continuum_slope: 0.012,
            noise: 1.0,
            source: Some(SourceConfig::default()),
            description: None,
        }
    }
}

impl GeneratorConfig {
    fn bounds(&self) -> GeoBounds {
        GeoBounds::from_corners(
            GeoCoordinate::new(self.south, self.west),
            GeoCoordinate::new(self.north, self.east),
        )
    }

    /// Track of fix coordinates in flight order.
    pub fn track(&self) -> Vec<GeoCoordinate> {
        let lines = self.lines.max(1);
        let per_line = self.samples_per_line.max(2);
        let mut track = Vec::with_capacity(lines * per_line);
        for line in 0..lines {
            let lat = if lines == 1 {
                0.5 * (self.south + self.north)
            } else {
                self.south + (self.north - self.south) * line as f64 / (lines - 1) as f64
            };
            for k in 0..per_line {
                let t = k as f64 / (per_line - 1) as f64;
                let t = if line % 2 == 0 { t } else { 1.0 - t };
                track.push(GeoCoordinate::new(lat, self.west + (self.east - self.west) * t));
            }
        }
        track
    }
}

fn jitter(rng: &mut StdRng, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.gen_range(-amplitude..amplitude)
    } else {
        0.0
    }
}

/// Builds a flight whose spectra follow the forward model of `config.source`
/// on top of an exponential continuum.
pub fn build_flight(config: &GeneratorConfig, survey: &SurveyConfig) -> anyhow::Result<Flight> {
    ensure!(config.channels > 0, "generator needs at least one channel");
    ensure!(config.live_time > 0.0, "generator live time must be positive");
    let truth = EnergyCalibration::new(config.p0, config.p1);
    truth.validate().context("validating generator calibration")?;

    let projection = Projection::for_bounds(&config.bounds());
    let source = match &config.source {
        Some(source) => {
            let isotope = survey
                .isotope(&source.isotope)
                .with_context(|| format!("looking up source isotope {}", source.isotope))?;
            let model = AttenuationModel::new(isotope, &survey.detector)
                .context("building attenuation model for the source")?;
            let energy = isotope.energy_kev;
            let resolution =
                survey.peak.resolution_at_reference * (survey.peak.reference_kev / energy).sqrt();
            Some((
                source,
                model,
                truth.channel_of(energy),
                resolution * energy / FWHM_TO_SIGMA / truth.p1,
                projection.to_local(GeoCoordinate::new(source.lat, source.lon), 0.0),
            ))
        }
        None => None,
    };

    let factors = DoseRateCalculator::conversion_factors(truth, config.channels, &survey.dose);
    let continuum = exponential_continuum(
        config.channels,
        config.background_cps * config.live_time,
        config.continuum_slope,
    );
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut flight = Flight::new(
        config.flight_id.clone(),
        FlightMetadata {
            name: config.flight_id.clone(),
            description: config.description.clone(),
            detector: Some("NaI(Tl) synthetic".into()),
        },
    );
    for (index, coordinate) in config.track().into_iter().enumerate() {
        let height = config.height_m + jitter(&mut rng, config.height_jitter_m);
        let mut expected = continuum.clone();
        if let Some((source, model, center, sigma, at)) = &source {
            let range = projection.to_local(coordinate, height).distance(*at);
            let area = model.intensity_at(source.activity_bq, range) * config.live_time;
            for (e, line) in expected
                .iter_mut()
                .zip(gaussian_line(config.channels, *center, *sigma, area))
            {
                *e += line;
            }
        }
        let counts = expected
            .iter()
            .map(|&e| (e + config.noise * e.sqrt() * jitter(&mut rng, 1.0)).max(0.0).round() as u32)
            .collect();
        let spectrum = Spectrum::new(counts, config.live_time);

        let dose = DoseRateCalculator::total_dose(&spectrum, &factors)
            .context("computing generator dose")?;
        let id = index as u64;
        let measurement = Measurement::new(
            id,
            id as f64 * config.live_time,
            to_ecef(coordinate.lat, coordinate.lon, config.ground_altitude_m + height),
            height,
        )
        .with_spectrum(spectrum)
        .with_counters(dose / survey.dose.gm1_coeff, dose / survey.dose.gm2_coeff);
        flight.measurements.push(measurement);
    }
    flight.calibration = Some(EnergyCalibration::new(
        config.p0,
        config.p1 * (1.0 + config.calibration_drift),
    ));
    Ok(flight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gammacore::math::geodesy::position_to_lla;

    #[test]
    fn serpentine_track_alternates_direction() {
        let config = GeneratorConfig {
            lines: 3,
            samples_per_line: 4,
            ..Default::default()
        };
        let track = config.track();
        assert_eq!(track.len(), 12);
        assert_eq!(track[0].lon, config.west);
        assert_eq!(track[3].lon, config.east);
        assert_eq!(track[4].lon, config.east);
        assert_eq!(track[11].lat, config.north);
    }

    #[test]
    fn generator_is_deterministic_per_seed() {
        let survey = SurveyConfig::default();
        let config = GeneratorConfig {
            lines: 2,
            samples_per_line: 10,
            seed: 13,
            ..Default::default()
        };
        let a = build_flight(&config, &survey).unwrap();
        let b = build_flight(&config, &survey).unwrap();
        assert_eq!(a.len(), 20);
        assert_eq!(
            a.measurements[7].spectrum.as_ref().unwrap().counts,
            b.measurements[7].spectrum.as_ref().unwrap().counts
        );
        let fix = position_to_lla(a.measurements[0].position);
        assert!((fix.lat - config.south).abs() < 1e-6);
        assert!((fix.alt - (config.ground_altitude_m + a.measurements[0].height)).abs() < 0.05);
    }

    #[test]
    fn photopeak_is_strongest_near_the_source() {
        let survey = SurveyConfig::default();
        let source = SourceConfig {
            lat: 55.0,
            lon: 37.005,
            ..Default::default()
        };
        let config = GeneratorConfig {
            south: 55.0,
            north: 55.0,
            west: 36.995,
            east: 37.015,
            lines: 1,
            samples_per_line: 21,
            noise: 0.0,
            height_jitter_m: 0.0,
            source: Some(source),
            ..Default::default()
        };
        let flight = build_flight(&config, &survey).unwrap();
        let line_channel = 221;
        let counts: Vec<u32> = flight
            .measurements
            .iter()
            .map(|m| m.spectrum.as_ref().unwrap().counts[line_channel])
            .collect();
        let (strongest, _) = counts
            .iter()
            .enumerate()
            .max_by_key(|(_, c)| **c)
            .unwrap();
        // sample 10 sits at lon 37.005
        assert_eq!(strongest, 10);
        assert!(flight.calibration.unwrap().p1 > config.p1);
    }

    #[test]
    fn missing_isotope_is_reported() {
        let config = GeneratorConfig {
            source: Some(SourceConfig {
                isotope: "Xx-999".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(build_flight(&config, &SurveyConfig::default()).is_err());
    }
}
