use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::{IntensitySource, Isotope, PeakConfig};
use crate::math::geodesy::{meters_per_degree, position_to_lla};
use crate::prelude::CoreResult;
use crate::processing::peak::PeakCalibrationEngine;
use crate::processing::spectrum::SpectrumProcessor;
use crate::survey::Flight;

/// Fallback span (degrees) for a bounding box that is flat on both axes.
const MIN_SPAN_DEG: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoordinate {
    pub lat: f64,
    pub lon: f64,
}

impl GeoCoordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Geographic rectangle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl GeoBounds {
    pub fn from_corners(a: GeoCoordinate, b: GeoCoordinate) -> Self {
        Self {
            south: a.lat.min(b.lat),
            west: a.lon.min(b.lon),
            north: a.lat.max(b.lat),
            east: a.lon.max(b.lon),
        }
    }

    /// Smallest box holding every point; `None` for an empty iterator.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = GeoCoordinate>,
    {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Self::from_corners(p, p),
                Some(b) => Self {
                    south: b.south.min(p.lat),
                    west: b.west.min(p.lon),
                    north: b.north.max(p.lat),
                    east: b.east.max(p.lon),
                },
            })
        })
    }

    /// True when the corners do not span an area.
    pub fn is_degenerate(&self) -> bool {
        !(self.north > self.south && self.east > self.west)
    }

    /// Gives a flat axis the other axis' span, or a small fixed span.
    pub fn padded(self) -> Self {
        let lat_span = self.north - self.south;
        let lon_span = self.east - self.west;
        let fallback = lat_span.max(lon_span).max(MIN_SPAN_DEG);
        let mut out = self;
        if lat_span <= 0.0 {
            out.south -= fallback / 2.0;
            out.north += fallback / 2.0;
        }
        if lon_span <= 0.0 {
            out.west -= fallback / 2.0;
            out.east += fallback / 2.0;
        }
        out
    }

    pub fn expanded(self, fraction: f64) -> Self {
        let dlat = (self.north - self.south) * fraction;
        let dlon = (self.east - self.west) * fraction;
        Self {
            south: self.south - dlat,
            west: self.west - dlon,
            north: self.north + dlat,
            east: self.east + dlon,
        }
    }
}

/// Metric position relative to a projection origin; `z` is height above ground.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LocalPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(self, other: LocalPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }

    pub fn horizontal_distance(self, other: LocalPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn midpoint(self, other: LocalPoint) -> LocalPoint {
        self.lerp(other, 0.5)
    }

    pub fn lerp(self, other: LocalPoint, t: f64) -> LocalPoint {
        LocalPoint {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            z: self.z + (other.z - self.z) * t,
        }
    }
}

/// Equirectangular degrees-to-metres frame anchored at a south-west corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    origin: GeoCoordinate,
    m_per_deg_lat: f64,
    m_per_deg_lon: f64,
}

impl Projection {
    pub fn for_bounds(bounds: &GeoBounds) -> Self {
        let (m_per_deg_lat, m_per_deg_lon) = meters_per_degree(0.5 * (bounds.south + bounds.north));
        Self {
            origin: GeoCoordinate::new(bounds.south, bounds.west),
            m_per_deg_lat,
            m_per_deg_lon,
        }
    }

    pub fn to_local(&self, coordinate: GeoCoordinate, height: f64) -> LocalPoint {
        LocalPoint {
            x: (coordinate.lon - self.origin.lon) * self.m_per_deg_lon,
            y: (coordinate.lat - self.origin.lat) * self.m_per_deg_lat,
            z: height,
        }
    }
}

/// One point of the observed-intensity series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurveySample {
    pub measurement_id: u64,
    pub coordinate: GeoCoordinate,
    pub height: f64,
    /// Counts per second in the chosen window or photopeak.
    pub intensity: f64,
}

/// Builds the intensity series in flight order, skipping records without a
/// spectrum or a usable position fix.
pub fn intensity_series(
    flight: &Flight,
    source: &IntensitySource,
    isotope: &Isotope,
    peak: &PeakConfig,
) -> CoreResult<Vec<SurveySample>> {
    let peak_channel = match source {
        IntensitySource::Peak { .. } => {
            let calibration = flight.calibration()?;
            let channel = calibration.channel_of(isotope.energy_kev).round().max(0.0) as usize;
            Some((calibration, channel))
        }
        IntensitySource::Window { .. } => None,
    };

    let mut samples = Vec::with_capacity(flight.len());
    for measurement in &flight.measurements {
        let lla = position_to_lla(measurement.position);
        if !lla.is_valid() {
            debug!("measurement {} has no valid fix", measurement.id);
            continue;
        }
        let Some(spectrum) = measurement.spectrum.as_ref() else {
            warn!(
                "flight {}: measurement {} has no spectrum, left out of localization",
                flight.id, measurement.id
            );
            continue;
        };
        let intensity = match (source, peak_channel) {
            (IntensitySource::Window { start, end, .. }, _) => {
                SpectrumProcessor::value_in_channels(spectrum, *start, *end, true)
            }
            (IntensitySource::Peak { .. }, Some((calibration, channel))) => {
                PeakCalibrationEngine::peak_area(spectrum, channel, calibration, peak)?
                    * spectrum.rate_scale()
            }
            (IntensitySource::Peak { .. }, None) => continue,
        };
        samples.push(SurveySample {
            measurement_id: measurement.id,
            coordinate: GeoCoordinate::new(lla.lat, lla.lon),
            height: measurement.height,
            intensity,
        });
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::geodesy::to_ecef;
    use crate::survey::{EcefPosition, EnergyCalibration, FlightMetadata, Measurement, Spectrum};

    #[test]
    fn enclosing_box_and_padding() {
        let points = vec![
            GeoCoordinate::new(55.0, 37.0),
            GeoCoordinate::new(55.0, 37.02),
            GeoCoordinate::new(55.0, 37.01),
        ];
        let bounds = GeoBounds::enclosing(points).unwrap();
        assert!(bounds.is_degenerate());
        let padded = bounds.padded();
        assert!(!padded.is_degenerate());
        assert!((padded.north - padded.south - 0.02).abs() < 1e-12);
        assert!(GeoBounds::enclosing(Vec::new()).is_none());
    }

    #[test]
    fn projection_measures_metres_from_corner() {
        let bounds =
            GeoBounds::from_corners(GeoCoordinate::new(0.0, 0.0), GeoCoordinate::new(0.0, 1.0));
        let projection = Projection::for_bounds(&bounds);
        let p = projection.to_local(GeoCoordinate::new(0.0, 1.0), 30.0);
        assert!((p.x - 111_319.5).abs() < 1.0);
        assert_eq!(p.y, 0.0);
        assert_eq!(p.z, 30.0);
    }

    #[test]
    fn window_series_skips_bad_records() {
        let mut flight = Flight::new("series", FlightMetadata::default());
        flight.measurements = vec![
            Measurement::new(1, 0.0, to_ecef(55.0, 37.0, 100.0), 60.0)
                .with_spectrum(Spectrum::new(vec![1, 2, 3, 4], 2.0)),
            Measurement::new(2, 1.0, to_ecef(55.0, 37.001, 100.0), 60.0),
            Measurement::new(3, 2.0, EcefPosition::new(0, 0, 0), 60.0)
                .with_spectrum(Spectrum::new(vec![1, 2, 3, 4], 2.0)),
        ];
        let source = IntensitySource::Window {
            start: 1,
            end: 2,
            isotope: "Cs-137".into(),
        };
        let isotope = Isotope::new("Cs-137", 661.7, 0.851);
        let samples = intensity_series(&flight, &source, &isotope, &PeakConfig::default()).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].measurement_id, 1);
        assert_eq!(samples[0].intensity, 2.5);
        assert!((samples[0].coordinate.lat - 55.0).abs() < 1e-6);
    }

    #[test]
    fn peak_series_needs_calibration() {
        let mut flight = Flight::new("nocal", FlightMetadata::default());
        flight.measurements = vec![Measurement::new(1, 0.0, to_ecef(55.0, 37.0, 100.0), 60.0)
            .with_spectrum(Spectrum::new(vec![0; 256], 1.0))];
        let source = IntensitySource::Peak {
            isotope: "Cs-137".into(),
        };
        let isotope = Isotope::new("Cs-137", 661.7, 0.851);
        assert!(intensity_series(&flight, &source, &isotope, &PeakConfig::default()).is_err());

        flight.calibration = Some(EnergyCalibration::new(0.0, 3.0));
        let samples = intensity_series(&flight, &source, &isotope, &PeakConfig::default()).unwrap();
        assert_eq!(samples[0].intensity, 0.0);
    }
}
