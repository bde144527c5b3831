//! WGS84 conversions between ECEF centimetres and latitude/longitude/altitude.

use serde::{Deserialize, Serialize};

use crate::survey::EcefPosition;

const DTOR: f64 = std::f64::consts::PI / 180.0;
const RTOD: f64 = 180.0 / std::f64::consts::PI;

/// Semi-major axis in metres.
pub const WGS84_A: f64 = 6378137.0;
/// Semi-minor axis in metres.
pub const WGS84_B: f64 = 6356752.31424517929;
/// First eccentricity squared.
const WGS84_E2: f64 = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_A * WGS84_A);
/// Second eccentricity squared.
const WGS84_EP2: f64 = (WGS84_A * WGS84_A - WGS84_B * WGS84_B) / (WGS84_B * WGS84_B);

/// Fixes closer than this to the polar axis (per component, in cm) are
/// treated as receiver garbage rather than real positions.
const MIN_AXIS_OFFSET_CM: f64 = 100.0;

/// Geodetic position: degrees and metres above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lla {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Lla {
    /// Returned for fixes that cannot be converted.
    pub const INVALID: Lla = Lla {
        lat: -1.0,
        lon: -1.0,
        alt: 0.0,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Converts ECEF centimetres to latitude/longitude/altitude (Bowring).
///
/// Returns [`Lla::INVALID`] when `|x|` or `|y|` is below one metre.
pub fn to_lla(x: f64, y: f64, z: f64) -> Lla {
    if x.abs() < MIN_AXIS_OFFSET_CM || y.abs() < MIN_AXIS_OFFSET_CM {
        return Lla::INVALID;
    }
    let (x, y, z) = (x / 100.0, y / 100.0, z / 100.0);

    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();
    let theta = (z * WGS84_A).atan2(p * WGS84_B);
    let (sin_t, cos_t) = theta.sin_cos();

    let lat = (z + WGS84_EP2 * WGS84_B * sin_t.powi(3))
        .atan2(p - WGS84_E2 * WGS84_A * cos_t.powi(3));
    let alt = p / lat.cos() - prime_vertical_radius(lat);

    Lla {
        lat: lat * RTOD,
        lon: lon * RTOD,
        alt,
    }
}

pub fn position_to_lla(position: EcefPosition) -> Lla {
    to_lla(position.x as f64, position.y as f64, position.z as f64)
}

/// Converts degrees/metres to ECEF, rounded to whole centimetres.
pub fn to_ecef(lat: f64, lon: f64, alt: f64) -> EcefPosition {
    let (slat, clat) = (lat * DTOR).sin_cos();
    let (slon, clon) = (lon * DTOR).sin_cos();
    let n = prime_vertical_radius(lat * DTOR);

    let x = (n + alt) * clat * clon;
    let y = (n + alt) * clat * slon;
    let z = (n * (1.0 - WGS84_E2) + alt) * slat;

    EcefPosition::new(
        (x * 100.0).round() as i32,
        (y * 100.0).round() as i32,
        (z * 100.0).round() as i32,
    )
}

/// Metres spanned by one degree of latitude and of longitude at `lat`.
pub fn meters_per_degree(lat: f64) -> (f64, f64) {
    let phi = lat * DTOR;
    let w = 1.0 - WGS84_E2 * phi.sin().powi(2);
    let meridian = WGS84_A * (1.0 - WGS84_E2) / w.powf(1.5);
    let prime = WGS84_A / w.sqrt();
    (meridian * DTOR, prime * phi.cos() * DTOR)
}

/// Straight-line distance in metres.
pub fn ecef_distance(p0: EcefPosition, p1: EcefPosition) -> f64 {
    let (x0, y0, z0) = p0.to_meters();
    let (x1, y1, z1) = p1.to_meters();
    ((x0 - x1).powi(2) + (y0 - y1).powi(2) + (z0 - z1).powi(2)).sqrt()
}

fn prime_vertical_radius(lat_rad: f64) -> f64 {
    WGS84_A / (1.0 - WGS84_E2 * lat_rad.sin().powi(2)).sqrt()
}
