use serde::{Deserialize, Serialize};

use crate::survey::spectrum::Spectrum;

/// Earth-centred, earth-fixed position in whole centimetres (storage precision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcefPosition {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl EcefPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn to_meters(self) -> (f64, f64, f64) {
        (
            self.x as f64 / 100.0,
            self.y as f64 / 100.0,
            self.z as f64 / 100.0,
        )
    }
}

/// One geolocated survey sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub id: u64,
    /// Unix time in seconds.
    pub timestamp: f64,
    pub position: EcefPosition,
    /// Barometric height above ground in metres.
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<Spectrum>,
    /// Sensitive Geiger counter rate (cps).
    pub gm1: f64,
    /// Coarse Geiger counter rate (cps).
    pub gm2: f64,
}

impl Measurement {
    pub fn new(id: u64, timestamp: f64, position: EcefPosition, height: f64) -> Self {
        Self {
            id,
            timestamp,
            position,
            height,
            spectrum: None,
            gm1: 0.0,
            gm2: 0.0,
        }
    }

    pub fn with_spectrum(mut self, spectrum: Spectrum) -> Self {
        self.spectrum = Some(spectrum);
        self
    }

    pub fn with_counters(mut self, gm1: f64, gm2: f64) -> Self {
        self.gm1 = gm1;
        self.gm2 = gm2;
        self
    }
}
