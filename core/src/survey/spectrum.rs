use serde::{Deserialize, Serialize};

use crate::prelude::{CoreError, CoreResult};

/// Channel histogram recorded by the scintillation detector at one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub counts: Vec<u32>,
    /// Acquisition live time in seconds.
    pub live_time: f64,
}

impl Spectrum {
    pub fn new(counts: Vec<u32>, live_time: f64) -> Self {
        Self { counts, live_time }
    }

    /// Decodes the storage layout: one little-endian `u16` per channel.
    pub fn from_le_bytes(bytes: &[u8], live_time: f64) -> CoreResult<Self> {
        if bytes.len() % 2 != 0 {
            return Err(CoreError::InvalidInput(format!(
                "spectrum blob has odd length {}",
                bytes.len()
            )));
        }
        let counts = bytes
            .chunks_exact(2)
            .map(|pair| u32::from(u16::from_le_bytes([pair[0], pair[1]])))
            .collect();
        Ok(Self { counts, live_time })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Counts per second. A non-positive live time leaves counts unscaled.
    pub fn count_rates(&self) -> Vec<f64> {
        let scale = self.rate_scale();
        self.counts.iter().map(|&c| c as f64 * scale).collect()
    }

    pub(crate) fn rate_scale(&self) -> f64 {
        if self.live_time > 0.0 {
            1.0 / self.live_time
        } else {
            1.0
        }
    }
}

/// Narrowest channel width (keV) a calibration may claim.
pub const MIN_CALIBRATION_SLOPE: f64 = 1e-3;

/// Linear channel-to-energy map `E = p0 + p1 * channel` in keV.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyCalibration {
    pub p0: f64,
    pub p1: f64,
}

impl EnergyCalibration {
    pub fn new(p0: f64, p1: f64) -> Self {
        Self { p0, p1 }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.p0.is_finite() || !self.p1.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "non-numeric calibration ({}, {})",
                self.p0, self.p1
            )));
        }
        if self.p1 < MIN_CALIBRATION_SLOPE {
            return Err(CoreError::InvalidInput(format!(
                "calibration slope must be at least {} keV/channel, got {}",
                MIN_CALIBRATION_SLOPE, self.p1
            )));
        }
        Ok(())
    }

    pub fn energy(&self, channel: f64) -> f64 {
        self.p0 + self.p1 * channel
    }

    pub fn channel_of(&self, energy_kev: f64) -> f64 {
        (energy_kev - self.p0) / self.p1
    }
}
