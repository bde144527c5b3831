use serde::{Deserialize, Serialize};

use crate::prelude::{CoreError, CoreResult};
use crate::survey::measurement::Measurement;
use crate::survey::spectrum::EnergyCalibration;

/// Descriptive information attached to a flight.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector: Option<String>,
}

/// Ordered measurements sharing one energy calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flight {
    pub id: String,
    pub metadata: FlightMetadata,
    pub measurements: Vec<Measurement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<EnergyCalibration>,
}

impl Flight {
    pub fn new(id: impl Into<String>, metadata: FlightMetadata) -> Self {
        Self {
            id: id.into(),
            metadata,
            measurements: Vec::new(),
            calibration: None,
        }
    }

    /// Validated calibration, or an error naming the flight.
    pub fn calibration(&self) -> CoreResult<EnergyCalibration> {
        let calibration = self
            .calibration
            .ok_or_else(|| CoreError::MissingCalibration(self.id.clone()))?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }
}
