use std::collections::HashMap;
use std::sync::RwLock;

use crate::prelude::{CoreError, CoreResult};
use crate::survey::flight::Flight;
use crate::survey::measurement::Measurement;
use crate::survey::spectrum::EnergyCalibration;

/// Read access to stored flights, plus the one write the core performs:
/// persisting a recalibrated energy scale.
pub trait FlightRepository: Send + Sync {
    fn fetch_flight(&self, flight_id: &str) -> CoreResult<Flight>;

    fn fetch_measurements(&self, flight_id: &str) -> CoreResult<Vec<Measurement>> {
        Ok(self.fetch_flight(flight_id)?.measurements)
    }

    fn fetch_calibration(&self, flight_id: &str) -> CoreResult<EnergyCalibration> {
        self.fetch_flight(flight_id)?.calibration()
    }

    fn store_calibration(
        &self,
        flight_id: &str,
        calibration: EnergyCalibration,
    ) -> CoreResult<()>;
}

/// Map-backed repository for offline runs and tests.
#[derive(Default)]
pub struct InMemoryRepository {
    flights: RwLock<HashMap<String, Flight>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, flight: Flight) -> CoreResult<()> {
        let mut guard = self
            .flights
            .write()
            .map_err(|_| CoreError::Internal("repository lock poisoned".into()))?;
        guard.insert(flight.id.clone(), flight);
        Ok(())
    }
}

impl FlightRepository for InMemoryRepository {
    fn fetch_flight(&self, flight_id: &str) -> CoreResult<Flight> {
        let guard = self
            .flights
            .read()
            .map_err(|_| CoreError::Internal("repository lock poisoned".into()))?;
        guard
            .get(flight_id)
            .cloned()
            .ok_or_else(|| CoreError::DataSource(format!("unknown flight {}", flight_id)))
    }

    fn store_calibration(
        &self,
        flight_id: &str,
        calibration: EnergyCalibration,
    ) -> CoreResult<()> {
        calibration.validate()?;
        let mut guard = self
            .flights
            .write()
            .map_err(|_| CoreError::Internal("repository lock poisoned".into()))?;
        let flight = guard
            .get_mut(flight_id)
            .ok_or_else(|| CoreError::DataSource(format!("unknown flight {}", flight_id)))?;
        flight.calibration = Some(calibration);
        Ok(())
    }
}
