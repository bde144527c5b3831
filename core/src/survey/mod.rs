pub mod flight;
pub mod measurement;
pub mod repository;
pub mod spectrum;

pub use flight::{Flight, FlightMetadata};
pub use measurement::{EcefPosition, Measurement};
pub use repository::{FlightRepository, InMemoryRepository};
pub use spectrum::{EnergyCalibration, Spectrum};
