pub mod dose;
pub mod peak;
pub mod spectrum;

pub use dose::{DoseEstimate, DoseRateCalculator, DoseSource};
pub use peak::{CalibrationUpdate, PeakBounds, PeakCalibrationEngine};
pub use spectrum::SpectrumProcessor;
