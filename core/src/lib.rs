//! Numeric core of an airborne gamma-ray survey system.
//!
//! Turns stored flight measurements into dose rates, keeps each flight's
//! energy scale calibrated against a reference photopeak, and estimates the
//! position and activity of a point source from the intensity variation
//! along the flight path.

pub mod config;
pub mod localization;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod service;
pub mod survey;
pub mod telemetry;

pub use config::SurveyConfig;
pub use prelude::{CancelToken, CoreError, CoreResult};
pub use service::FlightAnalyzer;
