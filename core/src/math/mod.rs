pub mod geodesy;
pub mod quadrature;
pub mod stats;

pub use geodesy::Lla;
pub use quadrature::adaptive_simpson;
pub use stats::StatsHelper;
