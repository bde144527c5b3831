pub mod flight;
pub mod template;
