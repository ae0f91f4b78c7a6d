pub mod common;
pub mod error;
pub mod layers;
pub mod telemetry;
