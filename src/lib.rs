pub mod config;
pub mod eval;
pub mod meter;
pub mod reporting;
pub mod sink;
pub mod telemetry;

// Re-export the types a training driver touches directly
pub use eval::PckhEvaluator;
pub use meter::{Meter, MeterValue};
pub use sink::Sink;
pub use telemetry::Telemetry;
