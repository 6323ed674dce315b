//! The meter registry and its step/reset cycle.
//!
//! # ORDERING INVARIANT
//! Per step the driver calls `add`/`set` any number of times, then `step()` exactly
//! once, then `reset()` exactly once. Sinks only ever see values through `step()`
//! and never touch meters themselves.
//!
//! The registry does no locking. Observations produced on worker threads must be
//! handed back to the driver before they are added.

pub mod error;
pub mod registry;
pub mod snapshot;

pub use error::TelemetryError;
pub use registry::Telemetry;
pub use snapshot::{SinkFailure, Snapshot, StepReport};
