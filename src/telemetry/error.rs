use thiserror::Error;

use crate::meter::MeterError;
use crate::sink::SinkError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("unknown meter key '{0}'")]
    UnknownKey(String),
    #[error("meter key '{0}' registered twice")]
    DuplicateKey(String),
    #[error("meter '{key}': {source}")]
    Meter {
        key: String,
        #[source]
        source: MeterError,
    },
    #[error("meter '{key}' is not an average meter")]
    NotAverage { key: String },
    #[error("sink '{sink}' failed: {source}")]
    Sink {
        sink: String,
        #[source]
        source: SinkError,
    },
}
