//! Accumulators that producers feed between two steps.
//!
//! Every meter exposes the same lifecycle: observations go in through `add`/`set`,
//! sinks read `value()`, and the registry calls `reset()` after each step. Meters
//! built with `sticky()` ignore `reset()` and hold run-scoped values.

pub mod average;
pub mod last;
pub mod max;
pub mod payload;
pub mod time;

pub use average::AverageMeter;
pub use last::ValueMeter;
pub use max::MaxMeter;
pub use payload::MeterValue;
pub use time::{time_into, TimeMeter, TimedExt, TimedIter};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeterError {
    #[error("{kind} meter expects a number, got {found}")]
    TypeMismatch { kind: MeterKind, found: &'static str },
    #[error("tensor of shape {shape:?} does not hold {len} element(s)")]
    MalformedTensor { shape: Vec<usize>, len: usize },
    #[error("{kind} meter does not support {op}")]
    Unsupported { kind: MeterKind, op: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterKind {
    Average,
    Max,
    Value,
    Time,
}

impl std::fmt::Display for MeterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MeterKind::Average => "average",
            MeterKind::Max => "max",
            MeterKind::Value => "value",
            MeterKind::Time => "time",
        };
        f.write_str(name)
    }
}

/// A registry slot. The kind of every key is fixed when the registry is built.
#[derive(Debug, Clone)]
pub enum Meter {
    Average(AverageMeter),
    Max(MaxMeter),
    Value(ValueMeter),
    Time(TimeMeter),
}

impl Meter {
    pub fn average() -> Self {
        Meter::Average(AverageMeter::new())
    }

    pub fn max() -> Self {
        Meter::Max(MaxMeter::new())
    }

    pub fn last() -> Self {
        Meter::Value(ValueMeter::new())
    }

    pub fn time() -> Self {
        Meter::Time(TimeMeter::new())
    }

    /// Same kind, exempt from `reset()`. Any state already held is dropped.
    pub fn sticky(self) -> Self {
        match self {
            Meter::Average(_) => Meter::Average(AverageMeter::sticky()),
            Meter::Max(_) => Meter::Max(MaxMeter::sticky()),
            Meter::Value(_) => Meter::Value(ValueMeter::sticky()),
            Meter::Time(_) => Meter::Time(TimeMeter::sticky()),
        }
    }

    pub fn kind(&self) -> MeterKind {
        match self {
            Meter::Average(_) => MeterKind::Average,
            Meter::Max(_) => MeterKind::Max,
            Meter::Value(_) => MeterKind::Value,
            Meter::Time(_) => MeterKind::Time,
        }
    }

    /// Accumulates an observation. For max meters the result reports whether
    /// the peak was raised; it is always `false` for other kinds.
    pub fn add(&mut self, value: MeterValue) -> Result<bool, MeterError> {
        let kind = self.kind();
        match self {
            Meter::Average(m) => {
                m.add(scalar(kind, &value)?);
                Ok(false)
            }
            Meter::Max(m) => Ok(m.add(scalar(kind, &value)?)),
            Meter::Value(m) => {
                m.set(well_formed(value)?);
                Ok(false)
            }
            Meter::Time(_) => Err(MeterError::Unsupported { kind, op: "add" }),
        }
    }

    /// Overwrites the held payload. Only value meters accept this.
    pub fn set(&mut self, value: MeterValue) -> Result<(), MeterError> {
        match self {
            Meter::Value(m) => {
                m.set(well_formed(value)?);
                Ok(())
            }
            other => Err(MeterError::Unsupported { kind: other.kind(), op: "set" }),
        }
    }

    pub fn value(&self) -> MeterValue {
        match self {
            Meter::Average(m) => MeterValue::Scalar(m.value()),
            Meter::Max(m) => MeterValue::Scalar(m.value()),
            Meter::Value(m) => m.value().clone(),
            Meter::Time(m) => MeterValue::Seconds(m.value()),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Meter::Average(m) => m.reset(),
            Meter::Max(m) => m.reset(),
            Meter::Value(m) => m.reset(),
            Meter::Time(m) => m.reset(),
        }
    }

    pub fn is_sticky(&self) -> bool {
        match self {
            Meter::Average(m) => m.is_sticky(),
            Meter::Max(m) => m.is_sticky(),
            Meter::Value(m) => m.is_sticky(),
            Meter::Time(m) => m.is_sticky(),
        }
    }
}

fn well_formed(value: MeterValue) -> Result<MeterValue, MeterError> {
    if let MeterValue::Tensor { shape, data } = &value {
        if !value.is_well_formed() {
            return Err(MeterError::MalformedTensor { shape: shape.clone(), len: data.len() });
        }
    }
    Ok(value)
}

fn scalar(kind: MeterKind, value: &MeterValue) -> Result<f64, MeterError> {
    match value {
        MeterValue::Scalar(v) | MeterValue::Seconds(v) => Ok(*v),
        MeterValue::Integer(v) => Ok(*v as f64),
        other => Err(MeterError::TypeMismatch { kind, found: other.kind() }),
    }
}
