//! Accuracy evaluation consumed through the meter abstraction.

pub mod affine;
pub mod pckh;

pub use affine::Affine2;
pub use pckh::{EvalError, PckhEvaluator, ALL, JOINT_NAMES, PCKH_THRESHOLD};
