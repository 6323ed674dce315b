use thiserror::Error;

use super::affine::Affine2;
use crate::meter::AverageMeter;

/// Joint order shared with the model and dataset: index `j` of every coordinate
/// row is the joint named `JOINT_NAMES[j]`. Do not reorder.
pub const JOINT_NAMES: [&str; 16] = [
    "rankle", "rknee", "rhip", "lhip", "lknee", "lankle", "pelvis", "thorax",
    "upperneck", "headtop", "rwrist", "relbow", "rshoulder", "lshoulder",
    "lelbow", "lwrist",
];

/// A joint is a hit when `distance / normalization <= PCKH_THRESHOLD`.
pub const PCKH_THRESHOLD: f64 = 0.5;

pub const ALL: &str = "all";

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("sample {sample}: normalization length {value} must be positive and finite")]
    InvalidNormalization { sample: usize, value: f64 },
}

/// Masked PCKh accuracy: one average meter per joint plus the aggregate `all`.
///
/// Every counted joint contributes the same 0/1 sample to `all` and to its own
/// meter. Joints whose mask is false are not counted anywhere.
#[derive(Debug, Clone)]
pub struct PckhEvaluator {
    all: AverageMeter,
    joints: [AverageMeter; 16],
}

impl Default for PckhEvaluator {
    fn default() -> Self {
        Self {
            all: AverageMeter::new(),
            joints: std::array::from_fn(|_| AverageMeter::new()),
        }
    }
}

impl PckhEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulates one batch.
    ///
    /// `predicted` and `target` are `B` rows of per-joint coordinates in the
    /// original image space, `mask` marks annotated joints, and `norm[b]` is the
    /// head segment length of sample `b`. The whole batch is validated before any
    /// meter changes.
    pub fn add(
        &mut self,
        predicted: &[Vec<[f64; 2]>],
        target: &[Vec<[f64; 2]>],
        mask: &[Vec<bool>],
        norm: &[f64],
    ) -> Result<(), EvalError> {
        validate(predicted, target, mask, norm)?;

        for (b, ((pred_row, target_row), mask_row)) in predicted.iter().zip(target).zip(mask).enumerate() {
            for (j, ((p, t), &annotated)) in pred_row.iter().zip(target_row).zip(mask_row).enumerate() {
                if !annotated {
                    continue;
                }
                let dist = ((p[0] - t[0]).powi(2) + (p[1] - t[1]).powi(2)).sqrt();
                let hit = if dist / norm[b] <= PCKH_THRESHOLD { 1.0 } else { 0.0 };
                self.all.add(hit);
                self.joints[j].add(hit);
            }
        }
        Ok(())
    }

    /// Like [`add`](Self::add), but coordinates are in normalized model space and
    /// are first mapped through each sample's transform.
    pub fn add_normalized(
        &mut self,
        predicted: &[Vec<[f64; 2]>],
        target: &[Vec<[f64; 2]>],
        mask: &[Vec<bool>],
        norm: &[f64],
        transforms: &[Affine2],
    ) -> Result<(), EvalError> {
        if transforms.len() != predicted.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "{} transforms for {} samples",
                transforms.len(),
                predicted.len()
            )));
        }
        let project = |rows: &[Vec<[f64; 2]>]| -> Vec<Vec<[f64; 2]>> {
            rows.iter()
                .zip(transforms)
                .map(|(row, tf)| row.iter().map(|&p| tf.apply(p)).collect())
                .collect()
        };
        self.add(&project(predicted), &project(target), mask, norm)
    }

    pub fn reset(&mut self) {
        self.all.reset();
        for meter in self.joints.iter_mut() {
            meter.reset();
        }
    }

    /// `"all"` or one of [`JOINT_NAMES`].
    pub fn meter(&self, name: &str) -> Option<&AverageMeter> {
        if name == ALL {
            return Some(&self.all);
        }
        JOINT_NAMES.iter().position(|&j| j == name).map(|j| &self.joints[j])
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.meter(name).map(AverageMeter::value)
    }

    /// `all` first, then the joints in table order.
    pub fn meters(&self) -> impl Iterator<Item = (&'static str, &AverageMeter)> {
        std::iter::once((ALL, &self.all)).chain(JOINT_NAMES.iter().copied().zip(self.joints.iter()))
    }
}

fn validate(
    predicted: &[Vec<[f64; 2]>],
    target: &[Vec<[f64; 2]>],
    mask: &[Vec<bool>],
    norm: &[f64],
) -> Result<(), EvalError> {
    let batch = predicted.len();
    if target.len() != batch || mask.len() != batch || norm.len() != batch {
        return Err(EvalError::ShapeMismatch(format!(
            "batch sizes differ: predicted {}, target {}, mask {}, norm {}",
            batch,
            target.len(),
            mask.len(),
            norm.len()
        )));
    }

    for b in 0..batch {
        let joints = predicted[b].len();
        if joints > JOINT_NAMES.len() {
            return Err(EvalError::ShapeMismatch(format!(
                "sample {} has {} joints, at most {} are named",
                b,
                joints,
                JOINT_NAMES.len()
            )));
        }
        if target[b].len() != joints || mask[b].len() != joints {
            return Err(EvalError::ShapeMismatch(format!(
                "sample {}: predicted {} joints, target {}, mask {}",
                b,
                joints,
                target[b].len(),
                mask[b].len()
            )));
        }
        let counted = mask[b].iter().any(|&m| m);
        if counted && !(norm[b].is_finite() && norm[b] > 0.0) {
            return Err(EvalError::InvalidNormalization { sample: b, value: norm[b] });
        }
    }
    Ok(())
}
