//! Training loss functions.
//!
//! A closed set of loss variants resolved once at configuration time: plain
//! cross-entropy, focal loss for class imbalance, label smoothing, and a
//! weighted blend of focal and label smoothing. Unknown loss names fail fast
//! with a configuration error instead of failing at first use.

use candle_core::{D, Tensor};
use candle_nn::{encoding::one_hot, loss, ops::log_softmax};
use serde::{Deserialize, Serialize};

use crate::core::{ConfigError, PsResult};

/// The supported loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossKind {
    /// Standard cross-entropy.
    CrossEntropy,
    /// Focal loss: `alpha * (1 - pt)^gamma * ce`, down-weighting easy
    /// examples.
    Focal { alpha: f64, gamma: f64 },
    /// Cross-entropy against a smoothed target distribution.
    LabelSmoothing { smoothing: f64 },
    /// Weighted blend of focal and label-smoothing losses.
    Combined {
        focal_weight: f64,
        smoothing_weight: f64,
        alpha: f64,
        gamma: f64,
        smoothing: f64,
    },
}

impl LossKind {
    /// Default focal parameters, matching the common alpha=1, gamma=2 setup.
    pub fn focal_default() -> Self {
        LossKind::Focal {
            alpha: 1.0,
            gamma: 2.0,
        }
    }

    /// Default combined parameters: 0.7 focal, 0.3 label smoothing.
    pub fn combined_default() -> Self {
        LossKind::Combined {
            focal_weight: 0.7,
            smoothing_weight: 0.3,
            alpha: 1.0,
            gamma: 2.0,
            smoothing: 0.1,
        }
    }

    /// Resolves a loss by name with default parameters, failing fast on
    /// unknown names.
    pub fn from_name(name: &str) -> Result<LossKind, ConfigError> {
        match name {
            "cross_entropy" => Ok(LossKind::CrossEntropy),
            "focal" => Ok(LossKind::focal_default()),
            "label_smoothing" => Ok(LossKind::LabelSmoothing { smoothing: 0.1 }),
            "combined" => Ok(LossKind::combined_default()),
            other => Err(ConfigError::Unsupported {
                what: "loss",
                name: other.to_string(),
            }),
        }
    }

    /// Computes the mean loss over a batch.
    ///
    /// `logits` has shape (batch, num_classes); `targets` is a u32 class
    /// index vector of shape (batch,).
    pub fn compute(&self, logits: &Tensor, targets: &Tensor, num_classes: usize) -> PsResult<Tensor> {
        match *self {
            LossKind::CrossEntropy => Ok(loss::cross_entropy(logits, targets)?),
            LossKind::Focal { alpha, gamma } => focal_loss(logits, targets, alpha, gamma),
            LossKind::LabelSmoothing { smoothing } => {
                label_smoothing_loss(logits, targets, smoothing, num_classes)
            }
            LossKind::Combined {
                focal_weight,
                smoothing_weight,
                alpha,
                gamma,
                smoothing,
            } => {
                let focal = focal_loss(logits, targets, alpha, gamma)?;
                let smooth = label_smoothing_loss(logits, targets, smoothing, num_classes)?;
                Ok(focal
                    .affine(focal_weight, 0.0)?
                    .add(&smooth.affine(smoothing_weight, 0.0)?)?)
            }
        }
    }
}

fn focal_loss(logits: &Tensor, targets: &Tensor, alpha: f64, gamma: f64) -> PsResult<Tensor> {
    let log_probs = log_softmax(logits, D::Minus1)?;
    let ids = targets.unsqueeze(D::Minus1)?;
    // per-sample cross-entropy: -log p_t
    let ce = log_probs.gather(&ids, D::Minus1)?.squeeze(D::Minus1)?.neg()?;
    let pt = ce.neg()?.exp()?;
    // (1 - pt)^gamma modulation
    let modulation = pt.affine(-1.0, 1.0)?.powf(gamma)?;
    let focal = modulation.mul(&ce)?.affine(alpha, 0.0)?;
    Ok(focal.mean_all()?)
}

fn label_smoothing_loss(
    logits: &Tensor,
    targets: &Tensor,
    smoothing: f64,
    num_classes: usize,
) -> PsResult<Tensor> {
    let log_probs = log_softmax(logits, D::Minus1)?;
    let confidence = (1.0 - smoothing) as f32;
    let off_value = (smoothing / (num_classes.saturating_sub(1).max(1)) as f64) as f32;
    let true_dist = one_hot(targets.clone(), num_classes, confidence, off_value)?;
    let per_sample = true_dist.mul(&log_probs)?.sum(D::Minus1)?.neg()?;
    Ok(per_sample.mean_all()?)
}
