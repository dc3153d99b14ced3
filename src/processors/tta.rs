//! Test-time augmentation variants.
//!
//! Inference uses one deterministic transform; the optional TTA mode runs
//! exactly four deterministic variants of the same image and averages the
//! resulting probability vectors. No randomness is involved.

use image::{RgbImage, imageops};

use crate::core::{PathologyError, PsResult};

/// The four deterministic TTA transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtaVariant {
    /// The untransformed image.
    Identity,
    /// Horizontal mirror.
    FlipHorizontal,
    /// Vertical mirror.
    FlipVertical,
    /// 90 degree clockwise rotation.
    Rotate90,
}

impl TtaVariant {
    /// All variants, in the order they are averaged.
    pub const ALL: [TtaVariant; 4] = [
        TtaVariant::Identity,
        TtaVariant::FlipHorizontal,
        TtaVariant::FlipVertical,
        TtaVariant::Rotate90,
    ];

    /// Applies the transform. Pure and deterministic.
    pub fn apply(self, img: &RgbImage) -> RgbImage {
        match self {
            TtaVariant::Identity => img.clone(),
            TtaVariant::FlipHorizontal => imageops::flip_horizontal(img),
            TtaVariant::FlipVertical => imageops::flip_vertical(img),
            TtaVariant::Rotate90 => imageops::rotate90(img),
        }
    }

    /// Applies all variants to a square image, yielding the four views in
    /// [`TtaVariant::ALL`] order.
    pub fn expand(img: &RgbImage) -> Vec<RgbImage> {
        Self::ALL.iter().map(|v| v.apply(img)).collect()
    }
}

/// Element-wise arithmetic mean of probability vectors from multiple runs.
///
/// # Errors
///
/// Fails when `runs` is empty or the vectors disagree in length.
pub fn average_probabilities(runs: &[Vec<f32>]) -> PsResult<Vec<f32>> {
    let first = runs
        .first()
        .ok_or_else(|| PathologyError::invalid_input("no probability vectors to average"))?;
    let len = first.len();
    for (i, run) in runs.iter().enumerate() {
        if run.len() != len {
            return Err(PathologyError::invalid_input(format!(
                "probability vector {i} has length {} but expected {len}",
                run.len()
            )));
        }
    }

    let mut mean = vec![0.0f32; len];
    for run in runs {
        for (m, &p) in mean.iter_mut().zip(run.iter()) {
            *m += p;
        }
    }
    let n = runs.len() as f32;
    for m in &mut mean {
        *m /= n;
    }
    Ok(mean)
}
