//! Image normalization.
//!
//! Canonicalizes RGB images into fixed-size CHW float tensors using
//! per-channel mean/std normalization. The scale and std are folded into a
//! single multiplier per channel (alpha = scale / std, beta = -mean / std) so
//! each pixel costs one multiply-add.

use image::{RgbImage, imageops};
use ndarray::Array4;
use rayon::prelude::*;

use crate::core::{PathologyError, PsResult, Tensor4D};

/// ImageNet per-channel means, the fixed normalization constants for all
/// backbones.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet per-channel standard deviations.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Normalizes RGB images into CHW float tensors.
#[derive(Debug, Clone)]
pub struct NormalizeImage {
    /// Per-channel multiplier (scale / std).
    alpha: [f32; 3],
    /// Per-channel offset (-mean / std).
    beta: [f32; 3],
}

impl NormalizeImage {
    /// Creates a normalizer with the given parameters.
    ///
    /// # Arguments
    ///
    /// * `scale` - Scaling factor applied before mean/std (defaults to 1/255)
    /// * `mean` - Per-channel means (defaults to ImageNet)
    /// * `std` - Per-channel standard deviations (defaults to ImageNet)
    ///
    /// # Errors
    ///
    /// Fails when the scale is non-positive or any standard deviation is
    /// non-positive or non-finite.
    pub fn new(
        scale: Option<f32>,
        mean: Option<[f32; 3]>,
        std: Option<[f32; 3]>,
    ) -> PsResult<Self> {
        let scale = scale.unwrap_or(1.0 / 255.0);
        let mean = mean.unwrap_or(IMAGENET_MEAN);
        let std = std.unwrap_or(IMAGENET_STD);

        if scale <= 0.0 || !scale.is_finite() {
            return Err(PathologyError::invalid_input(format!(
                "scale must be greater than 0, got {scale}"
            )));
        }
        for (i, &s) in std.iter().enumerate() {
            if s <= 0.0 || !s.is_finite() {
                return Err(PathologyError::invalid_input(format!(
                    "standard deviation at index {i} must be greater than 0, got {s}"
                )));
            }
        }

        let mut alpha = [0.0f32; 3];
        let mut beta = [0.0f32; 3];
        for c in 0..3 {
            alpha[c] = scale / std[c];
            beta[c] = -mean[c] / std[c];
        }
        Ok(Self { alpha, beta })
    }

    /// The standard ImageNet normalizer used by every backbone in this crate.
    pub fn imagenet() -> Self {
        let mut alpha = [0.0f32; 3];
        let mut beta = [0.0f32; 3];
        for c in 0..3 {
            alpha[c] = (1.0 / 255.0) / IMAGENET_STD[c];
            beta[c] = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
        }
        Self { alpha, beta }
    }

    /// Normalizes a single image into a (1, 3, h, w) tensor.
    pub fn normalize_to(&self, img: &RgbImage) -> PsResult<Tensor4D> {
        let (width, height) = img.dimensions();
        let mut data = vec![0.0f32; 3 * (height * width) as usize];
        self.fill_chw(img, &mut data);
        Array4::from_shape_vec((1, 3, height as usize, width as usize), data)
            .map_err(PathologyError::from)
    }

    /// Normalizes a batch of same-sized images into a (n, 3, h, w) tensor.
    ///
    /// # Errors
    ///
    /// Fails when the batch is empty or the images do not all share the same
    /// dimensions.
    pub fn normalize_batch_to(&self, imgs: &[RgbImage]) -> PsResult<Tensor4D> {
        let first = imgs.first().ok_or_else(|| {
            PathologyError::invalid_input("cannot normalize an empty image batch")
        })?;
        let (width, height) = first.dimensions();
        for (i, img) in imgs.iter().enumerate() {
            if img.dimensions() != (width, height) {
                return Err(PathologyError::invalid_input(format!(
                    "all images in batch must share dimensions; image 0 is {width}x{height}, \
                     image {i} is {}x{}",
                    img.width(),
                    img.height()
                )));
            }
        }

        let img_size = 3 * (height * width) as usize;
        let mut data = vec![0.0f32; imgs.len() * img_size];
        if imgs.len() == 1 {
            // rayon overhead is not worth it for a single image
            self.fill_chw(first, &mut data);
        } else {
            data.par_chunks_mut(img_size)
                .zip(imgs.par_iter())
                .for_each(|(chunk, img)| self.fill_chw(img, chunk));
        }
        Array4::from_shape_vec(
            (imgs.len(), 3, height as usize, width as usize),
            data,
        )
        .map_err(PathologyError::from)
    }

    fn fill_chw(&self, img: &RgbImage, out: &mut [f32]) {
        let (width, height) = img.dimensions();
        let plane = (height * width) as usize;
        for (y, row) in img.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                let offset = y * width as usize + x;
                for c in 0..3 {
                    out[c * plane + offset] = pixel.0[c] as f32 * self.alpha[c] + self.beta[c];
                }
            }
        }
    }
}

/// Deterministically resizes an image to a square of the given side length.
///
/// Uses Lanczos3 resampling. No-op when the image already has the target
/// size.
pub fn resize_to_square(img: &RgbImage, size: u32) -> RgbImage {
    if img.dimensions() == (size, size) {
        return img.clone();
    }
    imageops::resize(img, size, size, imageops::FilterType::Lanczos3)
}
