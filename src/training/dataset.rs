//! Dataset loading for training.
//!
//! Samples are discovered from a directory tree with one subdirectory per
//! class display name. Missing class directories and undecodable files are
//! logged and skipped rather than failing the whole load.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::core::{BatchSampler, ClassConfig, PathologyError, PsResult, Tensor4D};
use crate::processors::{ImageInput, NormalizeImage, decode_image, resize_to_square};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// One labelled training sample on disk.
#[derive(Debug, Clone)]
pub struct Sample {
    pub path: PathBuf,
    /// Canonical class index.
    pub label: u32,
}

/// A materialized training batch.
#[derive(Debug, Clone)]
pub struct TrainBatch {
    /// Normalized (batch, 3, size, size) image tensor.
    pub images: Tensor4D,
    /// Class indexes, aligned with the batch axis.
    pub labels: Vec<u32>,
}

/// A labelled set of histopathology images.
#[derive(Debug, Clone)]
pub struct PathologyDataset {
    samples: Vec<Sample>,
    classes: Arc<ClassConfig>,
}

impl PathologyDataset {
    /// Scans `root` for one subdirectory per class display name.
    ///
    /// Classes without a directory are skipped with a warning so a partial
    /// dataset can still be trained on.
    pub fn from_directory(root: &Path, classes: Arc<ClassConfig>) -> PsResult<Self> {
        let mut samples = Vec::new();
        for (index, class) in classes.classes().iter().enumerate() {
            let dir = root.join(class.display_name());
            if !dir.is_dir() {
                warn!(class = class.display_name(), dir = %dir.display(), "class directory missing, skipping");
                continue;
            }
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                let is_image = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
                if is_image {
                    samples.push(Sample {
                        path,
                        label: index as u32,
                    });
                }
            }
        }
        if samples.is_empty() {
            return Err(PathologyError::invalid_input(format!(
                "no image samples found under {}",
                root.display()
            )));
        }
        info!(samples = samples.len(), root = %root.display(), "dataset loaded");
        Ok(Self { samples, classes })
    }

    /// Builds a dataset from pre-collected samples.
    pub fn from_samples(samples: Vec<Sample>, classes: Arc<ClassConfig>) -> Self {
        Self { samples, classes }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Splits into (train, validation) with a seeded shuffle, so the same
    /// seed always produces the same split.
    pub fn split(&self, val_fraction: f32, seed: u64) -> PsResult<(Self, Self)> {
        if !(0.0..1.0).contains(&val_fraction) {
            return Err(PathologyError::invalid_input(format!(
                "val_fraction must be in [0, 1), got {val_fraction}"
            )));
        }
        let mut shuffled = self.samples.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        shuffled.shuffle(&mut rng);

        let val_len = (shuffled.len() as f32 * val_fraction).round() as usize;
        let val = shuffled.split_off(shuffled.len() - val_len);
        Ok((
            Self::from_samples(shuffled, Arc::clone(&self.classes)),
            Self::from_samples(val, Arc::clone(&self.classes)),
        ))
    }

    /// Decodes, resizes, and normalizes the samples into training batches.
    ///
    /// Files that fail to decode are warned about and skipped; a batch whose
    /// samples all fail is dropped.
    pub fn load_batches(
        &self,
        batch_size: usize,
        input_size: u32,
        normalize: &NormalizeImage,
    ) -> PsResult<Vec<TrainBatch>> {
        let sampler = BatchSampler::new(batch_size);
        let mut batches = Vec::new();
        for batch in sampler.sample(self.samples.clone()) {
            let mut images = Vec::with_capacity(batch.len());
            let mut labels = Vec::with_capacity(batch.len());
            for sample in &batch.items {
                let bytes = match fs::read(&sample.path) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(path = %sample.path.display(), error = %e, "failed to read sample, skipping");
                        continue;
                    }
                };
                match decode_image(ImageInput::Bytes(bytes)) {
                    Ok(decoded) => {
                        images.push(resize_to_square(&decoded.image, input_size));
                        labels.push(sample.label);
                    }
                    Err(e) => {
                        warn!(path = %sample.path.display(), error = %e, "failed to decode sample, skipping");
                    }
                }
            }
            if images.is_empty() {
                continue;
            }
            batches.push(TrainBatch {
                images: normalize.normalize_batch_to(&images)?,
                labels,
            });
        }
        Ok(batches)
    }
}
