//! Error types for the classification and reporting pipeline.
//!
//! This module defines the error taxonomy used throughout the crate: image
//! decoding failures, processing errors with stage context, inference errors,
//! checkpoint/model lifecycle errors, and configuration errors. It also
//! provides helper constructors for building errors with appropriate context.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::config::ConfigError;

/// Stage of the pipeline in which a processing error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Error occurred while decoding an input image.
    Decode,
    /// Error occurred during image normalization.
    Normalization,
    /// Error occurred during image resizing.
    Resize,
    /// Error occurred during tensor operations.
    TensorOperation,
    /// Error occurred during batch processing.
    BatchProcessing,
    /// Error occurred while assembling a diagnosis report.
    ReportAssembly,
    /// Generic processing error.
    Generic,
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStage::Decode => write!(f, "decode"),
            ProcessingStage::Normalization => write!(f, "normalization"),
            ProcessingStage::Resize => write!(f, "resize"),
            ProcessingStage::TensorOperation => write!(f, "tensor operation"),
            ProcessingStage::BatchProcessing => write!(f, "batch processing"),
            ProcessingStage::ReportAssembly => write!(f, "report assembly"),
            ProcessingStage::Generic => write!(f, "processing"),
        }
    }
}

/// Errors that can occur in the classification and reporting pipeline.
#[derive(Error, Debug)]
pub enum PathologyError {
    /// The input bytes could not be decoded into an image. Unrecoverable for
    /// that single image; callers must skip it rather than abort a batch.
    #[error("image decode")]
    ImageDecode(#[source] image::ImageError),

    /// Error during a processing stage, with context about where it happened.
    #[error("{stage} failed: {context}")]
    Processing {
        /// The stage of the pipeline where the error occurred.
        stage: ProcessingStage,
        /// Additional context about the error.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during a single prediction, wrapping the numeric backend failure.
    #[error("inference")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The model could not be loaded. Fatal at startup; prediction must not
    /// be served until resolved.
    #[error("model load: {message}")]
    ModelLoad {
        /// A message describing why the load failed.
        message: String,
    },

    /// No usable checkpoint was found under the given directory.
    #[error("no checkpoint found under {searched}")]
    CheckpointNotFound {
        /// The directory that was searched.
        searched: PathBuf,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error indicating a configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Error from tensor shape operations.
    #[error("tensor shape")]
    Tensor(#[from] ndarray::ShapeError),

    /// Error from the candle numeric backend.
    #[error("candle")]
    Candle(#[from] candle_core::Error),

    /// Error serializing or deserializing JSON.
    #[error("json")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl PathologyError {
    /// Creates a processing error for the given stage with context.
    pub fn processing<E>(stage: ProcessingStage, context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PathologyError::Processing {
            stage,
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Creates an inference error wrapping a backend failure.
    pub fn inference<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PathologyError::Inference(Box::new(source))
    }

    /// Creates an invalid-input error from a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        PathologyError::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a model-load error from a message.
    pub fn model_load(message: impl Into<String>) -> Self {
        PathologyError::ModelLoad {
            message: message.into(),
        }
    }

    /// Creates a batch-item error identifying which item of a batch failed.
    pub fn batch_item<E>(item_index: usize, total: usize, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        PathologyError::Processing {
            stage: ProcessingStage::BatchProcessing,
            context: format!("item {}/{} failed", item_index + 1, total),
            source: Box::new(source),
        }
    }
}

/// Convenient result alias for pipeline operations.
pub type PsResult<T> = Result<T, PathologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_error_carries_stage_and_context() {
        let err = PathologyError::processing(
            ProcessingStage::Normalization,
            "mean/std mismatch",
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad"),
        );
        let msg = err.to_string();
        assert!(msg.contains("normalization"));
        assert!(msg.contains("mean/std mismatch"));
    }

    #[test]
    fn batch_item_error_is_one_based() {
        let err = PathologyError::batch_item(
            2,
            5,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "boom"),
        );
        assert!(err.to_string().contains("item 3/5"));
    }
}
