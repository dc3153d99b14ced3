//! # PathoScan
//!
//! A Rust library that classifies histopathology images into fifteen
//! pathology categories and produces structured, clinically oriented
//! diagnosis reports.
//!
//! ## Features
//!
//! - Image decoding and canonicalization for bytes, pixel buffers, and
//!   decoded images
//! - ImageNet-normalized tensor preprocessing with optional test-time
//!   augmentation
//! - A candle-based convolutional classifier with selectable backbones
//! - Rule-driven diagnosis reports: severity and urgency, confidence-gap
//!   analysis, differential diagnosis, and quality-control scoring
//! - A supervised training loop with focal and label-smoothing losses,
//!   plateau learning-rate reduction, early stopping, and atomic
//!   checkpointing
//!
//! ## Modules
//!
//! * [`core`] - Error handling, configuration, batching, and the classifier
//!   contract
//! * [`domain`] - The fixed pathology class vocabulary and clinical levels
//! * [`processors`] - Image decoding, normalization, augmentation, ranking
//! * [`models`] - The CNN architecture, training losses, and checkpoints
//! * [`inference`] - The prediction engine and diagnosis report generator
//! * [`training`] - Dataset loading, metrics, and the training loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use candle_core::Device;
//! use candle_nn::VarMap;
//! use pathoscan::prelude::*;
//! use pathoscan::models::{CnnConfig, ModelManager, PathologyCnn};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let classes = ClassConfig::with_defaults().into_shared();
//!
//! // Load the best checkpoint and build the prediction engine.
//! let manager = ModelManager::new("models")?;
//! let mut varmap = VarMap::new();
//! let metadata = manager.load(&mut varmap, None, true)?;
//! let model = PathologyCnn::new(&metadata.model_config, &varmap, &Device::Cpu)?;
//!
//! let predictor = PathologyPredictor::new(
//!     Arc::new(model),
//!     Arc::clone(&classes),
//!     PredictorConfig::default(),
//! )?;
//! let generator = DiagnosisReportGenerator::new(classes);
//!
//! let bytes = std::fs::read("slide.png")?;
//! let prediction = predictor.predict(
//!     ImageInput::Bytes(bytes),
//!     PredictOptions { use_tta: true, return_probabilities: true },
//! )?;
//! let report = generator.generate(&prediction, None, None);
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod domain;
pub mod inference;
pub mod models;
pub mod processors;
pub mod training;

/// Prelude module for convenient imports.
///
/// Bring the essentials into scope with a single use statement:
///
/// ```rust
/// use pathoscan::prelude::*;
/// ```
///
/// Included items focus on the most common tasks: the prediction engine and
/// report generator, their configuration, image inputs, and the error types.
/// For training and checkpoint management, import from [`crate::training`]
/// and [`crate::models`] directly.
pub mod prelude {
    pub use crate::core::{ClassConfig, PathologyError, PredictorConfig, PsResult};
    pub use crate::domain::{PathologyClass, SeverityLevel, UrgencyLevel};
    pub use crate::inference::{
        DiagnosisReport, DiagnosisReportGenerator, PathologyPredictor, PredictOptions,
        PredictionResult, ReportOutcome,
    };
    pub use crate::processors::ImageInput;
}
