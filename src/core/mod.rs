//! Core building blocks of the pipeline.
//!
//! Error handling, configuration, batch sampling, and the classifier
//! contract shared between training and inference.

pub mod batch;
pub mod config;
pub mod errors;

pub use batch::{BatchData, BatchSampler, Tensor2D, Tensor4D};
pub use config::{Backbone, ClassConfig, ConfigError, ConfigValidator, PredictorConfig};
pub use errors::{PathologyError, ProcessingStage, PsResult};

/// Contract the prediction engine requires of a classifier.
///
/// A classifier maps a normalized image tensor batch to one logits row per
/// image. Implementations must be deterministic in inference mode and safe to
/// share across threads: a loaded model is immutable, and any scratch state
/// is call-local.
pub trait Classifier: Send + Sync {
    /// Runs the model over a (batch, 3, h, w) tensor and returns
    /// (batch, num_classes) logits.
    fn forward_logits(&self, batch: &Tensor4D) -> PsResult<Tensor2D>;

    /// Total number of trainable parameters, for reporting purposes.
    fn num_parameters(&self) -> usize;

    /// Architecture identifier, for reporting purposes.
    fn architecture(&self) -> &str;
}

/// Initializes the tracing subscriber for logging.
///
/// Sets up the subscriber with an environment filter and formatting layer.
/// Typically called once at the start of an application.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
