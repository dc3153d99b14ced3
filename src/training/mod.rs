//! Dataset loading, evaluation metrics, and the training loop.

pub mod dataset;
pub mod metrics;
pub mod trainer;

pub use dataset::{PathologyDataset, Sample, TrainBatch};
pub use metrics::{AucOutcome, ClassificationMetrics, MetricsCalculator, PerClassMetrics};
pub use trainer::{EpochRecord, Trainer, TrainingConfig, TrainingHistory};
