//! Model architecture, training losses, and checkpoint management.

pub mod cnn;
pub mod losses;
pub mod manager;

pub use cnn::{CnnConfig, PathologyCnn, tensor4_to_candle};
pub use losses::LossKind;
pub use manager::{CheckpointMetadata, ModelManager};
