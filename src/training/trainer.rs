//! Supervised training loop.
//!
//! AdamW optimization with plateau-based learning-rate reduction, early
//! stopping on validation macro-F1, and per-epoch checkpointing through the
//! model manager. The trainer owns the mutable parameter set; inference code
//! loads an immutable copy from a promoted checkpoint instead of sharing it.

use std::sync::Arc;

use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{ClassConfig, ConfigError, ConfigValidator, PathologyError, PsResult};
use crate::inference::predictor::softmax_rows;
use crate::models::{
    CheckpointMetadata, CnnConfig, LossKind, ModelManager, PathologyCnn, tensor4_to_candle,
};
use crate::training::dataset::TrainBatch;
use crate::training::metrics::{AucOutcome, ClassificationMetrics, MetricsCalculator};

/// Hyperparameters of a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub epochs: usize,
    /// Epochs without macro-F1 improvement before training stops.
    pub early_stopping_patience: usize,
    /// Epochs without improvement before the learning rate is reduced.
    pub lr_patience: usize,
    /// Multiplier applied to the learning rate on a plateau.
    pub lr_factor: f64,
    pub loss: LossKind,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 1e-4,
            epochs: 30,
            early_stopping_patience: 10,
            lr_patience: 5,
            lr_factor: 0.5,
            loss: LossKind::combined_default(),
        }
    }
}

impl ConfigValidator for TrainingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidConfig {
                message: format!("learning_rate must be positive, got {}", self.learning_rate),
            });
        }
        if !(0.0..1.0).contains(&self.lr_factor) || self.lr_factor == 0.0 {
            return Err(ConfigError::InvalidConfig {
                message: format!("lr_factor must be in (0, 1), got {}", self.lr_factor),
            });
        }
        self.validate_positive_usize(self.epochs, "epochs")?;
        self.validate_positive_usize(self.lr_patience, "lr_patience")?;
        Ok(())
    }
}

/// Per-epoch training record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_macro_f1: f64,
}

/// Outcome of a full training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: usize,
    pub best_macro_f1: f64,
}

/// Owns the trainable model and drives the epoch loop.
pub struct Trainer {
    model: PathologyCnn,
    varmap: VarMap,
    device: Device,
    config: TrainingConfig,
    cnn_config: CnnConfig,
    manager: ModelManager,
    metrics: MetricsCalculator,
    classes: Arc<ClassConfig>,
}

impl Trainer {
    /// Builds a fresh model and trainer.
    pub fn new(
        cnn_config: CnnConfig,
        config: TrainingConfig,
        classes: Arc<ClassConfig>,
        manager: ModelManager,
        device: Device,
    ) -> PsResult<Self> {
        config.validate()?;
        let varmap = VarMap::new();
        let model = PathologyCnn::new(&cnn_config, &varmap, &device)?;
        Ok(Self {
            model,
            varmap,
            device,
            config,
            cnn_config,
            manager,
            metrics: MetricsCalculator::new(classes.num_classes()),
            classes,
        })
    }

    /// Runs the training loop and returns the per-epoch history.
    ///
    /// Each epoch trains over `train`, evaluates over `val`, checkpoints
    /// through the manager (promoting `best` on a macro-F1 improvement),
    /// reduces the learning rate on a plateau, and stops early once the
    /// patience is exhausted.
    pub fn fit(&mut self, train: &[TrainBatch], val: &[TrainBatch]) -> PsResult<TrainingHistory> {
        if train.is_empty() || val.is_empty() {
            return Err(PathologyError::invalid_input(
                "training and validation sets must both be non-empty",
            ));
        }

        let mut optimizer = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: self.config.learning_rate,
                weight_decay: self.config.weight_decay,
                ..Default::default()
            },
        )?;
        let mut lr = self.config.learning_rate;
        let mut history = TrainingHistory {
            epochs: Vec::new(),
            best_epoch: 0,
            best_macro_f1: f64::NEG_INFINITY,
        };
        let mut epochs_without_improvement = 0usize;

        for epoch in 1..=self.config.epochs {
            let train_loss = self.train_epoch(&mut optimizer, train)?;
            let (val_loss, metrics) = self.validate(val)?;
            match &metrics.auc {
                AucOutcome::Value { auc } => info!(epoch, auc, "validation AUC"),
                AucOutcome::NotComputable { reason } => {
                    warn!(epoch, reason, "validation AUC not computable")
                }
            }

            let is_best = metrics.macro_f1 > history.best_macro_f1;
            if is_best {
                history.best_macro_f1 = metrics.macro_f1;
                history.best_epoch = epoch;
                epochs_without_improvement = 0;
            } else {
                epochs_without_improvement += 1;
            }

            let metadata = CheckpointMetadata {
                epoch,
                metrics: metrics.to_map(),
                model_config: self.cnn_config.clone(),
                classes: self.classes.display_names(),
                timestamp: Utc::now(),
            };
            self.manager.save(&self.varmap, &metadata, is_best)?;

            info!(
                epoch,
                train_loss,
                val_loss,
                accuracy = metrics.accuracy,
                macro_f1 = metrics.macro_f1,
                "epoch complete"
            );
            history.epochs.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                val_accuracy: metrics.accuracy,
                val_macro_f1: metrics.macro_f1,
            });

            if epochs_without_improvement >= self.config.early_stopping_patience {
                info!(epoch, "early stopping, validation macro-F1 plateaued");
                break;
            }
            if epochs_without_improvement > 0
                && epochs_without_improvement % self.config.lr_patience == 0
            {
                lr *= self.config.lr_factor;
                optimizer.set_learning_rate(lr);
                info!(lr, "reduced learning rate on plateau");
            }
        }
        Ok(history)
    }

    fn train_epoch(&self, optimizer: &mut AdamW, batches: &[TrainBatch]) -> PsResult<f64> {
        let mut total = 0.0;
        for batch in batches {
            let xs = tensor4_to_candle(&batch.images, &self.device)?;
            let ys = Tensor::from_vec(batch.labels.clone(), batch.labels.len(), &self.device)?;
            let logits = self.model.forward_t(&xs, true)?;
            let loss = self
                .config
                .loss
                .compute(&logits, &ys, self.classes.num_classes())?;
            optimizer.backward_step(&loss)?;
            total += loss.to_scalar::<f32>()? as f64;
        }
        Ok(total / batches.len() as f64)
    }

    fn validate(&self, batches: &[TrainBatch]) -> PsResult<(f64, ClassificationMetrics)> {
        let num_classes = self.classes.num_classes();
        let mut total_loss = 0.0;
        let mut y_true = Vec::new();
        let mut y_pred = Vec::new();
        let mut prob_rows: Vec<f32> = Vec::new();

        for batch in batches {
            let xs = tensor4_to_candle(&batch.images, &self.device)?;
            let ys = Tensor::from_vec(batch.labels.clone(), batch.labels.len(), &self.device)?;
            let logits = self.model.forward_t(&xs, false)?;
            let loss = self.config.loss.compute(&logits, &ys, num_classes)?;
            total_loss += loss.to_scalar::<f32>()? as f64;

            let rows = logits.to_vec2::<f32>()?;
            let flat: Vec<f32> = rows.into_iter().flatten().collect();
            let logits_nd = Array2::from_shape_vec((batch.labels.len(), num_classes), flat)?;
            for probs in softmax_rows(&logits_nd)? {
                let argmax = probs
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i as u32)
                    .unwrap_or(0);
                y_pred.push(argmax);
                prob_rows.extend(probs);
            }
            y_true.extend_from_slice(&batch.labels);
        }

        let probabilities = Array2::from_shape_vec((y_true.len(), num_classes), prob_rows)?;
        let metrics = self
            .metrics
            .compute(&y_true, &y_pred, Some(&probabilities))?;
        Ok((total_loss / batches.len() as f64, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Backbone;
    use crate::domain::NUM_CLASSES;
    use ndarray::Array4;

    fn tiny_batch(label: u32, value: f32) -> TrainBatch {
        TrainBatch {
            images: Array4::from_elem((2, 3, 16, 16), value),
            labels: vec![label, label],
        }
    }

    fn trainer(dir: &std::path::Path, epochs: usize) -> Trainer {
        let config = TrainingConfig {
            epochs,
            early_stopping_patience: 2,
            lr_patience: 1,
            loss: LossKind::CrossEntropy,
            ..TrainingConfig::default()
        };
        Trainer::new(
            CnnConfig {
                backbone: Backbone::Compact,
                num_classes: NUM_CLASSES,
                dropout_rate: 0.0,
            },
            config,
            ClassConfig::with_defaults().into_shared(),
            ModelManager::new(dir).unwrap(),
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn invalid_hyperparameters_fail_fast() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            learning_rate: 0.0,
            ..TrainingConfig::default()
        };
        let result = Trainer::new(
            CnnConfig::default(),
            config,
            ClassConfig::with_defaults().into_shared(),
            ModelManager::new(dir.path()).unwrap(),
            Device::Cpu,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_data_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path(), 1);
        assert!(trainer.fit(&[], &[tiny_batch(0, 0.1)]).is_err());
    }

    #[test]
    fn fit_records_epochs_and_writes_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = trainer(dir.path(), 2);
        let train = [tiny_batch(0, 0.2), tiny_batch(1, 0.8)];
        let val = [tiny_batch(0, 0.2), tiny_batch(1, 0.8)];

        let history = trainer.fit(&train, &val).unwrap();
        assert!(!history.epochs.is_empty());
        assert!(history.best_epoch >= 1);
        assert!(dir.path().join("latest_model.safetensors").exists());
        assert!(dir.path().join("best_model.safetensors").exists());
        for record in &history.epochs {
            assert!(record.train_loss.is_finite());
            assert!(record.val_loss.is_finite());
        }
    }
}
