//! Model lifecycle management.
//!
//! Persists trained weights as safetensors files with a JSON metadata
//! sidecar, and maintains `latest` / `best` pointer files. All writes go
//! through a temp path followed by a rename, so an interrupted save can never
//! corrupt the pointers a service loads at startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{PathologyError, PsResult};
use crate::models::cnn::CnnConfig;

/// Metadata persisted next to every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Training epoch the checkpoint was taken at.
    pub epoch: usize,
    /// Validation metrics at save time.
    pub metrics: HashMap<String, f64>,
    /// Architecture configuration needed to rebuild the model.
    pub model_config: CnnConfig,
    /// Ordered class display names the model was trained against.
    pub classes: Vec<String>,
    /// When the checkpoint was written.
    pub timestamp: DateTime<Utc>,
}

/// Manages checkpoint storage under a models directory.
#[derive(Debug, Clone)]
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Creates a manager rooted at `models_dir`, creating the directory if
    /// needed.
    pub fn new(models_dir: impl Into<PathBuf>) -> PsResult<Self> {
        let models_dir = models_dir.into();
        fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    /// Path of the `best` weights pointer.
    pub fn best_path(&self) -> PathBuf {
        self.models_dir.join("best_model.safetensors")
    }

    /// Path of the `latest` weights pointer.
    pub fn latest_path(&self) -> PathBuf {
        self.models_dir.join("latest_model.safetensors")
    }

    fn metadata_path(weights: &Path) -> PathBuf {
        weights.with_extension("json")
    }

    /// Saves the weights and metadata, updating the `latest` pointer and,
    /// when `is_best`, the `best` pointer.
    ///
    /// Returns the path of the epoch-stamped checkpoint file.
    pub fn save(
        &self,
        varmap: &VarMap,
        metadata: &CheckpointMetadata,
        is_best: bool,
    ) -> PsResult<PathBuf> {
        let stamp = metadata.timestamp.format("%Y%m%d_%H%M%S");
        let filename = format!("model_epoch{}_{stamp}.safetensors", metadata.epoch);
        let weights_path = self.models_dir.join(filename);

        self.write_weights(varmap, &weights_path)?;
        self.write_metadata(metadata, &Self::metadata_path(&weights_path))?;

        self.promote(&weights_path, &self.latest_path(), metadata)?;
        if is_best {
            self.promote(&weights_path, &self.best_path(), metadata)?;
            info!(path = %self.best_path().display(), epoch = metadata.epoch, "updated best checkpoint");
        }
        debug!(path = %weights_path.display(), "checkpoint saved");
        Ok(weights_path)
    }

    /// Loads weights into `varmap` and returns the checkpoint metadata.
    ///
    /// Resolution order: an explicit `path` wins; otherwise the `best`
    /// pointer when `prefer_best` is set and present; otherwise the `latest`
    /// pointer.
    ///
    /// # Errors
    ///
    /// Returns [`PathologyError::CheckpointNotFound`] when no candidate file
    /// exists, and [`PathologyError::ModelLoad`] when a candidate exists but
    /// cannot be read.
    pub fn load(
        &self,
        varmap: &mut VarMap,
        path: Option<&Path>,
        prefer_best: bool,
    ) -> PsResult<CheckpointMetadata> {
        let weights_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let best = self.best_path();
                let latest = self.latest_path();
                if prefer_best && best.exists() {
                    best
                } else if latest.exists() {
                    latest
                } else {
                    return Err(PathologyError::CheckpointNotFound {
                        searched: self.models_dir.clone(),
                    });
                }
            }
        };
        if !weights_path.exists() {
            return Err(PathologyError::CheckpointNotFound {
                searched: weights_path,
            });
        }

        let metadata = self.read_metadata(&Self::metadata_path(&weights_path))?;
        varmap.load(&weights_path).map_err(|e| {
            PathologyError::model_load(format!(
                "failed to load weights from {}: {e}",
                weights_path.display()
            ))
        })?;
        info!(path = %weights_path.display(), epoch = metadata.epoch, "checkpoint loaded");
        Ok(metadata)
    }

    fn write_weights(&self, varmap: &VarMap, dest: &Path) -> PsResult<()> {
        let tmp = dest.with_extension("safetensors.tmp");
        varmap.save(&tmp).map_err(|e| {
            PathologyError::model_load(format!("failed to write weights to {}: {e}", tmp.display()))
        })?;
        fs::rename(&tmp, dest)?;
        Ok(())
    }

    fn write_metadata(&self, metadata: &CheckpointMetadata, dest: &Path) -> PsResult<()> {
        let tmp = dest.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(metadata)?)?;
        fs::rename(&tmp, dest)?;
        Ok(())
    }

    fn read_metadata(&self, path: &Path) -> PsResult<CheckpointMetadata> {
        let bytes = fs::read(path).map_err(|e| {
            PathologyError::model_load(format!(
                "failed to read checkpoint metadata {}: {e}",
                path.display()
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    // Pointer updates are copy-to-temp + rename so a crash mid-copy leaves
    // the previous pointer intact.
    fn promote(&self, src: &Path, dest: &Path, metadata: &CheckpointMetadata) -> PsResult<()> {
        let tmp = dest.with_extension("safetensors.tmp");
        fs::copy(src, &tmp)?;
        fs::rename(&tmp, dest)?;
        self.write_metadata(metadata, &Self::metadata_path(dest))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ClassConfig;
    use crate::models::cnn::PathologyCnn;
    use candle_core::Device;

    fn metadata(epoch: usize, f1: f64) -> CheckpointMetadata {
        let mut metrics = HashMap::new();
        metrics.insert("macro_f1".to_string(), f1);
        CheckpointMetadata {
            epoch,
            metrics,
            model_config: CnnConfig::default(),
            classes: ClassConfig::with_defaults().display_names(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn save_then_load_round_trips_metadata_and_weights() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();

        let varmap = VarMap::new();
        let _model = PathologyCnn::new(&CnnConfig::default(), &varmap, &Device::Cpu).unwrap();
        manager.save(&varmap, &metadata(3, 0.81), true).unwrap();

        let mut fresh = VarMap::new();
        let _fresh_model =
            PathologyCnn::new(&CnnConfig::default(), &fresh, &Device::Cpu).unwrap();
        let loaded = manager.load(&mut fresh, None, true).unwrap();
        assert_eq!(loaded.epoch, 3);
        assert_eq!(loaded.metrics["macro_f1"], 0.81);
        assert_eq!(loaded.classes.len(), 15);
    }

    #[test]
    fn prefer_best_falls_back_to_latest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();

        let varmap = VarMap::new();
        let _model = PathologyCnn::new(&CnnConfig::default(), &varmap, &Device::Cpu).unwrap();
        // not best: only the latest pointer is written
        manager.save(&varmap, &metadata(1, 0.4), false).unwrap();
        assert!(!manager.best_path().exists());

        let mut fresh = VarMap::new();
        let _fresh_model =
            PathologyCnn::new(&CnnConfig::default(), &fresh, &Device::Cpu).unwrap();
        let loaded = manager.load(&mut fresh, None, true).unwrap();
        assert_eq!(loaded.epoch, 1);
    }

    #[test]
    fn missing_checkpoint_is_a_dedicated_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();
        let mut varmap = VarMap::new();
        let err = manager.load(&mut varmap, None, true).unwrap_err();
        assert!(matches!(err, PathologyError::CheckpointNotFound { .. }));
    }

    #[test]
    fn no_temp_files_remain_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(dir.path()).unwrap();
        let varmap = VarMap::new();
        let _model = PathologyCnn::new(&CnnConfig::default(), &varmap, &Device::Cpu).unwrap();
        manager.save(&varmap, &metadata(2, 0.5), true).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "tmp")
                    .unwrap_or(false)
            })
            .collect();
        assert!(leftovers.is_empty());
    }
}
