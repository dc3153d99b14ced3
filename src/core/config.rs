//! Configuration types for the pipeline.
//!
//! Class/label configuration, predictor settings, and the closed
//! architecture/loss variants. All configuration is resolved and validated
//! once at startup and then passed by reference into the components that need
//! it; nothing reads ambient global state. Invalid variant names fail fast
//! here, not at first use.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{NUM_CLASSES, PathologyClass};

/// Errors that can occur during configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A batch size must be greater than 0.
    #[error("batch size must be greater than 0")]
    InvalidBatchSize,

    /// The class list did not contain exactly the expected number of classes.
    #[error("class configuration must contain exactly {expected} classes, got {actual}")]
    InvalidClassCount { expected: usize, actual: usize },

    /// A named variant (backbone, loss) is not supported.
    #[error("unsupported {what}: {name:?}")]
    Unsupported { what: &'static str, name: String },

    /// A configuration value is out of range or otherwise invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// A trait for validating configuration parameters.
///
/// Provides shared helpers for the checks configuration types need, such as
/// positive counts, probabilities, and image dimensions.
pub trait ConfigValidator {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Validates that a count is greater than zero.
    fn validate_positive_usize(&self, value: usize, field: &str) -> Result<(), ConfigError> {
        if value == 0 {
            Err(ConfigError::InvalidConfig {
                message: format!("{field} must be greater than 0"),
            })
        } else {
            Ok(())
        }
    }

    /// Validates that a value is a probability in `[0, 1]`.
    fn validate_probability(&self, value: f32, field: &str) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&value) || !value.is_finite() {
            Err(ConfigError::InvalidConfig {
                message: format!("{field} must be within [0, 1], got {value}"),
            })
        } else {
            Ok(())
        }
    }

    /// Validates image dimensions.
    fn validate_image_dimensions(&self, width: u32, height: u32) -> Result<(), ConfigError> {
        if width == 0 || height == 0 {
            Err(ConfigError::InvalidConfig {
                message: format!("image dimensions must be non-zero, got {width}x{height}"),
            })
        } else {
            Ok(())
        }
    }
}

/// Ordered class/label configuration, supplied once at process start and
/// immutable thereafter.
///
/// Holds the canonical class ordering plus per-class textual descriptions.
/// Descriptions default to the built-in clinical text but can be overridden,
/// for example when a deployment ships revised wording.
#[derive(Debug, Clone)]
pub struct ClassConfig {
    classes: Vec<PathologyClass>,
    descriptions: HashMap<PathologyClass, String>,
}

impl ClassConfig {
    /// Builds the default configuration: canonical ordering, built-in
    /// descriptions.
    pub fn with_defaults() -> Self {
        let descriptions = PathologyClass::ALL
            .iter()
            .map(|c| (*c, c.default_description().to_string()))
            .collect();
        Self {
            classes: PathologyClass::ALL.to_vec(),
            descriptions,
        }
    }

    /// Builds a configuration from an explicit ordering and description map.
    ///
    /// # Errors
    ///
    /// Fails if the ordering does not contain exactly the fifteen known
    /// classes without duplicates.
    pub fn new(
        classes: Vec<PathologyClass>,
        descriptions: HashMap<PathologyClass, String>,
    ) -> Result<Self, ConfigError> {
        if classes.len() != NUM_CLASSES {
            return Err(ConfigError::InvalidClassCount {
                expected: NUM_CLASSES,
                actual: classes.len(),
            });
        }
        let mut seen = classes.clone();
        seen.sort_by_key(|c| c.index());
        seen.dedup();
        if seen.len() != NUM_CLASSES {
            return Err(ConfigError::InvalidConfig {
                message: "class configuration contains duplicate classes".to_string(),
            });
        }
        Ok(Self {
            classes,
            descriptions,
        })
    }

    /// Number of classes. Always 15.
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// The ordered class list.
    pub fn classes(&self) -> &[PathologyClass] {
        &self.classes
    }

    /// Class at the given model-output index.
    pub fn class_at(&self, index: usize) -> Option<PathologyClass> {
        self.classes.get(index).copied()
    }

    /// Description for a class; empty when no description is configured.
    pub fn description(&self, class: PathologyClass) -> &str {
        self.descriptions
            .get(&class)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Display names in model-output order.
    pub fn display_names(&self) -> Vec<String> {
        self.classes
            .iter()
            .map(|c| c.display_name().to_string())
            .collect()
    }

    /// Wraps the configuration for shared, read-only use.
    pub fn into_shared(self) -> Arc<ClassConfig> {
        Arc::new(self)
    }
}

/// Settings for the prediction engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Confidence threshold used for the `threshold_met` flag.
    pub confidence_threshold: f32,
    /// Square input size fed to the classifier. Fixed for the lifetime of a
    /// loaded model.
    pub input_size: u32,
    /// Default batch size for `predict_batch`.
    pub batch_size: usize,
    /// Number of ranked predictions to return.
    pub topk: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            input_size: 224,
            batch_size: 8,
            topk: 5,
        }
    }
}

impl ConfigValidator for PredictorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_probability(self.confidence_threshold, "confidence_threshold")?;
        self.validate_image_dimensions(self.input_size, self.input_size)?;
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        self.validate_positive_usize(self.topk, "topk")?;
        Ok(())
    }
}

/// Classifier backbone variants. A closed set, resolved once at
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backbone {
    /// Four conv blocks, 32-256 channels. Suitable for 224px inputs on CPU.
    Compact,
    /// Four conv blocks, 64-512 channels. Higher capacity variant.
    Deep,
}

impl Backbone {
    /// Resolves a backbone by name, failing fast on unknown names.
    pub fn from_name(name: &str) -> Result<Backbone, ConfigError> {
        match name {
            "compact" => Ok(Backbone::Compact),
            "deep" => Ok(Backbone::Deep),
            other => Err(ConfigError::Unsupported {
                what: "backbone",
                name: other.to_string(),
            }),
        }
    }

    /// Architecture identifier used in checkpoints and model info.
    pub fn name(self) -> &'static str {
        match self {
            Backbone::Compact => "compact",
            Backbone::Deep => "deep",
        }
    }

    /// Output channel widths of the four conv blocks.
    pub fn block_widths(self) -> [usize; 4] {
        match self {
            Backbone::Compact => [32, 64, 128, 256],
            Backbone::Deep => [64, 128, 256, 512],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_class_config_has_fifteen_ordered_classes() {
        let config = ClassConfig::with_defaults();
        assert_eq!(config.num_classes(), NUM_CLASSES);
        assert_eq!(config.class_at(0), Some(PathologyClass::PulmonaryHemorrhage));
        assert_eq!(config.class_at(14), Some(PathologyClass::Pancreatitis));
        assert_eq!(config.class_at(15), None);
        assert!(!config.description(PathologyClass::Pneumonia).is_empty());
    }

    #[test]
    fn class_config_rejects_wrong_count() {
        let err = ClassConfig::new(vec![PathologyClass::Pneumonia], HashMap::new());
        assert!(matches!(
            err,
            Err(ConfigError::InvalidClassCount {
                expected: 15,
                actual: 1
            })
        ));
    }

    #[test]
    fn class_config_rejects_duplicates() {
        let mut classes = PathologyClass::ALL.to_vec();
        classes[1] = classes[0];
        assert!(ClassConfig::new(classes, HashMap::new()).is_err());
    }

    #[test]
    fn predictor_config_validates_ranges() {
        assert!(PredictorConfig::default().validate().is_ok());

        let bad_threshold = PredictorConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());

        let bad_batch = PredictorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            bad_batch.validate(),
            Err(ConfigError::InvalidBatchSize)
        ));
    }

    #[test]
    fn backbone_resolution_fails_fast() {
        assert_eq!(Backbone::from_name("compact").unwrap(), Backbone::Compact);
        assert_eq!(Backbone::from_name("deep").unwrap(), Backbone::Deep);
        assert!(matches!(
            Backbone::from_name("resnet50"),
            Err(ConfigError::Unsupported { what: "backbone", .. })
        ));
    }
}
