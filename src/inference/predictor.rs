//! The prediction engine.
//!
//! Runs the full single-image pipeline (decode, resize, normalize, forward,
//! softmax, ranking), an optional test-time-augmentation variant that
//! averages probabilities over four deterministic views, and a batch path
//! that isolates per-item failures and falls back to sequential processing
//! when a whole-batch forward pass fails.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{
    BatchSampler, ClassConfig, Classifier, ConfigValidator, PathologyError, PredictorConfig,
    PsResult, Tensor2D,
};
use crate::domain::PathologyClass;
use crate::processors::{
    DecodedImage, ImageInput, NormalizeImage, TtaVariant, average_probabilities, decode_image,
    resize_to_square, top_k,
};

/// Per-call prediction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PredictOptions {
    /// Average probabilities over four deterministic augmented views.
    pub use_tta: bool,
    /// Include the full probability vector in the result.
    pub return_probabilities: bool,
}

/// Qualitative confidence bucket of the top prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    VeryHigh,
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Buckets a confidence value. Boundaries are inclusive on the upper
    /// bucket: exactly 0.9 is very high, exactly 0.5 is medium.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.9 {
            ConfidenceLevel::VeryHigh
        } else if confidence >= 0.7 {
            ConfidenceLevel::High
        } else if confidence >= 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    /// Human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "very high",
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// How much weight a reader should give the automated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityLevel {
    Reliable,
    FairlyReliable,
    NeedsManualConfirmation,
}

impl ReliabilityLevel {
    /// Buckets a confidence value: reliable at 0.8 and above, fairly
    /// reliable at 0.6 and above, otherwise flagged for manual confirmation.
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.8 {
            ReliabilityLevel::Reliable
        } else if confidence >= 0.6 {
            ReliabilityLevel::FairlyReliable
        } else {
            ReliabilityLevel::NeedsManualConfirmation
        }
    }

    /// Human-readable label.
    pub fn as_str(self) -> &'static str {
        match self {
            ReliabilityLevel::Reliable => "reliable",
            ReliabilityLevel::FairlyReliable => "fairly reliable",
            ReliabilityLevel::NeedsManualConfirmation => "needs manual confirmation",
        }
    }
}

/// One entry of the ranked prediction list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopPrediction {
    /// Predicted class.
    pub class: PathologyClass,
    /// Softmax probability of this class.
    pub probability: f32,
    /// 1-based rank in descending probability order.
    pub rank: usize,
    /// Clinical description of the class.
    pub description: String,
}

/// The outcome of classifying a single image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    /// The most probable class.
    pub class: PathologyClass,
    /// Canonical index of the most probable class.
    pub class_index: usize,
    /// Probability of the most probable class.
    pub confidence: f32,
    /// Full probability vector over all classes, when requested.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub probabilities: Vec<f32>,
    /// Ranked predictions, highest probability first.
    pub top_k: Vec<TopPrediction>,
    /// Whether the confidence reached the configured threshold.
    pub threshold_met: bool,
    /// Original (height, width, channels) of the input.
    pub image_shape: (u32, u32, u8),
    /// When the prediction was produced.
    pub timestamp: DateTime<Utc>,
}

impl PredictionResult {
    /// Qualitative confidence bucket of the prediction.
    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_confidence(self.confidence)
    }

    /// Reliability bucket of the prediction.
    pub fn reliability(&self) -> ReliabilityLevel {
        ReliabilityLevel::from_confidence(self.confidence)
    }
}

/// Static information about the loaded model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Architecture identifier.
    pub architecture: String,
    /// Total trainable parameter count.
    pub num_parameters: usize,
    /// Number of output classes.
    pub num_classes: usize,
    /// Square input size in pixels.
    pub input_size: u32,
    /// Ordered class display names.
    pub classes: Vec<String>,
    /// Epoch of the loaded checkpoint, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training_epoch: Option<usize>,
}

/// The primary diagnosis slice of a service-boundary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPrediction {
    pub class: PathologyClass,
    pub confidence: f32,
    pub description: String,
    pub threshold_met: bool,
}

/// Metadata attached to a service-boundary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMetadata {
    pub model: ModelInfo,
    pub timestamp: DateTime<Utc>,
    pub image_shape: (u32, u32, u8),
}

/// Successful service-boundary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSuccess {
    pub success: bool,
    pub prediction: ApiPrediction,
    /// Top-3 ranked predictions.
    pub top_predictions: Vec<TopPrediction>,
    pub metadata: ApiMetadata,
}

/// Failed service-boundary payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFailure {
    pub success: bool,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// What the service boundary hands back: success or a structured failure,
/// never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiOutcome {
    Success(Box<ApiSuccess>),
    Failure(ApiFailure),
}

/// The prediction engine: a classifier plus its preprocessing pipeline and
/// class vocabulary.
pub struct PathologyPredictor {
    model: Arc<dyn Classifier>,
    classes: Arc<ClassConfig>,
    config: PredictorConfig,
    normalize: NormalizeImage,
    training_epoch: Option<usize>,
}

impl PathologyPredictor {
    /// Creates a predictor over a loaded classifier.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid.
    pub fn new(
        model: Arc<dyn Classifier>,
        classes: Arc<ClassConfig>,
        config: PredictorConfig,
    ) -> PsResult<Self> {
        config.validate()?;
        Ok(Self {
            model,
            classes,
            config,
            normalize: NormalizeImage::imagenet(),
            training_epoch: None,
        })
    }

    /// Records the epoch of the checkpoint the model was loaded from, for
    /// reporting.
    pub fn with_training_epoch(mut self, epoch: usize) -> Self {
        self.training_epoch = Some(epoch);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Static information about the loaded model.
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            architecture: self.model.architecture().to_string(),
            num_parameters: self.model.num_parameters(),
            num_classes: self.classes.num_classes(),
            input_size: self.config.input_size,
            classes: self.classes.display_names(),
            training_epoch: self.training_epoch,
        }
    }

    /// Classifies encoded image bytes into the service-boundary payload
    /// shape: a success document with the top-3 predictions, or a structured
    /// failure. Never returns an error.
    pub fn predict_api(&self, image_data: Vec<u8>) -> ApiOutcome {
        let options = PredictOptions {
            use_tta: false,
            return_probabilities: true,
        };
        match self.predict(ImageInput::Bytes(image_data), options) {
            Ok(result) => {
                let description = self.classes.description(result.class).to_string();
                let mut top_predictions = result.top_k;
                top_predictions.truncate(3);
                ApiOutcome::Success(Box::new(ApiSuccess {
                    success: true,
                    prediction: ApiPrediction {
                        class: result.class,
                        confidence: result.confidence,
                        description,
                        threshold_met: result.threshold_met,
                    },
                    top_predictions,
                    metadata: ApiMetadata {
                        model: self.model_info(),
                        timestamp: result.timestamp,
                        image_shape: result.image_shape,
                    },
                }))
            }
            Err(e) => {
                warn!(error = %e, "prediction failed at the service boundary");
                ApiOutcome::Failure(ApiFailure {
                    success: false,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                })
            }
        }
    }

    /// Classifies a single image.
    ///
    /// # Errors
    ///
    /// Fails when the input cannot be decoded or the forward pass fails.
    pub fn predict(&self, input: ImageInput, options: PredictOptions) -> PsResult<PredictionResult> {
        let decoded = decode_image(input)?;
        if options.use_tta {
            self.predict_decoded_tta(&decoded, options)
        } else {
            self.predict_decoded(&decoded, options)
        }
    }

    /// Classifies a batch of images, keeping per-item failures isolated.
    ///
    /// The options apply to every item, so a batch can carry full probability
    /// vectors or run with test-time augmentation. Inputs that fail to decode
    /// produce an `Err` in their slot without affecting their neighbors. If a
    /// whole-batch forward pass fails, the batch is retried sequentially so a
    /// single poison item cannot sink the rest.
    pub fn predict_batch(
        &self,
        inputs: Vec<ImageInput>,
        batch_size: Option<usize>,
        options: PredictOptions,
    ) -> Vec<Result<PredictionResult, PathologyError>> {
        let total = inputs.len();
        let mut results: Vec<Option<Result<PredictionResult, PathologyError>>> =
            (0..total).map(|_| None).collect();

        // Decode up front so a corrupt input fails in its own slot instead of
        // poisoning a whole forward pass.
        let mut decoded: Vec<(usize, DecodedImage)> = Vec::with_capacity(total);
        for (index, input) in inputs.into_iter().enumerate() {
            match decode_image(input) {
                Ok(img) => decoded.push((index, img)),
                Err(e) => results[index] = Some(Err(PathologyError::batch_item(index, total, e))),
            }
        }

        if options.use_tta {
            // Each item already expands into its own four-view forward pass.
            for (index, img) in &decoded {
                results[*index] = Some(
                    self.predict_decoded_tta(img, options)
                        .map_err(|e| PathologyError::batch_item(*index, total, e)),
                );
            }
            return Self::collect_slots(results);
        }

        let sampler = BatchSampler::new(batch_size.unwrap_or(self.config.batch_size));
        for batch in sampler.sample(decoded) {
            match self.forward_batch(&batch.items) {
                Ok(per_item) => {
                    for ((index, img), probs) in batch.items.iter().zip(per_item) {
                        results[*index] = Some(self.assemble(&probs, img.original_shape, options));
                    }
                }
                Err(e) => {
                    warn!(error = %e, batch_len = batch.len(), "batch forward failed, retrying items sequentially");
                    for (index, img) in &batch.items {
                        results[*index] = Some(
                            self.predict_decoded(img, options)
                                .map_err(|e| PathologyError::batch_item(*index, total, e)),
                        );
                    }
                }
            }
        }

        Self::collect_slots(results)
    }

    fn collect_slots(
        slots: Vec<Option<Result<PredictionResult, PathologyError>>>,
    ) -> Vec<Result<PredictionResult, PathologyError>> {
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(PathologyError::invalid_input("batch slot was never filled"))
                })
            })
            .collect()
    }

    fn predict_decoded(
        &self,
        decoded: &DecodedImage,
        options: PredictOptions,
    ) -> PsResult<PredictionResult> {
        let square = resize_to_square(&decoded.image, self.config.input_size);
        let batch = self.normalize.normalize_to(&square)?;
        let logits = self.model.forward_logits(&batch)?;
        let probs = softmax_rows(&logits)?.swap_remove(0);
        self.assemble(&probs, decoded.original_shape, options)
    }

    // All four views go through one forward pass; the four softmax rows are
    // then averaged.
    fn predict_decoded_tta(
        &self,
        decoded: &DecodedImage,
        options: PredictOptions,
    ) -> PsResult<PredictionResult> {
        let square = resize_to_square(&decoded.image, self.config.input_size);
        let views = TtaVariant::expand(&square);
        let batch = self.normalize.normalize_batch_to(&views)?;
        let logits = self.model.forward_logits(&batch)?;
        let rows = softmax_rows(&logits)?;
        let probs = average_probabilities(&rows)?;
        debug!(views = views.len(), "averaged augmented views");
        self.assemble(&probs, decoded.original_shape, options)
    }

    fn forward_batch(&self, items: &[(usize, DecodedImage)]) -> PsResult<Vec<Vec<f32>>> {
        let squares: Vec<_> = items
            .iter()
            .map(|(_, img)| resize_to_square(&img.image, self.config.input_size))
            .collect();
        let batch = self.normalize.normalize_batch_to(&squares)?;
        let logits = self.model.forward_logits(&batch)?;
        softmax_rows(&logits)
    }

    fn assemble(
        &self,
        probs: &[f32],
        image_shape: (u32, u32, u8),
        options: PredictOptions,
    ) -> PsResult<PredictionResult> {
        if probs.len() != self.classes.num_classes() {
            return Err(PathologyError::invalid_input(format!(
                "classifier produced {} scores for {} classes",
                probs.len(),
                self.classes.num_classes()
            )));
        }
        let ranked = top_k(probs, self.config.topk);
        let top = ranked.first().ok_or_else(|| {
            PathologyError::invalid_input("classifier produced an empty score vector")
        })?;
        let class = self.classes.class_at(top.class_index).ok_or_else(|| {
            PathologyError::invalid_input(format!("class index {} out of range", top.class_index))
        })?;

        let top_k = ranked
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| {
                self.classes.class_at(entry.class_index).map(|class| TopPrediction {
                    class,
                    probability: entry.probability,
                    rank: i + 1,
                    description: self.classes.description(class).to_string(),
                })
            })
            .collect();

        Ok(PredictionResult {
            class,
            class_index: top.class_index,
            confidence: top.probability,
            probabilities: if options.return_probabilities {
                probs.to_vec()
            } else {
                Vec::new()
            },
            top_k,
            threshold_met: top.probability >= self.config.confidence_threshold,
            image_shape,
            timestamp: Utc::now(),
        })
    }
}

/// Numerically stable row-wise softmax over a (batch, classes) score matrix.
pub fn softmax_rows(logits: &Tensor2D) -> PsResult<Vec<Vec<f32>>> {
    let mut rows = Vec::with_capacity(logits.nrows());
    for row in logits.rows() {
        // f32::max ignores NaN operands, so the maximum alone cannot detect
        // a poisoned row.
        if row.iter().any(|v| !v.is_finite()) {
            return Err(PathologyError::invalid_input(
                "classifier produced non-finite scores",
            ));
        }
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = row.iter().map(|&v| (v - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        rows.push(exps.into_iter().map(|v| v / sum).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tensor4D;
    use image::RgbImage;
    use ndarray::Array2;

    /// Deterministic stand-in classifier: the logit of class `c` is `c` times
    /// the mean intensity of the batch item.
    struct StubClassifier {
        num_classes: usize,
        fail_on_batch: bool,
    }

    impl Classifier for StubClassifier {
        fn forward_logits(&self, batch: &Tensor4D) -> PsResult<Tensor2D> {
            let n = batch.shape()[0];
            if self.fail_on_batch && n > 1 {
                return Err(PathologyError::invalid_input("batch too large"));
            }
            let mut logits = Array2::zeros((n, self.num_classes));
            for i in 0..n {
                let mean: f32 = batch
                    .index_axis(ndarray::Axis(0), i)
                    .iter()
                    .copied()
                    .sum::<f32>()
                    / batch.index_axis(ndarray::Axis(0), i).len() as f32;
                for c in 0..self.num_classes {
                    logits[[i, c]] = c as f32 * (1.0 + mean.tanh());
                }
            }
            Ok(logits)
        }

        fn num_parameters(&self) -> usize {
            0
        }

        fn architecture(&self) -> &str {
            "stub"
        }
    }

    fn predictor(fail_on_batch: bool) -> PathologyPredictor {
        let classes = ClassConfig::with_defaults().into_shared();
        let model = Arc::new(StubClassifier {
            num_classes: classes.num_classes(),
            fail_on_batch,
        });
        let config = PredictorConfig {
            input_size: 32,
            ..PredictorConfig::default()
        };
        PathologyPredictor::new(model, classes, config).unwrap()
    }

    fn png_bytes(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([value, value, value]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();
        bytes
    }

    #[test]
    fn probabilities_sum_to_one_and_match_argmax() {
        let predictor = predictor(false);
        let result = predictor
            .predict(
                ImageInput::Bytes(png_bytes(40, 30, 200)),
                PredictOptions {
                    return_probabilities: true,
                    ..PredictOptions::default()
                },
            )
            .unwrap();

        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        let argmax = result
            .probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(result.class_index, argmax);
        assert_eq!(result.image_shape, (30, 40, 3));
        assert_eq!(result.top_k.len(), 5);
        assert_eq!(result.top_k[0].rank, 1);
    }

    #[test]
    fn tta_result_is_a_valid_distribution() {
        let predictor = predictor(false);
        let result = predictor
            .predict(
                ImageInput::Bytes(png_bytes(32, 32, 120)),
                PredictOptions {
                    use_tta: true,
                    return_probabilities: true,
                },
            )
            .unwrap();
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn probabilities_omitted_unless_requested() {
        let predictor = predictor(false);
        let result = predictor
            .predict(
                ImageInput::Bytes(png_bytes(32, 32, 10)),
                PredictOptions::default(),
            )
            .unwrap();
        assert!(result.probabilities.is_empty());
        assert!(!result.top_k.is_empty());
    }

    #[test]
    fn corrupt_item_fails_alone_in_a_batch() {
        let predictor = predictor(false);
        let inputs = vec![
            ImageInput::Bytes(png_bytes(32, 32, 10)),
            ImageInput::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
            ImageInput::Bytes(png_bytes(32, 32, 250)),
        ];
        let results = predictor.predict_batch(inputs, None, PredictOptions::default());
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }

    #[test]
    fn batch_forward_failure_falls_back_to_sequential() {
        let predictor = predictor(true);
        let inputs = vec![
            ImageInput::Bytes(png_bytes(32, 32, 10)),
            ImageInput::Bytes(png_bytes(32, 32, 100)),
            ImageInput::Bytes(png_bytes(32, 32, 250)),
        ];
        let results = predictor.predict_batch(inputs, Some(3), PredictOptions::default());
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn batch_results_carry_probabilities_for_reporting() {
        use crate::inference::DiagnosisReportGenerator;

        let predictor = predictor(false);
        let inputs = vec![
            ImageInput::Bytes(png_bytes(32, 32, 60)),
            ImageInput::Bytes(png_bytes(32, 32, 180)),
        ];
        let options = PredictOptions {
            return_probabilities: true,
            ..PredictOptions::default()
        };
        let results = predictor.predict_batch(inputs, None, options);

        let generator = DiagnosisReportGenerator::new(ClassConfig::with_defaults().into_shared());
        for result in results {
            let result = result.unwrap();
            assert_eq!(result.probabilities.len(), 15);
            let outcome = generator.generate(&result, None, None);
            let report = outcome.report().expect("batch result should produce a report");
            assert!(report.differential_diagnosis.is_some());
        }
    }

    #[test]
    fn api_payload_carries_top_three_and_model_info() {
        let predictor = predictor(false);
        let outcome = predictor.predict_api(png_bytes(32, 32, 90));
        match outcome {
            ApiOutcome::Success(payload) => {
                assert!(payload.success);
                assert_eq!(payload.top_predictions.len(), 3);
                assert_eq!(payload.metadata.model.architecture, "stub");
                assert_eq!(payload.metadata.model.num_classes, 15);
            }
            ApiOutcome::Failure(_) => panic!("expected a success payload"),
        }
    }

    #[test]
    fn api_failure_is_a_structured_payload() {
        let predictor = predictor(false);
        let outcome = predictor.predict_api(vec![0x00, 0x01]);
        match outcome {
            ApiOutcome::Failure(failure) => {
                assert!(!failure.success);
                assert!(!failure.error.is_empty());
            }
            ApiOutcome::Success(_) => panic!("expected a failure payload"),
        }
        let json = serde_json::to_string(&predictor.predict_api(vec![0xff])).unwrap();
        assert!(json.contains("\"success\":false"));
    }

    /// Stand-in classifier sensitive to orientation: the logit of class `c`
    /// is `c` times the normalized red value of the top-left pixel.
    struct CornerClassifier {
        num_classes: usize,
    }

    impl Classifier for CornerClassifier {
        fn forward_logits(&self, batch: &Tensor4D) -> PsResult<Tensor2D> {
            let n = batch.shape()[0];
            let mut logits = Array2::zeros((n, self.num_classes));
            for i in 0..n {
                let corner = batch[[i, 0, 0, 0]];
                for c in 0..self.num_classes {
                    logits[[i, c]] = c as f32 * corner;
                }
            }
            Ok(logits)
        }

        fn num_parameters(&self) -> usize {
            0
        }

        fn architecture(&self) -> &str {
            "corner-stub"
        }
    }

    #[test]
    fn tta_probabilities_average_the_four_views() {
        let classes = ClassConfig::with_defaults().into_shared();
        let model = Arc::new(CornerClassifier {
            num_classes: classes.num_classes(),
        });
        let config = PredictorConfig {
            input_size: 8,
            ..PredictorConfig::default()
        };
        let predictor = PathologyPredictor::new(model, classes, config).unwrap();

        // A gradient so the four views present different corner pixels.
        let img = RgbImage::from_fn(8, 8, |x, y| {
            image::Rgb([(x * 30) as u8, (y * 30) as u8, 0])
        });
        let options = PredictOptions {
            use_tta: false,
            return_probabilities: true,
        };

        let mut per_view = Vec::new();
        for variant in TtaVariant::ALL {
            let view = variant.apply(&img);
            let result = predictor
                .predict(
                    ImageInput::Decoded(image::DynamicImage::ImageRgb8(view)),
                    options,
                )
                .unwrap();
            per_view.push(result.probabilities);
        }
        assert!(per_view.iter().any(|p| p != &per_view[0]));

        let mut expected = vec![0.0f32; per_view[0].len()];
        for probs in &per_view {
            for (e, p) in expected.iter_mut().zip(probs) {
                *e += p;
            }
        }
        for e in &mut expected {
            *e /= TtaVariant::ALL.len() as f32;
        }

        let tta = predictor
            .predict(
                ImageInput::Decoded(image::DynamicImage::ImageRgb8(img)),
                PredictOptions {
                    use_tta: true,
                    return_probabilities: true,
                },
            )
            .unwrap();
        for (e, p) in expected.iter().zip(&tta.probabilities) {
            assert!((e - p).abs() < 1e-5);
        }
    }

    #[test]
    fn confidence_buckets_are_boundary_exact() {
        assert_eq!(ConfidenceLevel::from_confidence(0.9), ConfidenceLevel::VeryHigh);
        assert_eq!(ConfidenceLevel::from_confidence(0.89999), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_confidence(0.7), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_confidence(0.5), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_confidence(0.49999), ConfidenceLevel::Low);
        assert_eq!(
            ReliabilityLevel::from_confidence(0.8),
            ReliabilityLevel::Reliable
        );
        assert_eq!(
            ReliabilityLevel::from_confidence(0.6),
            ReliabilityLevel::FairlyReliable
        );
        assert_eq!(
            ReliabilityLevel::from_confidence(0.59),
            ReliabilityLevel::NeedsManualConfirmation
        );
    }

    #[test]
    fn threshold_flag_follows_configuration() {
        let classes = ClassConfig::with_defaults().into_shared();
        let model = Arc::new(StubClassifier {
            num_classes: classes.num_classes(),
            fail_on_batch: false,
        });
        let config = PredictorConfig {
            input_size: 32,
            confidence_threshold: 0.99,
            ..PredictorConfig::default()
        };
        let predictor = PathologyPredictor::new(model, classes, config).unwrap();
        let result = predictor
            .predict(
                ImageInput::Bytes(png_bytes(32, 32, 128)),
                PredictOptions::default(),
            )
            .unwrap();
        assert_eq!(result.threshold_met, result.confidence >= 0.99);
    }

    #[test]
    fn softmax_rejects_non_finite_scores() {
        let logits = Array2::from_shape_vec((1, 3), vec![f32::NAN, 0.0, 1.0]).unwrap();
        assert!(softmax_rows(&logits).is_err());
    }
}
