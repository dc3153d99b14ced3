//! Evaluation metrics for the classifier.
//!
//! Accuracy, per-class and averaged precision/recall/F1 from a confusion
//! matrix, and a one-vs-rest macro AUC. AUC over a label set with fewer than
//! two distinct classes is reported explicitly as not computable instead of
//! being silently omitted.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::core::{PathologyError, PsResult, Tensor2D};

/// Outcome of an AUC computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AucOutcome {
    Value { auc: f64 },
    NotComputable { reason: String },
}

impl AucOutcome {
    /// The AUC value, when computable.
    pub fn value(&self) -> Option<f64> {
        match self {
            AucOutcome::Value { auc } => Some(*auc),
            AucOutcome::NotComputable { .. } => None,
        }
    }
}

/// Precision/recall/F1 for a single class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PerClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of true samples of this class.
    pub support: u64,
}

/// Aggregated classification metrics over an evaluation set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub accuracy: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    pub micro_f1: f64,
    pub weighted_precision: f64,
    pub weighted_recall: f64,
    pub weighted_f1: f64,
    pub auc: AucOutcome,
}

impl ClassificationMetrics {
    /// Flattens the scalar metrics for checkpoint metadata. A non-computable
    /// AUC is omitted from the map, not encoded as a sentinel value.
    pub fn to_map(&self) -> HashMap<String, f64> {
        let mut map = HashMap::from([
            ("accuracy".to_string(), self.accuracy),
            ("macro_precision".to_string(), self.macro_precision),
            ("macro_recall".to_string(), self.macro_recall),
            ("macro_f1".to_string(), self.macro_f1),
            ("micro_f1".to_string(), self.micro_f1),
            ("weighted_precision".to_string(), self.weighted_precision),
            ("weighted_recall".to_string(), self.weighted_recall),
            ("weighted_f1".to_string(), self.weighted_f1),
        ]);
        if let Some(auc) = self.auc.value() {
            map.insert("macro_auc".to_string(), auc);
        }
        map
    }
}

/// Computes classification metrics for a fixed class count.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCalculator {
    num_classes: usize,
}

impl MetricsCalculator {
    pub fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    /// Builds the (true, predicted) confusion matrix.
    ///
    /// # Errors
    ///
    /// Fails on length mismatch, empty input, or out-of-range labels.
    pub fn confusion_matrix(&self, y_true: &[u32], y_pred: &[u32]) -> PsResult<Array2<u64>> {
        if y_true.len() != y_pred.len() {
            return Err(PathologyError::invalid_input(format!(
                "label/prediction length mismatch: {} vs {}",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(PathologyError::invalid_input(
                "cannot compute metrics over an empty evaluation set",
            ));
        }
        let mut cm = Array2::zeros((self.num_classes, self.num_classes));
        for (&t, &p) in y_true.iter().zip(y_pred) {
            let (t, p) = (t as usize, p as usize);
            if t >= self.num_classes || p >= self.num_classes {
                return Err(PathologyError::invalid_input(format!(
                    "label {} out of range for {} classes",
                    t.max(p),
                    self.num_classes
                )));
            }
            cm[[t, p]] += 1;
        }
        Ok(cm)
    }

    /// Per-class precision/recall/F1 from a confusion matrix. Classes with no
    /// predicted or true samples score zero rather than NaN.
    pub fn per_class(&self, cm: &Array2<u64>) -> Vec<PerClassMetrics> {
        (0..self.num_classes)
            .map(|c| {
                let tp = cm[[c, c]] as f64;
                let pred_total: f64 = (0..self.num_classes).map(|t| cm[[t, c]] as f64).sum();
                let true_total: f64 = (0..self.num_classes).map(|p| cm[[c, p]] as f64).sum();
                let precision = if pred_total > 0.0 { tp / pred_total } else { 0.0 };
                let recall = if true_total > 0.0 { tp / true_total } else { 0.0 };
                let f1 = if precision + recall > 0.0 {
                    2.0 * precision * recall / (precision + recall)
                } else {
                    0.0
                };
                PerClassMetrics {
                    precision,
                    recall,
                    f1,
                    support: true_total as u64,
                }
            })
            .collect()
    }

    /// Computes the full metric set. `probabilities`, when given as a
    /// (samples, classes) matrix, enables the AUC.
    pub fn compute(
        &self,
        y_true: &[u32],
        y_pred: &[u32],
        probabilities: Option<&Tensor2D>,
    ) -> PsResult<ClassificationMetrics> {
        let cm = self.confusion_matrix(y_true, y_pred)?;
        let per_class = self.per_class(&cm);
        let total = y_true.len() as f64;
        let correct: u64 = (0..self.num_classes).map(|c| cm[[c, c]]).sum();
        let accuracy = correct as f64 / total;

        let k = self.num_classes as f64;
        let macro_precision = per_class.iter().map(|m| m.precision).sum::<f64>() / k;
        let macro_recall = per_class.iter().map(|m| m.recall).sum::<f64>() / k;
        let macro_f1 = per_class.iter().map(|m| m.f1).sum::<f64>() / k;
        let weighted =
            |f: fn(&PerClassMetrics) -> f64| -> f64 {
                per_class
                    .iter()
                    .map(|m| f(m) * m.support as f64)
                    .sum::<f64>()
                    / total
            };

        let auc = match probabilities {
            Some(probs) => self.macro_auc_ovr(y_true, probs),
            None => AucOutcome::NotComputable {
                reason: "probabilities not provided".to_string(),
            },
        };

        Ok(ClassificationMetrics {
            accuracy,
            macro_precision,
            macro_recall,
            macro_f1,
            // single-label multiclass: micro P = micro R = accuracy
            micro_f1: accuracy,
            weighted_precision: weighted(|m| m.precision),
            weighted_recall: weighted(|m| m.recall),
            weighted_f1: weighted(|m| m.f1),
            auc,
        })
    }

    /// One-vs-rest macro AUC via the rank-sum statistic, averaged over the
    /// classes actually present in `y_true`. Needs at least two distinct
    /// classes to be computable.
    pub fn macro_auc_ovr(&self, y_true: &[u32], probabilities: &Tensor2D) -> AucOutcome {
        if probabilities.nrows() != y_true.len() || probabilities.ncols() != self.num_classes {
            return AucOutcome::NotComputable {
                reason: format!(
                    "probability matrix shape ({}, {}) does not match {} samples x {} classes",
                    probabilities.nrows(),
                    probabilities.ncols(),
                    y_true.len(),
                    self.num_classes
                ),
            };
        }
        let mut present: Vec<u32> = y_true.to_vec();
        present.sort_unstable();
        present.dedup();
        if present.len() < 2 {
            return AucOutcome::NotComputable {
                reason: "fewer than two distinct classes in the evaluation labels".to_string(),
            };
        }

        let mut sum = 0.0;
        for &class in &present {
            let scores: Vec<f64> = probabilities
                .column(class as usize)
                .iter()
                .map(|&v| v as f64)
                .collect();
            sum += binary_auc(y_true, class, &scores);
        }
        AucOutcome::Value {
            auc: sum / present.len() as f64,
        }
    }
}

// Mann-Whitney rank statistic with tie-averaged ranks.
fn binary_auc(y_true: &[u32], positive: u32, scores: &[f64]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank;
        }
        i = j + 1;
    }

    let n_pos = y_true.iter().filter(|&&t| t == positive).count() as f64;
    let n_neg = y_true.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        // class present check upstream guarantees n_pos > 0; an all-positive
        // column is degenerate and contributes the chance level
        return 0.5;
    }
    let rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|&(&t, _)| t == positive)
        .map(|(_, &r)| r)
        .sum();
    (rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn perfect_predictions_score_one() {
        let calc = MetricsCalculator::new(3);
        let y = [0, 1, 2, 1, 0];
        let metrics = calc.compute(&y, &y, None).unwrap();
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.macro_f1, 1.0);
        assert_eq!(metrics.weighted_f1, 1.0);
        assert!(metrics.auc.value().is_none());
    }

    #[test]
    fn confusion_matrix_counts_true_by_predicted() {
        let calc = MetricsCalculator::new(3);
        let cm = calc
            .confusion_matrix(&[0, 0, 1, 2], &[0, 1, 1, 2])
            .unwrap();
        assert_eq!(cm[[0, 0]], 1);
        assert_eq!(cm[[0, 1]], 1);
        assert_eq!(cm[[1, 1]], 1);
        assert_eq!(cm[[2, 2]], 1);
    }

    #[test]
    fn missing_class_scores_zero_without_nan() {
        let calc = MetricsCalculator::new(3);
        // class 2 never occurs
        let metrics = calc.compute(&[0, 1, 0, 1], &[0, 1, 1, 1], None).unwrap();
        assert!(metrics.macro_f1.is_finite());
        let per_class = calc
            .per_class(&calc.confusion_matrix(&[0, 1, 0, 1], &[0, 1, 1, 1]).unwrap());
        assert_eq!(per_class[2].f1, 0.0);
        assert_eq!(per_class[2].support, 0);
    }

    #[test]
    fn auc_is_one_for_perfectly_separable_scores() {
        let calc = MetricsCalculator::new(2);
        let probs = array![[0.9, 0.1], [0.8, 0.2], [0.2, 0.8], [0.1, 0.9]];
        let outcome = calc.macro_auc_ovr(&[0, 0, 1, 1], &probs);
        assert_eq!(outcome.value(), Some(1.0));
    }

    #[test]
    fn auc_with_single_class_is_not_computable() {
        let calc = MetricsCalculator::new(2);
        let probs = array![[0.9, 0.1], [0.8, 0.2]];
        let outcome = calc.macro_auc_ovr(&[0, 0], &probs);
        assert!(matches!(outcome, AucOutcome::NotComputable { .. }));
    }

    #[test]
    fn non_computable_auc_is_omitted_from_the_metric_map() {
        let calc = MetricsCalculator::new(2);
        let metrics = calc.compute(&[0, 0], &[0, 0], None).unwrap();
        assert!(!metrics.to_map().contains_key("macro_auc"));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let calc = MetricsCalculator::new(2);
        assert!(calc.confusion_matrix(&[0, 1], &[0]).is_err());
        assert!(calc.confusion_matrix(&[], &[]).is_err());
    }
}
