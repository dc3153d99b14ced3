//! Deterministic top-k ranking of class probabilities.

/// One ranked entry from a probability vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPrediction {
    /// Index of the class in model-output order.
    pub class_index: usize,
    /// Probability assigned to the class.
    pub probability: f32,
}

/// Ranks all classes by probability, descending.
///
/// Ties are broken by original class index ascending, so the ranking is
/// deterministic and reproducible across runs.
pub fn rank_probabilities(probs: &[f32]) -> Vec<RankedPrediction> {
    let mut ranked: Vec<RankedPrediction> = probs
        .iter()
        .enumerate()
        .map(|(class_index, &probability)| RankedPrediction {
            class_index,
            probability,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.probability
            .partial_cmp(&a.probability)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.class_index.cmp(&b.class_index))
    });
    ranked
}

/// The top `k` ranked classes; `k` is clamped to the number of classes.
pub fn top_k(probs: &[f32], k: usize) -> Vec<RankedPrediction> {
    let mut ranked = rank_probabilities(probs);
    ranked.truncate(k.min(probs.len()));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_descending() {
        let ranked = rank_probabilities(&[0.1, 0.6, 0.3]);
        assert_eq!(ranked[0].class_index, 1);
        assert_eq!(ranked[1].class_index, 2);
        assert_eq!(ranked[2].class_index, 0);
    }

    #[test]
    fn ties_break_by_index_ascending() {
        let ranked = rank_probabilities(&[0.25, 0.25, 0.5, 0.25]);
        assert_eq!(ranked[0].class_index, 2);
        assert_eq!(ranked[1].class_index, 0);
        assert_eq!(ranked[2].class_index, 1);
        assert_eq!(ranked[3].class_index, 3);
    }

    #[test]
    fn k_is_clamped_to_class_count() {
        let top = top_k(&[0.9, 0.1], 5);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn empty_input_yields_empty_ranking() {
        assert!(top_k(&[], 5).is_empty());
    }
}
