//! Batch sampling utilities.
//!
//! Splits an ordered set of inputs into fixed-size batches while keeping the
//! original item indexes, so per-item results and errors can be mapped back
//! to the caller's input order.

use ndarray::{Array2, Array4};

/// 2D tensor of (batch, classes) scores.
pub type Tensor2D = Array2<f32>;
/// 4D tensor of (batch, channels, height, width) image data.
pub type Tensor4D = Array4<f32>;

/// A batch of items along with their original indexes.
#[derive(Debug, Clone)]
pub struct BatchData<T> {
    /// Original positions of the items in the caller's input.
    pub indexes: Vec<usize>,
    /// The items in this batch.
    pub items: Vec<T>,
}

impl<T> BatchData<T> {
    /// Number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Samples items into fixed-size batches, preserving order.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    batch_size: usize,
}

impl BatchSampler {
    /// Creates a sampler with the given batch size; sizes of zero are
    /// clamped to one.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// The effective batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Splits the items into consecutive batches of at most `batch_size`.
    pub fn sample<T>(&self, items: Vec<T>) -> Vec<BatchData<T>> {
        let mut batches = Vec::with_capacity(items.len().div_ceil(self.batch_size));
        let mut current = BatchData {
            indexes: Vec::with_capacity(self.batch_size),
            items: Vec::with_capacity(self.batch_size),
        };
        for (index, item) in items.into_iter().enumerate() {
            current.indexes.push(index);
            current.items.push(item);
            if current.len() == self.batch_size {
                batches.push(std::mem::replace(
                    &mut current,
                    BatchData {
                        indexes: Vec::with_capacity(self.batch_size),
                        items: Vec::with_capacity(self.batch_size),
                    },
                ));
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_preserves_order_and_indexes() {
        let sampler = BatchSampler::new(3);
        let batches = sampler.sample(vec!["a", "b", "c", "d", "e"]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].indexes, vec![0, 1, 2]);
        assert_eq!(batches[0].items, vec!["a", "b", "c"]);
        assert_eq!(batches[1].indexes, vec![3, 4]);
        assert_eq!(batches[1].items, vec!["d", "e"]);
    }

    #[test]
    fn zero_batch_size_is_clamped() {
        let sampler = BatchSampler::new(0);
        assert_eq!(sampler.batch_size(), 1);
        let batches = sampler.sample(vec![1, 2]);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let sampler = BatchSampler::new(4);
        let batches = sampler.sample(Vec::<u8>::new());
        assert!(batches.is_empty());
    }
}
