//! Image processing utilities.
//!
//! Decoding/canonicalization, mean/std normalization, deterministic
//! test-time augmentation, and top-k ranking.

pub mod decode;
pub mod normalize;
pub mod topk;
pub mod tta;

pub use decode::{DecodedImage, ImageInput, decode_image};
pub use normalize::{IMAGENET_MEAN, IMAGENET_STD, NormalizeImage, resize_to_square};
pub use topk::{RankedPrediction, rank_probabilities, top_k};
pub use tta::{TtaVariant, average_probabilities};
