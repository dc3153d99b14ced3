//! Input decoding and canonicalization.
//!
//! Accepts the heterogeneous inputs the service boundary produces: raw encoded
//! bytes, in-memory pixel buffers with 1/3/4 channels, or already-decoded
//! images. Everything is canonicalized to 8-bit RGB. Grayscale is broadcast to
//! three channels; alpha is discarded by the fixed RGBA-to-RGB conversion.

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::core::{PathologyError, PsResult};

/// A single image input, prior to canonicalization.
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Encoded image bytes (PNG, JPEG, ...).
    Bytes(Vec<u8>),
    /// Raw pixel buffer in row-major order with 1, 3, or 4 interleaved
    /// channels.
    Pixels {
        data: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
    },
    /// An already-decoded image.
    Decoded(DynamicImage),
}

/// A canonicalized RGB image together with the shape of the original input.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// The canonical RGB image.
    pub image: RgbImage,
    /// Original (height, width, channels) before canonicalization.
    pub original_shape: (u32, u32, u8),
}

/// Decodes and canonicalizes an input to RGB.
///
/// # Errors
///
/// Returns [`PathologyError::ImageDecode`] when encoded bytes cannot be
/// decoded, and [`PathologyError::InvalidInput`] for pixel buffers whose
/// length or channel count does not match their declared shape. A failed
/// input must not be passed further into the classifier.
pub fn decode_image(input: ImageInput) -> PsResult<DecodedImage> {
    match input {
        ImageInput::Bytes(bytes) => {
            let img = image::load_from_memory(&bytes).map_err(PathologyError::ImageDecode)?;
            let channels = img.color().channel_count();
            let rgb = img.to_rgb8();
            Ok(DecodedImage {
                original_shape: (rgb.height(), rgb.width(), channels),
                image: rgb,
            })
        }
        ImageInput::Pixels {
            data,
            width,
            height,
            channels,
        } => decode_pixels(data, width, height, channels),
        ImageInput::Decoded(img) => {
            let channels = img.color().channel_count();
            let rgb = img.to_rgb8();
            Ok(DecodedImage {
                original_shape: (rgb.height(), rgb.width(), channels),
                image: rgb,
            })
        }
    }
}

fn decode_pixels(data: Vec<u8>, width: u32, height: u32, channels: u8) -> PsResult<DecodedImage> {
    let expected = width as usize * height as usize * channels as usize;
    if data.len() != expected {
        return Err(PathologyError::invalid_input(format!(
            "pixel buffer length {} does not match {}x{}x{}",
            data.len(),
            height,
            width,
            channels
        )));
    }
    let image = match channels {
        1 => {
            let gray = GrayImage::from_raw(width, height, data).ok_or_else(|| {
                PathologyError::invalid_input("grayscale buffer rejected by image backend")
            })?;
            DynamicImage::ImageLuma8(gray).to_rgb8()
        }
        3 => RgbImage::from_raw(width, height, data)
            .ok_or_else(|| PathologyError::invalid_input("rgb buffer rejected by image backend"))?,
        4 => {
            let rgba = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
                PathologyError::invalid_input("rgba buffer rejected by image backend")
            })?;
            DynamicImage::ImageRgba8(rgba).to_rgb8()
        }
        other => {
            return Err(PathologyError::invalid_input(format!(
                "unsupported channel count: {other}"
            )));
        }
    };
    Ok(DecodedImage {
        original_shape: (height, width, channels),
        image,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_buffer_broadcasts_to_rgb() {
        let data = vec![7u8; 4];
        let decoded = decode_image(ImageInput::Pixels {
            data,
            width: 2,
            height: 2,
            channels: 1,
        })
        .unwrap();
        assert_eq!(decoded.original_shape, (2, 2, 1));
        assert_eq!(decoded.image.get_pixel(0, 0).0, [7, 7, 7]);
    }

    #[test]
    fn rgba_buffer_drops_alpha() {
        let data = vec![10, 20, 30, 255, 40, 50, 60, 0];
        let decoded = decode_image(ImageInput::Pixels {
            data,
            width: 2,
            height: 1,
            channels: 4,
        })
        .unwrap();
        assert_eq!(decoded.original_shape, (1, 2, 4));
        assert_eq!(decoded.image.get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(decoded.image.get_pixel(1, 0).0, [40, 50, 60]);
    }

    #[test]
    fn rgb_buffer_passes_through() {
        let data = vec![1, 2, 3, 4, 5, 6];
        let decoded = decode_image(ImageInput::Pixels {
            data,
            width: 1,
            height: 2,
            channels: 3,
        })
        .unwrap();
        assert_eq!(decoded.image.get_pixel(0, 1).0, [4, 5, 6]);
    }

    #[test]
    fn mismatched_buffer_length_is_invalid_input() {
        let err = decode_image(ImageInput::Pixels {
            data: vec![0; 5],
            width: 2,
            height: 2,
            channels: 3,
        })
        .unwrap_err();
        assert!(matches!(err, PathologyError::InvalidInput { .. }));
    }

    #[test]
    fn two_channel_buffer_is_rejected() {
        let err = decode_image(ImageInput::Pixels {
            data: vec![0; 8],
            width: 2,
            height: 2,
            channels: 2,
        })
        .unwrap_err();
        assert!(matches!(err, PathologyError::InvalidInput { .. }));
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = decode_image(ImageInput::Bytes(vec![0xde, 0xad, 0xbe, 0xef])).unwrap_err();
        assert!(matches!(err, PathologyError::ImageDecode(_)));
    }

    #[test]
    fn encoded_png_round_trips() {
        let mut img = RgbImage::new(3, 2);
        img.put_pixel(1, 1, image::Rgb([9, 8, 7]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(
                &mut std::io::Cursor::new(&mut bytes),
                image::ImageFormat::Png,
            )
            .unwrap();

        let decoded = decode_image(ImageInput::Bytes(bytes)).unwrap();
        assert_eq!(decoded.original_shape, (2, 3, 3));
        assert_eq!(decoded.image.get_pixel(1, 1).0, [9, 8, 7]);
    }
}
