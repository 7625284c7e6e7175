//! Image decoding and the grayscale derivative used for feature work.
//!
//! Frames arrive as raw bytes (JPEG, PNG, BMP, WebP) and are decoded to
//! RGB for compositing. Feature extraction never sees the color image:
//! it gets a luma copy smoothed by a small Gaussian, which suppresses
//! sensor noise that would otherwise produce unstable corners.

use image::{GrayImage, RgbImage};

use crate::types::StitchError;

/// Decode raw image bytes into an RGB image.
///
/// Alpha, if present, is dropped.
///
/// # Errors
///
/// Returns [`StitchError::EmptyInput`] if `bytes` is empty.
/// Returns [`StitchError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, StitchError> {
    if bytes.is_empty() {
        return Err(StitchError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Luma channel of an RGB image.
#[must_use = "returns the grayscale image"]
pub fn luma(image: &RgbImage) -> GrayImage {
    image::imageops::grayscale(image)
}

/// Grayscale, blurred copy of `image` for feature extraction.
///
/// Non-positive sigma values skip the blur, since `imageproc`'s
/// underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the feature grayscale image"]
pub fn feature_grayscale(image: &RgbImage, sigma: f32) -> GrayImage {
    let gray = luma(image);
    if sigma <= 0.0 {
        return gray;
    }

    imageproc::filter::gaussian_blur_f32(&gray, sigma)
}
