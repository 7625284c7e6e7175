//! Warping a candidate onto the canvas and blending it with the base.
//!
//! Blending is a hard binary mask: wherever the warped candidate has any
//! brightness it replaces the base, elsewhere the base shows through.
//! No feathering or exposure compensation is attempted.

use image::{GrayImage, Luma, Pixel, Rgb, RgbImage};
use imageproc::geometric_transformations::{Projection, warp_into};

use crate::homography::ProjectiveTransform;
use crate::types::{Dimensions, WarpInterpolation};

/// Pixel value marking an occupied mask location.
const OCCUPIED: u8 = 255;

/// Warp `candidate` onto a black canvas of size `canvas`.
///
/// `to_canvas` maps candidate coordinates into canvas coordinates.
/// Returns `None` if the transform cannot be represented as an `f32`
/// projection.
#[must_use]
pub fn warp_candidate(
    candidate: &RgbImage,
    to_canvas: &ProjectiveTransform,
    canvas: Dimensions,
    interpolation: WarpInterpolation,
) -> Option<RgbImage> {
    let projection = Projection::from_matrix(to_canvas.to_row_major_f32())?;
    let mut out = RgbImage::new(canvas.width, canvas.height);
    warp_into(
        candidate,
        &projection,
        interpolation.to_imageproc(),
        Rgb([0, 0, 0]),
        &mut out,
    );
    Some(out)
}

/// Binary mask of the pixels whose luma is non-zero.
#[must_use = "returns the occupancy mask"]
pub fn occupancy_mask(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let luma = image.get_pixel(x, y).to_luma().0[0];
        Luma([if luma > 0 { OCCUPIED } else { 0 }])
    })
}

/// Place `base` at the origin of a black canvas covering both `base` and
/// `warped`, then overwrite every masked location with the warped pixel.
#[must_use = "returns the blended canvas"]
pub fn overlay(base: &RgbImage, warped: &RgbImage, mask: &GrayImage) -> RgbImage {
    let mut canvas = RgbImage::new(
        warped.width().max(base.width()),
        warped.height().max(base.height()),
    );
    image::imageops::replace(&mut canvas, base, 0, 0);

    for (x, y, m) in mask.enumerate_pixels() {
        if m.0[0] != 0 && x < warped.width() && y < warped.height() {
            canvas.put_pixel(x, y, *warped.get_pixel(x, y));
        }
    }
    canvas
}

/// Crop to the tight bounding box of pixels whose luma exceeds
/// `threshold`.
///
/// An image with no such pixel is returned unchanged.
#[must_use = "returns the cropped image"]
pub fn crop_to_content(image: &RgbImage, threshold: u8) -> RgbImage {
    let bounds = image
        .enumerate_pixels()
        .filter(|(_, _, p)| p.to_luma().0[0] > threshold)
        .fold(None, |acc: Option<(u32, u32, u32, u32)>, (x, y, _)| {
            Some(acc.map_or((x, y, x, y), |(x0, y0, x1, y1)| {
                (x0.min(x), y0.min(y), x1.max(x), y1.max(y))
            }))
        });

    match bounds {
        Some((x0, y0, x1, y1)) => {
            image::imageops::crop_imm(image, x0, y0, x1 - x0 + 1, y1 - y0 + 1).to_image()
        }
        None => image.clone(),
    }
}

/// Warp, blend, and crop one candidate into the composite.
///
/// The canvas is never smaller than `base` on either axis, even when
/// `canvas` is.
///
/// Returns `None` if the warp projection cannot be built.
#[must_use]
pub fn merge(
    base: &RgbImage,
    candidate: &RgbImage,
    to_canvas: &ProjectiveTransform,
    canvas: Dimensions,
    interpolation: WarpInterpolation,
    crop_threshold: u8,
) -> Option<RgbImage> {
    let canvas = Dimensions::new(
        canvas.width.max(base.width()),
        canvas.height.max(base.height()),
    );
    let warped = warp_candidate(candidate, to_canvas, canvas, interpolation)?;
    let mask = occupancy_mask(&warped);
    let blended = overlay(base, &warped, &mask);
    Some(crop_to_content(&blended, crop_threshold))
}
