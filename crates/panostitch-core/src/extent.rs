//! Canvas extent of an image under a projective transform.

use crate::homography::ProjectiveTransform;
use crate::types::{CandidateError, Dimensions, Point};

/// Spans within this of an integer round to it instead of up, so
/// estimation noise does not add a pixel column.
const SNAP_EPSILON: f64 = 1e-6;

/// Bounding box of an image's projected corners.
///
/// `min_x` and `min_y` are never positive: the canvas always contains the
/// origin, where the current composite sits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasExtent {
    /// Smallest projected x, clamped to at most 0.
    pub min_x: f64,
    /// Smallest projected y, clamped to at most 0.
    pub min_y: f64,
    /// Largest projected x.
    pub max_x: f64,
    /// Largest projected y.
    pub max_y: f64,
}

impl CanvasExtent {
    /// Horizontal span.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Vertical span.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Project the four corners of a `dims` image through `transform`.
///
/// # Errors
///
/// Returns [`CandidateError::NonFiniteExtent`] if any corner maps to
/// infinity or to a non-finite coordinate.
pub fn canvas_extent(
    dims: Dimensions,
    transform: &ProjectiveTransform,
) -> Result<CanvasExtent, CandidateError> {
    let w = f64::from(dims.width);
    let h = f64::from(dims.height);
    let corners = [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(0.0, h),
        Point::new(w, h),
    ];

    let mut extent = CanvasExtent {
        min_x: f64::INFINITY,
        min_y: f64::INFINITY,
        max_x: f64::NEG_INFINITY,
        max_y: f64::NEG_INFINITY,
    };
    for corner in corners {
        let p = transform
            .apply(corner)
            .ok_or(CandidateError::NonFiniteExtent)?;
        extent.min_x = extent.min_x.min(p.x);
        extent.min_y = extent.min_y.min(p.y);
        extent.max_x = extent.max_x.max(p.x);
        extent.max_y = extent.max_y.max(p.y);
    }

    extent.min_x = extent.min_x.min(0.0);
    extent.min_y = extent.min_y.min(0.0);
    Ok(extent)
}

/// Canvas size needed to hold both the base and the warped candidate.
///
/// `transform` maps base onto candidate, `inverse` candidate onto base.
/// The larger of the two extents is taken per axis and rounded up.
///
/// # Errors
///
/// - [`CandidateError::NonFiniteExtent`] if either projection is not
///   finite.
/// - [`CandidateError::CanvasTooLarge`] if a side exceeds `max_side`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn required_canvas(
    base: Dimensions,
    candidate: Dimensions,
    transform: &ProjectiveTransform,
    inverse: &ProjectiveTransform,
    max_side: u32,
) -> Result<Dimensions, CandidateError> {
    let base_extent = canvas_extent(base, transform)?;
    let candidate_extent = canvas_extent(candidate, inverse)?;

    let width = (base_extent.width().max(candidate_extent.width()) - SNAP_EPSILON).ceil();
    let height = (base_extent.height().max(candidate_extent.height()) - SNAP_EPSILON).ceil();

    let limit = f64::from(max_side);
    if width > limit || height > limit {
        // Float-to-int `as` saturates, which is what the error wants.
        return Err(CandidateError::CanvasTooLarge {
            width: width as u32,
            height: height as u32,
            limit: max_side,
        });
    }
    Ok(Dimensions::new(width as u32, height as u32))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Matrix3;

    #[test]
    fn identity_extent_is_image_size() {
        let extent = canvas_extent(Dimensions::new(640, 480), &ProjectiveTransform::identity())
            .unwrap();
        assert_abs_diff_eq!(extent.width(), 640.0);
        assert_abs_diff_eq!(extent.height(), 480.0);
        assert_abs_diff_eq!(extent.min_x, 0.0);
        assert_abs_diff_eq!(extent.min_y, 0.0);
    }

    #[test]
    fn positive_offset_forces_minimum_to_origin() {
        let t = ProjectiveTransform::translation(30.0, 10.0);
        let extent = canvas_extent(Dimensions::new(100, 50), &t).unwrap();
        assert_abs_diff_eq!(extent.min_x, 0.0);
        assert_abs_diff_eq!(extent.min_y, 0.0);
        assert_abs_diff_eq!(extent.width(), 130.0);
        assert_abs_diff_eq!(extent.height(), 60.0);
    }

    #[test]
    fn negative_offset_keeps_negative_minimum() {
        let t = ProjectiveTransform::translation(-25.0, -5.0);
        let extent = canvas_extent(Dimensions::new(100, 50), &t).unwrap();
        assert_abs_diff_eq!(extent.min_x, -25.0);
        assert_abs_diff_eq!(extent.min_y, -5.0);
        assert_abs_diff_eq!(extent.width(), 100.0);
        assert_abs_diff_eq!(extent.height(), 50.0);
    }

    #[test]
    fn corner_at_infinity_is_non_finite() {
        // w = 1 - x / 100 vanishes at the right edge of a 100-wide image.
        let t = ProjectiveTransform::from_matrix(Matrix3::new(
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.01, 0.0, 1.0,
        ))
        .unwrap();
        assert_eq!(
            canvas_extent(Dimensions::new(100, 40), &t),
            Err(CandidateError::NonFiniteExtent)
        );
    }

    #[test]
    fn required_canvas_covers_shifted_candidate() {
        // Base point x maps to candidate x - 60: the candidate extends the
        // base 60 pixels to the right.
        let h = ProjectiveTransform::translation(-60.0, 0.0);
        let inv = h.inverse().unwrap();
        let dims = required_canvas(
            Dimensions::new(100, 80),
            Dimensions::new(100, 80),
            &h,
            &inv,
            10_000,
        )
        .unwrap();
        assert_eq!(dims, Dimensions::new(160, 80));
    }

    #[test]
    fn required_canvas_rounds_up() {
        let h = ProjectiveTransform::translation(-10.25, 0.0);
        let inv = h.inverse().unwrap();
        let dims =
            required_canvas(Dimensions::new(50, 20), Dimensions::new(50, 20), &h, &inv, 1000)
                .unwrap();
        assert_eq!(dims, Dimensions::new(61, 20));
    }

    #[test]
    fn required_canvas_snaps_only_within_epsilon() {
        let dims = Dimensions::new(60, 20);
        let canvas = |shift: f64| {
            let h = ProjectiveTransform::translation(-shift, 0.0);
            let inv = h.inverse().unwrap();
            required_canvas(dims, dims, &h, &inv, 1000).unwrap()
        };
        // Spans of 100 + 5e-7 snap down; 100 + 1e-3 still rounds up.
        assert_eq!(canvas(40.0 + 5e-7), Dimensions::new(100, 20));
        assert_eq!(canvas(40.0 + 1e-3), Dimensions::new(101, 20));
        assert_eq!(canvas(40.0), Dimensions::new(100, 20));
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        let h = ProjectiveTransform::translation(-5000.0, 0.0);
        let inv = h.inverse().unwrap();
        let result = required_canvas(
            Dimensions::new(100, 80),
            Dimensions::new(100, 80),
            &h,
            &inv,
            4096,
        );
        assert_eq!(
            result,
            Err(CandidateError::CanvasTooLarge {
                width: 5100,
                height: 80,
                limit: 4096
            })
        );
    }
}
