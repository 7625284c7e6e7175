//! Shared types for the panostitch alignment and compositing core.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can hand feature backends
/// grayscale rasters without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can supply frames and read
/// the composite without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Returns `true` if both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Sampling used when warping a candidate onto the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WarpInterpolation {
    /// Nearest-neighbour: fastest, blocky.
    Nearest,
    /// Bilinear: smooth, the usual choice for photographs.
    #[default]
    Bilinear,
    /// Bicubic: sharpest, slowest.
    Bicubic,
}

impl WarpInterpolation {
    /// Convert to the `imageproc` interpolation mode.
    pub(crate) const fn to_imageproc(self) -> imageproc::geometric_transformations::Interpolation {
        use imageproc::geometric_transformations::Interpolation;
        match self {
            Self::Nearest => Interpolation::Nearest,
            Self::Bilinear => Interpolation::Bilinear,
            Self::Bicubic => Interpolation::Bicubic,
        }
    }
}

/// Configuration for the stitching core.
///
/// All parameters have sensible defaults; [`validate`](Self::validate)
/// enforces the ranges documented on each field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Gaussian blur sigma applied to the grayscale image before feature
    /// extraction. Non-positive values disable the blur.
    pub blur_sigma: f32,

    /// FAST-9 intensity threshold for corner detection.
    pub fast_threshold: u8,

    /// Maximum number of keypoints kept per image (strongest first).
    /// Must be at least 4.
    pub max_keypoints: usize,

    /// Seed for the BRIEF sampling pattern. Every image in a run must use
    /// the same pattern for descriptors to be comparable.
    pub descriptor_seed: u64,

    /// Lowe ratio test threshold: a match is kept when
    /// `best < ratio_threshold * second_best`. In `(0, 1]`.
    pub ratio_threshold: f64,

    /// RANSAC inlier threshold on reprojection error, in pixels of the
    /// candidate image. Must be positive.
    pub reprojection_threshold: f64,

    /// Upper bound on RANSAC hypotheses per candidate. At least 1.
    pub ransac_max_iterations: usize,

    /// Confidence used for adaptive RANSAC termination. In `(0, 1)`.
    pub ransac_confidence: f64,

    /// Fixed RANSAC seed for reproducible runs. `None` seeds from entropy.
    pub ransac_seed: Option<u64>,

    /// Merge gate: a candidate is merged only if its inlier ratio is
    /// strictly greater than this. In `[0, 1]`.
    pub min_inlier_ratio: f64,

    /// Largest allowed composite side in pixels. Candidates whose
    /// projected canvas exceeds it are excluded from selection.
    pub max_canvas_side: u32,

    /// Crop keeps pixels whose luma is strictly greater than this.
    pub crop_threshold: u8,

    /// Sampling used when warping candidates onto the canvas.
    pub interpolation: WarpInterpolation,

    /// Score the candidates of a round on the rayon thread pool.
    pub parallel_scoring: bool,
}

impl StitchConfig {
    /// Default Gaussian sigma (what a 5x5 kernel with automatic sigma uses).
    pub const DEFAULT_BLUR_SIGMA: f32 = 1.1;
    /// Default FAST-9 threshold.
    pub const DEFAULT_FAST_THRESHOLD: u8 = 20;
    /// Default keypoint budget per image.
    pub const DEFAULT_MAX_KEYPOINTS: usize = 2000;
    /// Default BRIEF pattern seed.
    pub const DEFAULT_DESCRIPTOR_SEED: u64 = 0x5eed_b41e_f00d;
    /// Default Lowe ratio.
    pub const DEFAULT_RATIO_THRESHOLD: f64 = 0.75;
    /// Default RANSAC reprojection threshold in pixels.
    pub const DEFAULT_REPROJECTION_THRESHOLD: f64 = 5.0;
    /// Default RANSAC iteration cap.
    pub const DEFAULT_RANSAC_MAX_ITERATIONS: usize = 2000;
    /// Default RANSAC confidence.
    pub const DEFAULT_RANSAC_CONFIDENCE: f64 = 0.995;
    /// Default merge gate.
    pub const DEFAULT_MIN_INLIER_RATIO: f64 = 0.25;
    /// Default canvas side limit.
    pub const DEFAULT_MAX_CANVAS_SIDE: u32 = 32_768;
    /// Default crop threshold.
    pub const DEFAULT_CROP_THRESHOLD: u8 = 1;

    /// Check every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InvalidConfig`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), StitchError> {
        if self.blur_sigma.is_nan() {
            return Err(StitchError::InvalidConfig("blur_sigma must not be NaN".into()));
        }
        if self.max_keypoints < 4 {
            return Err(StitchError::InvalidConfig(format!(
                "max_keypoints must be at least 4, got {}",
                self.max_keypoints
            )));
        }
        if !(self.ratio_threshold > 0.0 && self.ratio_threshold <= 1.0) {
            return Err(StitchError::InvalidConfig(format!(
                "ratio_threshold must be in (0, 1], got {}",
                self.ratio_threshold
            )));
        }
        if !(self.reprojection_threshold.is_finite() && self.reprojection_threshold > 0.0) {
            return Err(StitchError::InvalidConfig(format!(
                "reprojection_threshold must be positive, got {}",
                self.reprojection_threshold
            )));
        }
        if self.ransac_max_iterations == 0 {
            return Err(StitchError::InvalidConfig(
                "ransac_max_iterations must be at least 1".into(),
            ));
        }
        if !(self.ransac_confidence > 0.0 && self.ransac_confidence < 1.0) {
            return Err(StitchError::InvalidConfig(format!(
                "ransac_confidence must be in (0, 1), got {}",
                self.ransac_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.min_inlier_ratio) {
            return Err(StitchError::InvalidConfig(format!(
                "min_inlier_ratio must be in [0, 1], got {}",
                self.min_inlier_ratio
            )));
        }
        if self.max_canvas_side == 0 {
            return Err(StitchError::InvalidConfig(
                "max_canvas_side must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
            fast_threshold: Self::DEFAULT_FAST_THRESHOLD,
            max_keypoints: Self::DEFAULT_MAX_KEYPOINTS,
            descriptor_seed: Self::DEFAULT_DESCRIPTOR_SEED,
            ratio_threshold: Self::DEFAULT_RATIO_THRESHOLD,
            reprojection_threshold: Self::DEFAULT_REPROJECTION_THRESHOLD,
            ransac_max_iterations: Self::DEFAULT_RANSAC_MAX_ITERATIONS,
            ransac_confidence: Self::DEFAULT_RANSAC_CONFIDENCE,
            ransac_seed: None,
            min_inlier_ratio: Self::DEFAULT_MIN_INLIER_RATIO,
            max_canvas_side: Self::DEFAULT_MAX_CANVAS_SIDE,
            crop_threshold: Self::DEFAULT_CROP_THRESHOLD,
            interpolation: WarpInterpolation::default(),
            parallel_scoring: true,
        }
    }
}

/// An image offered for stitching, identified by a caller-chosen id
/// (typically its path).
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Identity used in logs, diagnostics, and error reports.
    pub id: String,
    /// Decoded color image.
    pub image: RgbImage,
}

impl Candidate {
    /// Create a new candidate.
    #[must_use]
    pub fn new(id: impl Into<String>, image: RgbImage) -> Self {
        Self {
            id: id.into(),
            image,
        }
    }
}

/// Reasons a single candidate cannot take part in a round's selection.
///
/// These never abort a run on their own: the candidate is excluded and
/// the round continues with the others.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CandidateError {
    /// The ratio test left no correspondences.
    #[error("no correspondences survived the ratio test")]
    EmptyCorrespondences,

    /// Fewer correspondences than a projective transform needs.
    #[error("need at least 4 correspondences to estimate a transform, found {found}")]
    TooFewCorrespondences {
        /// Number of correspondences available.
        found: usize,
    },

    /// RANSAC found no hypothesis supported by at least 4 inliers.
    #[error("no consensus set found for a projective transform")]
    NoConsensus,

    /// The estimated transform cannot be inverted.
    #[error("estimated transform is not invertible")]
    NonInvertible,

    /// Projected corner coordinates were not finite.
    #[error("projected canvas corners are not finite")]
    NonFiniteExtent,

    /// The projected canvas exceeds the configured side limit.
    #[error("projected canvas {width}x{height} exceeds the {limit}px side limit")]
    CanvasTooLarge {
        /// Required width in pixels (saturated).
        width: u32,
        /// Required height in pixels (saturated).
        height: u32,
        /// Configured limit.
        limit: u32,
    },
}

/// Errors that abort a stitching run.
#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Stitch configuration is invalid.
    #[error("invalid stitch configuration: {0}")]
    InvalidConfig(String),

    /// Every remaining candidate was excluded, so the round has no best.
    #[error("round {round}: none of the {} remaining candidates could be scored", excluded.len())]
    NoViableCandidate {
        /// Round index that failed.
        round: usize,
        /// Every candidate id with the reason it was excluded.
        excluded: Vec<(String, CandidateError)>,
    },

    /// The run was cancelled before the given round started.
    #[error("cancelled before round {round}")]
    Cancelled {
        /// First round that did not run.
        round: usize,
    },
}
