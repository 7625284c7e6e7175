//! Feature extraction: keypoints plus descriptors.
//!
//! This module defines the [`FeatureExtractor`] trait the stitching core
//! consumes and ships one implementation, [`FastBriefExtractor`].
//!
//! # Strategy pattern
//!
//! The core only needs locations and a way to compare descriptors
//! ([`DescriptorDistance`]). Any detector/descriptor pair that satisfies
//! the trait can be substituted without touching scoring, estimation, or
//! compositing.

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{Point, StitchConfig};

/// A detected interest point.
///
/// `scale`, `orientation`, and `response` are carried for backends that
/// produce them; the core only reads `position`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Location in image coordinates.
    pub position: Point,
    /// Detection scale (1.0 for single-scale detectors).
    pub scale: f32,
    /// Orientation in radians (0.0 when not estimated).
    pub orientation: f32,
    /// Detector response; higher is stronger.
    pub response: f32,
}

impl Keypoint {
    /// Single-scale, unoriented keypoint.
    #[must_use]
    pub const fn at(position: Point, response: f32) -> Self {
        Self {
            position,
            scale: 1.0,
            orientation: 0.0,
            response,
        }
    }
}

/// Keypoints and their descriptors, index-aligned.
///
/// The descriptor at index `i` describes the keypoint at index `i`.
#[derive(Debug, Clone)]
pub struct Features<D> {
    keypoints: Vec<Keypoint>,
    descriptors: Vec<D>,
}

impl<D> Features<D> {
    /// Pair keypoints with descriptors.
    ///
    /// Returns `None` if the two vectors differ in length.
    #[must_use]
    pub fn new(keypoints: Vec<Keypoint>, descriptors: Vec<D>) -> Option<Self> {
        (keypoints.len() == descriptors.len()).then_some(Self {
            keypoints,
            descriptors,
        })
    }

    /// An empty feature set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    /// Number of keypoints.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Returns `true` if no keypoints were found.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// All keypoints.
    #[must_use]
    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    /// All descriptors, index-aligned with [`keypoints`](Self::keypoints).
    #[must_use]
    pub fn descriptors(&self) -> &[D] {
        &self.descriptors
    }
}

/// Distance between two descriptors of the same kind.
///
/// Must be non-negative and symmetric; smaller means more similar.
pub trait DescriptorDistance {
    /// Distance to `other`.
    fn distance(&self, other: &Self) -> f32;
}

/// Trait for feature extraction backends.
///
/// Input: the grayscale derivative of a frame.
/// Output: keypoints with one descriptor each.
pub trait FeatureExtractor {
    /// Descriptor type produced by this backend.
    type Descriptor: DescriptorDistance;

    /// Detect keypoints and describe them.
    fn extract(&self, image: &GrayImage) -> Features<Self::Descriptor>;
}

/// Number of bytes in a [`BinaryDescriptor`] (256 tests).
pub const BRIEF_BYTES: usize = 32;

/// Half-width of the square patch BRIEF samples from.
pub const BRIEF_PATCH_RADIUS: i32 = 15;

/// Suppression radius applied to FAST responses.
const SUPPRESSION_RADIUS: u32 = 3;

/// A 256-bit BRIEF descriptor compared by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryDescriptor(pub [u8; BRIEF_BYTES]);

impl DescriptorDistance for BinaryDescriptor {
    #[allow(clippy::cast_precision_loss)]
    fn distance(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum::<u32>() as f32
    }
}

/// FAST-9 corners described with unoriented BRIEF.
///
/// Corners are found with [`imageproc::corners::corners_fast9`], thinned
/// by a local non-maximum suppression, ranked by score, and truncated to
/// `max_keypoints`. Corners too close to the border for a full BRIEF
/// patch are dropped.
#[derive(Debug, Clone)]
pub struct FastBriefExtractor {
    threshold: u8,
    max_keypoints: usize,
    pattern: Vec<[(i32, i32); 2]>,
}

impl FastBriefExtractor {
    /// Build an extractor with a pattern drawn from `seed`.
    #[must_use]
    pub fn new(threshold: u8, max_keypoints: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let pattern = (0..BRIEF_BYTES * 8)
            .map(|_| {
                [
                    (
                        rng.gen_range(-BRIEF_PATCH_RADIUS..=BRIEF_PATCH_RADIUS),
                        rng.gen_range(-BRIEF_PATCH_RADIUS..=BRIEF_PATCH_RADIUS),
                    ),
                    (
                        rng.gen_range(-BRIEF_PATCH_RADIUS..=BRIEF_PATCH_RADIUS),
                        rng.gen_range(-BRIEF_PATCH_RADIUS..=BRIEF_PATCH_RADIUS),
                    ),
                ]
            })
            .collect();
        Self {
            threshold,
            max_keypoints,
            pattern,
        }
    }

    /// Build an extractor from the stitch configuration.
    #[must_use]
    pub fn from_config(config: &StitchConfig) -> Self {
        Self::new(
            config.fast_threshold,
            config.max_keypoints,
            config.descriptor_seed,
        )
    }

    fn describe(&self, image: &GrayImage, x: u32, y: u32) -> BinaryDescriptor {
        let mut bits = [0u8; BRIEF_BYTES];
        let (cx, cy) = (x.cast_signed(), y.cast_signed());
        for (i, [a, b]) in self.pattern.iter().enumerate() {
            let v1 = sample(image, cx + a.0, cy + a.1);
            let v2 = sample(image, cx + b.0, cy + b.1);
            if v1 < v2 {
                bits[i / 8] |= 1 << (i % 8);
            }
        }
        BinaryDescriptor(bits)
    }
}

impl FeatureExtractor for FastBriefExtractor {
    type Descriptor = BinaryDescriptor;

    fn extract(&self, image: &GrayImage) -> Features<BinaryDescriptor> {
        let margin = BRIEF_PATCH_RADIUS.unsigned_abs();
        let (w, h) = image.dimensions();
        if w <= 2 * margin || h <= 2 * margin {
            return Features::empty();
        }

        let corners: Vec<imageproc::corners::Corner> =
            imageproc::corners::corners_fast9(image, self.threshold)
                .into_iter()
                .filter(|c| c.x >= margin && c.y >= margin && c.x < w - margin && c.y < h - margin)
                .collect();

        let kept = suppress_non_maximum(corners, w, h, self.max_keypoints);

        let keypoints = kept
            .iter()
            .map(|c| Keypoint::at(Point::new(f64::from(c.x), f64::from(c.y)), c.score))
            .collect();
        let descriptors = kept.iter().map(|c| self.describe(image, c.x, c.y)).collect();

        Features {
            keypoints,
            descriptors,
        }
    }
}

/// Read a pixel, treating out-of-bounds coordinates as black.
fn sample(image: &GrayImage, x: i32, y: i32) -> u8 {
    match (u32::try_from(x), u32::try_from(y)) {
        (Ok(x), Ok(y)) if x < image.width() && y < image.height() => image.get_pixel(x, y).0[0],
        _ => 0,
    }
}

/// Keep the strongest corners, discarding any within
/// [`SUPPRESSION_RADIUS`] of an already kept stronger one.
fn suppress_non_maximum(
    mut corners: Vec<imageproc::corners::Corner>,
    width: u32,
    height: u32,
    limit: usize,
) -> Vec<imageproc::corners::Corner> {
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut occupied = GrayImage::new(width, height);
    let mut kept = Vec::with_capacity(limit.min(corners.len()));
    for corner in corners {
        if kept.len() >= limit {
            break;
        }
        if occupied.get_pixel(corner.x, corner.y).0[0] != 0 {
            continue;
        }
        let x0 = corner.x.saturating_sub(SUPPRESSION_RADIUS);
        let y0 = corner.y.saturating_sub(SUPPRESSION_RADIUS);
        let x1 = (corner.x + SUPPRESSION_RADIUS).min(width - 1);
        let y1 = (corner.y + SUPPRESSION_RADIUS).min(height - 1);
        for y in y0..=y1 {
            for x in x0..=x1 {
                occupied.put_pixel(x, y, image::Luma([1]));
            }
        }
        kept.push(corner);
    }
    kept
}
