//! panostitch-core: Incremental panorama stitching (sans-IO).
//!
//! Grows a panorama from a key frame one image at a time:
//! score candidates -> pick the best -> estimate homography ->
//! warp and blend -> crop -> repeat.
//!
//! This crate has **no I/O dependencies** -- it operates on decoded
//! in-memory images and returns structured data. Directory discovery and
//! writing per-round output live in the `panostitch` binary.
//!
//! Feature detection and descriptor matching sit behind the
//! [`FeatureExtractor`] and [`DescriptorMatcher`] traits. The built-in
//! backends are FAST-9 corners with BRIEF descriptors and an exhaustive
//! Hamming matcher.

pub mod composite;
pub mod correspondence;
pub mod diagnostics;
pub mod extent;
pub mod features;
pub mod grayscale;
pub mod homography;
pub mod matcher;
pub mod scoring;
pub mod stitch;
pub mod types;

pub use diagnostics::{Clock, Decision, NoClock, SkipReason, StitchDiagnostics};
pub use features::{BinaryDescriptor, FastBriefExtractor, FeatureExtractor, Features, Keypoint};
pub use homography::ProjectiveTransform;
pub use matcher::{BruteForceMatcher, DescriptorMatcher, Neighbor};
pub use stitch::{CancelToken, NullSink, RoundSink, SinkError, StitchOutput, Stitcher};
pub use types::{
    Candidate, CandidateError, Dimensions, Point, RgbImage, StitchConfig, StitchError,
    WarpInterpolation,
};

/// Stitch `candidates` onto `key_frame` with the built-in backends.
///
/// Intermediate composites are discarded and no timing is recorded. Use
/// [`Stitcher`] directly for a sink, a clock, or cancellation.
///
/// # Errors
///
/// Returns [`StitchError::InvalidConfig`] if `config` fails validation.
/// Returns [`StitchError::NoViableCandidate`] if some round has no
/// candidate that can be scored.
pub fn stitch(
    key_frame: RgbImage,
    candidates: Vec<Candidate>,
    config: &StitchConfig,
) -> Result<StitchOutput, StitchError> {
    Stitcher::with_default_backends(config.clone())?.stitch(
        key_frame,
        candidates,
        &mut NullSink,
        &NoClock,
        &CancelToken::new(),
    )
}
