//! Scoring candidates against the current composite and picking the best.

use image::RgbImage;
use rayon::prelude::*;

use crate::correspondence::{
    Correspondence, RATIO_TEST_NEIGHBOURS, average_distance, filter_correspondences, point_pairs,
};
use crate::extent::required_canvas;
use crate::features::{DescriptorDistance, Features};
use crate::homography::{InlierMask, ProjectiveTransform, RansacParams, estimate_homography};
use crate::matcher::DescriptorMatcher;
use crate::types::{CandidateError, Dimensions, StitchConfig};

/// A candidate with its features extracted once for the whole run.
#[derive(Debug, Clone)]
pub struct PreparedCandidate<D> {
    /// Caller-chosen identity.
    pub id: String,
    /// Color image to warp on merge.
    pub image: RgbImage,
    /// Features of the candidate's grayscale derivative.
    pub features: Features<D>,
}

impl<D> PreparedCandidate<D> {
    /// Image size.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::of(&self.image)
    }
}

/// Everything learned about one candidate in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// Position in the remaining set.
    pub index: usize,
    /// Caller-chosen identity.
    pub id: String,
    /// Fraction of correspondences consistent with `transform`.
    pub inlier_ratio: f64,
    /// Mean descriptor distance of the accepted correspondences.
    pub average_distance: f64,
    /// Maps base coordinates onto candidate coordinates.
    pub transform: ProjectiveTransform,
    /// Maps candidate coordinates onto base coordinates.
    pub inverse: ProjectiveTransform,
    /// Per-correspondence inlier flags.
    pub inliers: InlierMask,
    /// Ratio-test survivors used for estimation.
    pub correspondences: Vec<Correspondence>,
    /// Canvas size a merge would produce before cropping.
    pub required: Dimensions,
}

/// Score one candidate against the base.
///
/// The candidate's descriptors are the query set and the base's the
/// reference set.
///
/// # Errors
///
/// Any [`CandidateError`]: the candidate is then ineligible this round.
pub fn score_candidate<D, M>(
    index: usize,
    base: &Features<D>,
    base_dims: Dimensions,
    candidate: &PreparedCandidate<D>,
    matcher: &M,
    config: &StitchConfig,
) -> Result<ScoredCandidate, CandidateError>
where
    D: DescriptorDistance,
    M: DescriptorMatcher<D>,
{
    let knn = matcher.knn_match(
        candidate.features.descriptors(),
        base.descriptors(),
        RATIO_TEST_NEIGHBOURS,
    );
    let correspondences = filter_correspondences(&knn, config.ratio_threshold);
    let average_distance = average_distance(&correspondences)?;

    let pairs = point_pairs(
        &correspondences,
        base.keypoints(),
        candidate.features.keypoints(),
    );
    let estimate = estimate_homography(&pairs, &RansacParams::from_config(config))?;
    let inverse = estimate
        .transform
        .inverse()
        .ok_or(CandidateError::NonInvertible)?;

    let required = required_canvas(
        base_dims,
        candidate.dimensions(),
        &estimate.transform,
        &inverse,
        config.max_canvas_side,
    )?;

    Ok(ScoredCandidate {
        index,
        id: candidate.id.clone(),
        inlier_ratio: estimate.inliers.ratio(),
        average_distance,
        transform: estimate.transform,
        inverse,
        inliers: estimate.inliers,
        correspondences,
        required,
    })
}

/// Score every remaining candidate, index-aligned with `remaining`.
///
/// Runs on the rayon pool when `config.parallel_scoring` is set; the
/// result order is the same either way.
pub fn score_all<D, M>(
    base: &Features<D>,
    base_dims: Dimensions,
    remaining: &[PreparedCandidate<D>],
    matcher: &M,
    config: &StitchConfig,
) -> Vec<Result<ScoredCandidate, CandidateError>>
where
    D: DescriptorDistance + Send + Sync,
    M: DescriptorMatcher<D> + Sync,
{
    let score = |(index, candidate): (usize, &PreparedCandidate<D>)| {
        score_candidate(index, base, base_dims, candidate, matcher, config)
    };
    if config.parallel_scoring {
        remaining.par_iter().enumerate().map(score).collect()
    } else {
        remaining.iter().enumerate().map(score).collect()
    }
}

/// Highest inlier ratio among the successful results.
///
/// Ties go to the earliest result. `None` if every result is an error.
#[must_use]
pub fn select_best(results: &[Result<ScoredCandidate, CandidateError>]) -> Option<&ScoredCandidate> {
    results
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .fold(None, |best: Option<&ScoredCandidate>, scored| match best {
            Some(b) if scored.inlier_ratio <= b.inlier_ratio => Some(b),
            _ => Some(scored),
        })
}
