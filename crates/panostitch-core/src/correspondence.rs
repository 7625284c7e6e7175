//! Ratio-test filtering of k-NN matches into confident correspondences.

use crate::features::Keypoint;
use crate::homography::PointPair;
use crate::matcher::Neighbor;
use crate::types::CandidateError;

/// Number of neighbours requested per query for the ratio test.
pub const RATIO_TEST_NEIGHBOURS: usize = 2;

/// A query keypoint with its two nearest reference descriptors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondenceCandidate {
    /// Index of the query (candidate image) keypoint.
    pub query_index: usize,
    /// Index of the nearest reference (base image) keypoint.
    pub reference_index: usize,
    /// Distance to the nearest reference descriptor.
    pub best_distance: f32,
    /// Distance to the second-nearest reference descriptor.
    pub second_distance: f32,
}

impl CorrespondenceCandidate {
    /// Build from one query's neighbour list.
    ///
    /// Returns `None` when fewer than two neighbours were found.
    #[must_use]
    pub fn from_neighbors(query_index: usize, neighbors: &[Neighbor]) -> Option<Self> {
        match neighbors {
            [best, second, ..] => Some(Self {
                query_index,
                reference_index: best.reference_index,
                best_distance: best.distance,
                second_distance: second.distance,
            }),
            _ => None,
        }
    }

    /// Lowe's ratio test. The boundary is exclusive.
    #[must_use]
    pub fn passes_ratio(&self, ratio_threshold: f64) -> bool {
        f64::from(self.best_distance) < ratio_threshold * f64::from(self.second_distance)
    }
}

/// An accepted query/reference keypoint pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index of the query (candidate image) keypoint.
    pub query_index: usize,
    /// Index of the reference (base image) keypoint.
    pub reference_index: usize,
    /// Descriptor distance of the pairing.
    pub distance: f32,
}

/// Keep the confident 1:1 correspondences from a k-NN result.
///
/// `knn` is index-aligned with the query descriptors, as produced by
/// [`DescriptorMatcher::knn_match`](crate::matcher::DescriptorMatcher::knn_match).
/// Queries with fewer than two neighbours are dropped. The result may be
/// empty.
#[must_use = "returns the filtered correspondences"]
pub fn filter_correspondences(knn: &[Vec<Neighbor>], ratio_threshold: f64) -> Vec<Correspondence> {
    knn.iter()
        .enumerate()
        .filter_map(|(query_index, neighbors)| {
            CorrespondenceCandidate::from_neighbors(query_index, neighbors)
        })
        .filter(|c| c.passes_ratio(ratio_threshold))
        .map(|c| Correspondence {
            query_index: c.query_index,
            reference_index: c.reference_index,
            distance: c.best_distance,
        })
        .collect()
}

/// Mean descriptor distance of a correspondence set.
///
/// # Errors
///
/// Returns [`CandidateError::EmptyCorrespondences`] for an empty set
/// rather than inventing a distance.
#[allow(clippy::cast_precision_loss)]
pub fn average_distance(correspondences: &[Correspondence]) -> Result<f64, CandidateError> {
    if correspondences.is_empty() {
        return Err(CandidateError::EmptyCorrespondences);
    }
    let sum: f64 = correspondences.iter().map(|c| f64::from(c.distance)).sum();
    Ok(sum / correspondences.len() as f64)
}

/// Resolve correspondences to `(reference, query)` point pairs.
///
/// Correspondences whose indices fall outside either keypoint set are
/// skipped.
#[must_use]
pub fn point_pairs(
    correspondences: &[Correspondence],
    reference: &[Keypoint],
    query: &[Keypoint],
) -> Vec<PointPair> {
    correspondences
        .iter()
        .filter_map(|c| {
            let r = reference.get(c.reference_index)?;
            let q = query.get(c.query_index)?;
            Some(PointPair {
                reference: r.position,
                query: q.position,
            })
        })
        .collect()
}
