//! Nearest-neighbour descriptor matching.
//!
//! [`DescriptorMatcher`] is the capability the scorer needs: for each
//! query descriptor, its `k` closest reference descriptors in ascending
//! distance order. [`BruteForceMatcher`] is the exhaustive reference
//! implementation and works for any [`DescriptorDistance`].

use crate::features::DescriptorDistance;

/// One reference descriptor returned by a k-NN query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the reference descriptor set.
    pub reference_index: usize,
    /// Distance between the query and this reference descriptor.
    pub distance: f32,
}

/// Trait for k-nearest-neighbour matching backends.
pub trait DescriptorMatcher<D> {
    /// For every query descriptor, return up to `k` neighbours from
    /// `reference`, nearest first.
    ///
    /// The outer vector is index-aligned with `query`. An inner vector
    /// is shorter than `k` only when `reference` has fewer than `k`
    /// entries.
    fn knn_match(&self, query: &[D], reference: &[D], k: usize) -> Vec<Vec<Neighbor>>;
}

/// Exhaustive k-NN search.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceMatcher;

impl<D: DescriptorDistance> DescriptorMatcher<D> for BruteForceMatcher {
    fn knn_match(&self, query: &[D], reference: &[D], k: usize) -> Vec<Vec<Neighbor>> {
        query
            .iter()
            .map(|q| nearest(q, reference, k))
            .collect()
    }
}

/// The `k` nearest reference descriptors to `query`, ascending.
///
/// Keeps a small sorted buffer instead of sorting every distance, since
/// `k` is tiny (2 for the ratio test) and `reference` can be thousands.
/// Ties keep the lower reference index first.
fn nearest<D: DescriptorDistance>(query: &D, reference: &[D], k: usize) -> Vec<Neighbor> {
    let mut best: Vec<Neighbor> = Vec::with_capacity(k + 1);
    if k == 0 {
        return best;
    }

    for (reference_index, r) in reference.iter().enumerate() {
        let distance = query.distance(r);
        if best.len() == k && best.last().is_some_and(|worst| distance >= worst.distance) {
            continue;
        }
        let at = best.partition_point(|n| n.distance <= distance);
        best.insert(
            at,
            Neighbor {
                reference_index,
                distance,
            },
        );
        best.truncate(k);
    }
    best
}
