//! Projective transforms and their robust estimation.
//!
//! A [`ProjectiveTransform`] is a 3x3 homogeneous matrix. Estimation uses
//! RANSAC over minimal 4-point hypotheses solved with the normalized
//! direct linear transform, followed by a least-squares refit on the
//! winning consensus set.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::types::{CandidateError, Point, StitchConfig};

/// Minimum number of point pairs that determine a homography.
pub const MIN_SAMPLE_SIZE: usize = 4;

/// Homogeneous coordinates with `|w|` below this are points at infinity.
const W_EPSILON: f64 = 1e-12;

/// Normalized determinants below this are treated as singular.
const DET_EPSILON: f64 = 1e-12;

/// Triangles with area below this (in pixels squared) are collinear.
const COLLINEAR_AREA: f64 = 1e-3;

/// A planar projective transform.
///
/// Always finite and invertible; construction rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectiveTransform {
    matrix: Matrix3<f64>,
}

impl ProjectiveTransform {
    /// The identity transform.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    /// A pure translation by `(tx, ty)`.
    #[must_use]
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            matrix: Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0),
        }
    }

    /// Wrap a matrix, scaling it so `h22 = 1` when that entry is usable.
    ///
    /// Returns `None` if any entry is non-finite or the matrix is
    /// singular.
    #[must_use]
    pub fn from_matrix(matrix: Matrix3<f64>) -> Option<Self> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let norm = matrix.norm();
        if norm <= 0.0 || (matrix / norm).determinant().abs() <= DET_EPSILON {
            return None;
        }
        let h22 = matrix[(2, 2)];
        let matrix = if h22.abs() > W_EPSILON {
            matrix / h22
        } else {
            matrix
        };
        Some(Self { matrix })
    }

    /// The underlying matrix.
    #[must_use]
    pub const fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// The inverse transform.
    ///
    /// Returns `None` only if inversion loses finiteness.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        self.matrix.try_inverse().and_then(Self::from_matrix)
    }

    /// Map a point, dividing by the homogeneous coordinate.
    ///
    /// Returns `None` if the point maps to infinity or the result is not
    /// finite.
    #[must_use]
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.matrix * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        if !w.is_finite() || w.abs() <= W_EPSILON {
            return None;
        }
        let mapped = Point::new(v[0] / w, v[1] / w);
        mapped.is_finite().then_some(mapped)
    }

    /// Row-major `f32` entries, as expected by `imageproc` projections.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_row_major_f32(&self) -> [f32; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)] as f32,
            m[(0, 1)] as f32,
            m[(0, 2)] as f32,
            m[(1, 0)] as f32,
            m[(1, 1)] as f32,
            m[(1, 2)] as f32,
            m[(2, 0)] as f32,
            m[(2, 1)] as f32,
            m[(2, 2)] as f32,
        ]
    }
}

/// One correspondence resolved to coordinates.
///
/// The estimated transform maps `reference` onto `query`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointPair {
    /// Point in the reference (base) image.
    pub reference: Point,
    /// Point in the query (candidate) image.
    pub query: Point,
}

/// Inlier classification, one entry per input pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlierMask(Vec<bool>);

impl InlierMask {
    /// Wrap a per-pair classification.
    #[must_use]
    pub const fn new(flags: Vec<bool>) -> Self {
        Self(flags)
    }

    /// Number of inliers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&f| f).count()
    }

    /// Number of classified pairs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no pairs were classified.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fraction of pairs classified inlier, in `[0, 1]`. Zero when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.0.is_empty() {
            0.0
        } else {
            self.count() as f64 / self.0.len() as f64
        }
    }

    /// Per-pair flags.
    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }
}

/// A fitted transform with its consensus set.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    /// Transform mapping reference points onto query points.
    pub transform: ProjectiveTransform,
    /// Which input pairs agree with `transform`.
    pub inliers: InlierMask,
}

/// RANSAC parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacParams {
    /// Inlier threshold on forward reprojection error, in pixels.
    pub threshold: f64,
    /// Upper bound on hypotheses.
    pub max_iterations: usize,
    /// Confidence for adaptive termination.
    pub confidence: f64,
    /// Fixed seed, or `None` to seed from entropy.
    pub seed: Option<u64>,
}

impl RansacParams {
    /// Extract RANSAC parameters from the stitch configuration.
    #[must_use]
    pub const fn from_config(config: &StitchConfig) -> Self {
        Self {
            threshold: config.reprojection_threshold,
            max_iterations: config.ransac_max_iterations,
            confidence: config.ransac_confidence,
            seed: config.ransac_seed,
        }
    }
}

impl Default for RansacParams {
    fn default() -> Self {
        Self::from_config(&StitchConfig::default())
    }
}

/// Robustly estimate the homography mapping `reference` onto `query`.
///
/// # Errors
///
/// - [`CandidateError::TooFewCorrespondences`] for fewer than four pairs.
/// - [`CandidateError::NoConsensus`] if no non-degenerate hypothesis is
///   supported by at least four inliers.
pub fn estimate_homography(
    pairs: &[PointPair],
    params: &RansacParams,
) -> Result<Estimate, CandidateError> {
    let n = pairs.len();
    if n < MIN_SAMPLE_SIZE {
        return Err(CandidateError::TooFewCorrespondences { found: n });
    }

    let mut rng = params
        .seed
        .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    let threshold_sq = params.threshold * params.threshold;

    let mut best: Option<Estimate> = None;
    let mut best_count = 0;
    let mut limit = params.max_iterations;
    let mut iteration = 0;

    while iteration < limit {
        iteration += 1;

        let sample: Vec<PointPair> = rand::seq::index::sample(&mut rng, n, MIN_SAMPLE_SIZE)
            .iter()
            .map(|i| pairs[i])
            .collect();
        if is_degenerate(&sample) {
            continue;
        }
        let Some(model) = fit_dlt(&sample).and_then(ProjectiveTransform::from_matrix) else {
            continue;
        };

        let inliers = classify(&model, pairs, threshold_sq);
        let count = inliers.count();
        if count > best_count {
            best_count = count;
            best = Some(Estimate {
                transform: model,
                inliers,
            });
            limit = limit.min(required_iterations(count, n, params.confidence));
        }
    }

    let Some(best) = best.filter(|_| best_count >= MIN_SAMPLE_SIZE) else {
        return Err(CandidateError::NoConsensus);
    };

    Ok(refine(best, pairs, threshold_sq))
}

/// Refit on the consensus set, keeping the refit only if it does not
/// lose support.
fn refine(estimate: Estimate, pairs: &[PointPair], threshold_sq: f64) -> Estimate {
    let consensus: Vec<PointPair> = pairs
        .iter()
        .zip(estimate.inliers.as_slice())
        .filter_map(|(p, &inlier)| inlier.then_some(*p))
        .collect();

    let Some(refit) = fit_dlt(&consensus).and_then(ProjectiveTransform::from_matrix) else {
        return estimate;
    };
    let inliers = classify(&refit, pairs, threshold_sq);
    if inliers.count() >= estimate.inliers.count() {
        Estimate {
            transform: refit,
            inliers,
        }
    } else {
        estimate
    }
}

/// Classify every pair by squared forward reprojection error.
fn classify(model: &ProjectiveTransform, pairs: &[PointPair], threshold_sq: f64) -> InlierMask {
    InlierMask::new(
        pairs
            .iter()
            .map(|p| {
                model
                    .apply(p.reference)
                    .is_some_and(|mapped| mapped.distance_squared(p.query) <= threshold_sq)
            })
            .collect(),
    )
}

/// Hypotheses needed to draw one all-inlier sample with `confidence`,
/// given the current inlier fraction.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
fn required_iterations(inliers: usize, total: usize, confidence: f64) -> usize {
    let inlier_fraction = inliers as f64 / total as f64;
    let all_inlier = inlier_fraction.powi(MIN_SAMPLE_SIZE as i32);
    if all_inlier >= 1.0 {
        return 1;
    }
    let denominator = (1.0 - all_inlier).ln();
    if denominator >= 0.0 || !denominator.is_finite() {
        return usize::MAX;
    }
    let needed = ((1.0 - confidence).ln() / denominator).ceil();
    if needed.is_finite() && needed >= 1.0 {
        needed as usize
    } else {
        1
    }
}

/// A minimal sample is degenerate if any three of its points are
/// collinear in either image.
fn is_degenerate(sample: &[PointPair]) -> bool {
    let collinear = |pts: [Point; 3]| {
        let [a, b, c] = pts;
        ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs() * 0.5 < COLLINEAR_AREA
    };
    let n = sample.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (a, b, c) = (sample[i], sample[j], sample[k]);
                if collinear([a.reference, b.reference, c.reference])
                    || collinear([a.query, b.query, c.query])
                {
                    return true;
                }
            }
        }
    }
    false
}

/// Similarity that moves the centroid to the origin and scales the mean
/// distance from it to `sqrt(2)`.
#[allow(clippy::cast_precision_loss)]
fn normalizing_transform(points: impl Iterator<Item = Point> + Clone) -> Option<Matrix3<f64>> {
    let count = points.clone().count();
    if count == 0 {
        return None;
    }
    let n = count as f64;
    let (sx, sy) = points
        .clone()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let centroid = Point::new(sx / n, sy / n);
    let mean_distance = points.map(|p| p.distance(centroid)).sum::<f64>() / n;
    if mean_distance <= f64::EPSILON || !mean_distance.is_finite() {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_distance;
    Some(Matrix3::new(
        s,
        0.0,
        -s * centroid.x,
        0.0,
        s,
        -s * centroid.y,
        0.0,
        0.0,
        1.0,
    ))
}

fn transform_point(t: &Matrix3<f64>, p: Point) -> Point {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point::new(v[0] / v[2], v[1] / v[2])
}

/// Normalized DLT over any number (at least four) of pairs.
///
/// Solves for the null vector of `AᵀA` by symmetric eigen-decomposition,
/// which avoids needing a full-width SVD when there are only four pairs.
fn fit_dlt(pairs: &[PointPair]) -> Option<Matrix3<f64>> {
    if pairs.len() < MIN_SAMPLE_SIZE {
        return None;
    }
    let t_ref = normalizing_transform(pairs.iter().map(|p| p.reference))?;
    let t_query = normalizing_transform(pairs.iter().map(|p| p.query))?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for pair in pairs {
        let r = transform_point(&t_ref, pair.reference);
        let q = transform_point(&t_query, pair.query);
        let rows = [
            SVector::<f64, 9>::from_column_slice(&[
                -r.x,
                -r.y,
                -1.0,
                0.0,
                0.0,
                0.0,
                q.x * r.x,
                q.x * r.y,
                q.x,
            ]),
            SVector::<f64, 9>::from_column_slice(&[
                0.0,
                0.0,
                0.0,
                -r.x,
                -r.y,
                -1.0,
                q.y * r.x,
                q.y * r.y,
                q.y,
            ]),
        ];
        for row in &rows {
            ata += row * row.transpose();
        }
    }

    let eigen = ata.symmetric_eigen();
    let h = eigen.eigenvectors.column(eigen.eigenvalues.imin());
    let normalized = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let denormalized = t_query.try_inverse()? * normalized * t_ref;
    denormalized
        .iter()
        .all(|v| v.is_finite())
        .then_some(denormalized)
}
