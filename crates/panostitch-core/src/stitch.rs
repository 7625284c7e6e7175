//! The incremental stitching loop.
//!
//! Each round scores every remaining candidate against the current
//! composite, picks the one with the highest inlier ratio, and either
//! merges it (growing the canvas) or discards it. Either way the chosen
//! candidate leaves the remaining set, so a run over `N` candidates takes
//! exactly `N` rounds unless it fails or is cancelled.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::composite::merge;
use crate::diagnostics::{
    Clock, Decision, Exclusion, RoundDiagnostics, SkipReason, StitchDiagnostics,
};
use crate::features::{FastBriefExtractor, FeatureExtractor, Features};
use crate::grayscale::feature_grayscale;
use crate::matcher::{BruteForceMatcher, DescriptorMatcher};
use crate::scoring::{PreparedCandidate, score_all, select_best};
use crate::types::{Candidate, CandidateError, Dimensions, StitchConfig, StitchError};

/// Error type a [`RoundSink`] may report.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// Receives the composite after every merge.
///
/// Errors are logged and recorded in diagnostics; they never stop the
/// run.
pub trait RoundSink {
    /// Called with the round index and the new composite.
    ///
    /// # Errors
    ///
    /// Any error the sink wants reported.
    fn merged(&mut self, round: usize, composite: &RgbImage) -> Result<(), SinkError>;
}

/// A sink that discards every composite.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RoundSink for NullSink {
    fn merged(&mut self, _round: usize, _composite: &RgbImage) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<F> RoundSink for F
where
    F: FnMut(usize, &RgbImage) -> Result<(), SinkError>,
{
    fn merged(&mut self, round: usize, composite: &RgbImage) -> Result<(), SinkError> {
        self(round, composite)
    }
}

/// Shared flag that stops a run at the next round boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every clone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct StitchOutput {
    /// Final composite.
    pub panorama: RgbImage,
    /// Per-round record of the run.
    pub diagnostics: StitchDiagnostics,
}

/// Decide what to do with the selected candidate.
///
/// Merges only when the inlier ratio strictly exceeds `min_inlier_ratio`
/// and the required canvas is larger than the current composite on at
/// least one axis.
#[must_use]
pub fn decide(
    inlier_ratio: f64,
    required: Dimensions,
    current: Dimensions,
    min_inlier_ratio: f64,
) -> Decision {
    if inlier_ratio <= min_inlier_ratio {
        Decision::Skip(SkipReason::LowConfidence)
    } else if required.width > current.width || required.height > current.height {
        Decision::Merge
    } else {
        Decision::Skip(SkipReason::NoGrowth)
    }
}

/// Incremental panorama stitcher over pluggable feature backends.
#[derive(Debug, Clone)]
pub struct Stitcher<E, M> {
    config: StitchConfig,
    extractor: E,
    matcher: M,
}

impl Stitcher<FastBriefExtractor, BruteForceMatcher> {
    /// Stitcher using the built-in FAST/BRIEF extractor and brute-force
    /// Hamming matcher.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn with_default_backends(config: StitchConfig) -> Result<Self, StitchError> {
        let extractor = FastBriefExtractor::from_config(&config);
        Self::new(config, extractor, BruteForceMatcher)
    }
}

impl<E, M> Stitcher<E, M>
where
    E: FeatureExtractor + Sync,
    E::Descriptor: Send + Sync,
    M: DescriptorMatcher<E::Descriptor> + Sync,
{
    /// Create a stitcher.
    ///
    /// # Errors
    ///
    /// Returns [`StitchError::InvalidConfig`] if `config` fails
    /// validation.
    pub fn new(config: StitchConfig, extractor: E, matcher: M) -> Result<Self, StitchError> {
        config.validate()?;
        Ok(Self {
            config,
            extractor,
            matcher,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Features of an image's blurred grayscale derivative.
    #[must_use]
    pub fn features(&self, image: &RgbImage) -> Features<E::Descriptor> {
        self.extractor
            .extract(&feature_grayscale(image, self.config.blur_sigma))
    }

    /// Extract every candidate's features, preserving order.
    #[must_use]
    pub fn prepare(&self, candidates: Vec<Candidate>) -> Vec<PreparedCandidate<E::Descriptor>> {
        let prepare = |c: Candidate| {
            let features = self.features(&c.image);
            debug!("{}: {} keypoints", c.id, features.len());
            PreparedCandidate {
                id: c.id,
                image: c.image,
                features,
            }
        };
        if self.config.parallel_scoring {
            candidates.into_par_iter().map(prepare).collect()
        } else {
            candidates.into_iter().map(prepare).collect()
        }
    }

    /// Stitch `candidates` onto `key_frame`.
    ///
    /// After every merge, `sink` receives the round index and the new
    /// composite. `cancel` is checked before each round.
    ///
    /// # Errors
    ///
    /// - [`StitchError::NoViableCandidate`] if no remaining candidate can
    ///   be scored in some round.
    /// - [`StitchError::Cancelled`] if `cancel` fires before the run
    ///   finishes.
    pub fn stitch<C, S>(
        &self,
        key_frame: RgbImage,
        candidates: Vec<Candidate>,
        sink: &mut S,
        clock: &C,
        cancel: &CancelToken,
    ) -> Result<StitchOutput, StitchError>
    where
        C: Clock,
        S: RoundSink + ?Sized,
    {
        let start = clock.now();
        let mut diagnostics = StitchDiagnostics::default();

        let t = clock.now();
        let mut remaining = self.prepare(candidates);
        diagnostics.preparation = clock.elapsed(&t);

        let mut composite = key_frame;
        let mut round = 0;

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                info!("cancelled before round {round}");
                return Err(StitchError::Cancelled { round });
            }

            let t = clock.now();
            let record = self.round(round, &mut composite, &mut remaining, sink)?;
            diagnostics.rounds.push(RoundDiagnostics {
                duration: clock.elapsed(&t),
                ..record
            });
            round += 1;
        }

        diagnostics.total_duration = clock.elapsed(&start);
        info!(
            "stitched {} of {round} candidates into {}",
            diagnostics.merged(),
            Dimensions::of(&composite),
        );
        Ok(StitchOutput {
            panorama: composite,
            diagnostics,
        })
    }

    /// Run one SCORE, DECIDE, MERGE-or-SKIP, ADVANCE cycle.
    ///
    /// The returned record has a zero duration; the caller times it.
    fn round<S: RoundSink + ?Sized>(
        &self,
        round: usize,
        composite: &mut RgbImage,
        remaining: &mut Vec<PreparedCandidate<E::Descriptor>>,
        sink: &mut S,
    ) -> Result<RoundDiagnostics, StitchError> {
        let base = Dimensions::of(composite);
        let base_features = self.features(composite);
        let candidates = remaining.len();
        debug!(
            "round {round}: base {base} with {} keypoints, {candidates} candidates",
            base_features.len(),
        );

        let results = score_all(&base_features, base, remaining, &self.matcher, &self.config);

        let mut excluded: Vec<(String, CandidateError)> = Vec::new();
        for (candidate, result) in remaining.iter().zip(&results) {
            match result {
                Ok(s) => debug!(
                    "round {round}: {} inlier ratio {:.3}, average distance {:.2}, {} correspondences",
                    s.id,
                    s.inlier_ratio,
                    s.average_distance,
                    s.correspondences.len(),
                ),
                Err(e) => {
                    warn!("round {round}: excluding {}: {e}", candidate.id);
                    excluded.push((candidate.id.clone(), e.clone()));
                }
            }
        }

        let Some(best) = select_best(&results) else {
            return Err(StitchError::NoViableCandidate { round, excluded });
        };
        let chosen = remaining.remove(best.index);

        let mut decision = decide(
            best.inlier_ratio,
            best.required,
            base,
            self.config.min_inlier_ratio,
        );
        let mut sink_error = None;

        if decision == Decision::Merge {
            match merge(
                composite,
                &chosen.image,
                &best.inverse,
                best.required,
                self.config.interpolation,
                self.config.crop_threshold,
            ) {
                Some(merged) => {
                    *composite = merged;
                    if let Err(e) = sink.merged(round, composite) {
                        warn!("round {round}: failed to emit composite: {e}");
                        sink_error = Some(e.to_string());
                    }
                }
                None => {
                    warn!("round {round}: cannot warp {} onto the canvas", chosen.id);
                    decision = Decision::Skip(SkipReason::WarpFailed);
                }
            }
        }

        info!(
            "round {round}: {decision} {} (inlier ratio {:.3}, canvas {} -> {})",
            chosen.id,
            best.inlier_ratio,
            base,
            Dimensions::of(composite),
        );

        Ok(RoundDiagnostics {
            round,
            base,
            base_keypoints: base_features.len(),
            candidates,
            excluded: excluded
                .into_iter()
                .map(|(id, e)| Exclusion {
                    id,
                    reason: e.to_string(),
                })
                .collect(),
            chosen: chosen.id,
            inlier_ratio: best.inlier_ratio,
            average_distance: best.average_distance,
            correspondences: best.correspondences.len(),
            required: best.required,
            decision,
            output: Dimensions::of(composite),
            sink_error,
            duration: std::time::Duration::ZERO,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diagnostics::NoClock;

    const GATE: f64 = 0.25;

    #[test]
    fn merge_requires_ratio_strictly_above_gate() {
        let current = Dimensions::new(100, 80);
        let grown = Dimensions::new(160, 80);
        assert_eq!(
            decide(0.25, grown, current, GATE),
            Decision::Skip(SkipReason::LowConfidence)
        );
        assert_eq!(decide(0.250_001, grown, current, GATE), Decision::Merge);
    }

    #[test]
    fn merge_requires_growth_on_some_axis() {
        let current = Dimensions::new(100, 80);
        assert_eq!(
            decide(0.9, Dimensions::new(100, 80), current, GATE),
            Decision::Skip(SkipReason::NoGrowth)
        );
        assert_eq!(
            decide(0.9, Dimensions::new(90, 70), current, GATE),
            Decision::Skip(SkipReason::NoGrowth)
        );
        assert_eq!(
            decide(0.9, Dimensions::new(100, 81), current, GATE),
            Decision::Merge
        );
        assert_eq!(
            decide(0.9, Dimensions::new(101, 10), current, GATE),
            Decision::Merge
        );
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = StitchConfig {
            ratio_threshold: 2.0,
            ..StitchConfig::default()
        };
        assert!(matches!(
            Stitcher::with_default_backends(config),
            Err(StitchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn no_candidates_returns_key_frame() {
        let stitcher = Stitcher::with_default_backends(StitchConfig::default()).unwrap();
        let key = RgbImage::from_pixel(40, 30, image::Rgb([10, 20, 30]));
        let out = stitcher
            .stitch(key.clone(), Vec::new(), &mut NullSink, &NoClock, &CancelToken::new())
            .unwrap();
        assert_eq!(out.panorama, key);
        assert!(out.diagnostics.rounds.is_empty());
    }

    #[test]
    fn featureless_candidates_have_no_viable_candidate() {
        let stitcher = Stitcher::with_default_backends(StitchConfig::default()).unwrap();
        let key = RgbImage::from_pixel(64, 64, image::Rgb([90, 90, 90]));
        let candidates = vec![
            Candidate::new("flat-a", RgbImage::from_pixel(64, 64, image::Rgb([50, 50, 50]))),
            Candidate::new("flat-b", RgbImage::from_pixel(64, 64, image::Rgb([70, 70, 70]))),
        ];
        let err = stitcher
            .stitch(key, candidates, &mut NullSink, &NoClock, &CancelToken::new())
            .unwrap_err();
        assert!(
            matches!(
                &err,
                StitchError::NoViableCandidate { round: 0, excluded }
                    if excluded.len() == 2
                        && excluded
                            .iter()
                            .all(|(_, e)| *e == CandidateError::EmptyCorrespondences)
            ),
            "expected NoViableCandidate in round 0, got {err:?}"
        );
    }

    #[test]
    fn cancelled_token_stops_before_first_round() {
        let stitcher = Stitcher::with_default_backends(StitchConfig::default()).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let err = stitcher
            .stitch(
                RgbImage::new(40, 40),
                vec![Candidate::new("c", RgbImage::new(40, 40))],
                &mut NullSink,
                &NoClock,
                &token,
            )
            .unwrap_err();
        assert!(matches!(err, StitchError::Cancelled { round: 0 }));
    }
}
