//! Stitch diagnostics: per-round decisions, scores, and timings.
//!
//! Every [`Stitcher::stitch`](crate::Stitcher::stitch) run returns a
//! [`StitchDiagnostics`] alongside the panorama. It records why each
//! round merged or skipped, which candidates were excluded and why, and
//! how long each round took.
//!
//! Timing goes through the [`Clock`] trait so the core never reads the
//! system clock itself. Durations are serialized as fractional seconds
//! (`f64`), since `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::Dimensions;

/// Source of timestamps for diagnostics.
///
/// The binary supplies an implementation backed by
/// `std::time::Instant`; tests can supply a fake.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// A [`Clock`] that always reports zero elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClock;

impl Clock for NoClock {
    type Instant = ();

    fn now(&self) {}

    fn elapsed(&self, _since: &()) -> Duration {
        Duration::ZERO
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Why a round left the composite untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Inlier ratio did not exceed the merge gate.
    LowConfidence,
    /// The required canvas is no larger than the composite on either axis.
    NoGrowth,
    /// The warp projection could not be built.
    WarpFailed,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::LowConfidence => "low confidence",
            Self::NoGrowth => "no canvas growth",
            Self::WarpFailed => "warp failed",
        })
    }
}

/// Outcome of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// The candidate was warped into the composite.
    Merge,
    /// The candidate was discarded.
    Skip(SkipReason),
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => f.write_str("merge"),
            Self::Skip(reason) => write!(f, "skip ({reason})"),
        }
    }
}

/// A candidate excluded from a round's selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Candidate id.
    pub id: String,
    /// Display form of the [`CandidateError`](crate::CandidateError).
    pub reason: String,
}

/// Diagnostics for one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDiagnostics {
    /// Round index, also the output file number on merge.
    pub round: usize,
    /// Composite size at the start of the round.
    pub base: Dimensions,
    /// Number of keypoints found in the composite.
    pub base_keypoints: usize,
    /// Candidates remaining at the start of the round.
    pub candidates: usize,
    /// Candidates that could not be scored.
    pub excluded: Vec<Exclusion>,
    /// Id of the selected candidate.
    pub chosen: String,
    /// Inlier ratio of the selected candidate.
    pub inlier_ratio: f64,
    /// Mean descriptor distance of the selected candidate.
    pub average_distance: f64,
    /// Correspondences the selected candidate kept after the ratio test.
    pub correspondences: usize,
    /// Canvas size a merge needed.
    pub required: Dimensions,
    /// What happened.
    pub decision: Decision,
    /// Composite size at the end of the round.
    pub output: Dimensions,
    /// Error reported by the round sink, if any.
    pub sink_error: Option<String>,
    /// Wall-clock duration of the round (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

/// Diagnostics collected from a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StitchDiagnostics {
    /// Time spent extracting candidate features up front (seconds).
    #[serde(with = "duration_serde")]
    pub preparation: Duration,
    /// One entry per completed round, in order.
    pub rounds: Vec<RoundDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl StitchDiagnostics {
    /// Number of rounds that merged.
    #[must_use]
    pub fn merged(&self) -> usize {
        self.rounds
            .iter()
            .filter(|r| r.decision == Decision::Merge)
            .count()
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Stitch Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Rounds: {}  |  Merged: {}  |  Skipped: {}",
            self.rounds.len(),
            self.merged(),
            self.rounds.len() - self.merged(),
        ));
        lines.push(format!(
            "Preparation: {:.3}ms  |  Total duration: {:.3}ms",
            duration_ms(self.preparation),
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:>5} {:>10} {:>10} {:>7} {:>11}  {:<24} {}",
            "Round", "Duration", "Base", "Ratio", "Canvas", "Decision", "Chosen"
        ));
        lines.push("-".repeat(90));

        for r in &self.rounds {
            lines.push(format!(
                "{:>5} {:>8.3}ms {:>10} {:>7.3} {:>11}  {:<24} {}",
                r.round,
                duration_ms(r.duration),
                r.base.to_string(),
                r.inlier_ratio,
                r.required.to_string(),
                r.decision.to_string(),
                r.chosen,
            ));
            for e in &r.excluded {
                lines.push(format!("{:>7}excluded {}: {}", "", e.id, e.reason));
            }
            if let Some(ref err) = r.sink_error {
                lines.push(format!("{:>7}output error: {err}", ""));
            }
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
