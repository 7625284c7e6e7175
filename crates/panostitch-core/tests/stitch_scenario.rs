//! Integration test: drive the full stitching loop with a synthetic
//! feature backend whose correspondences are known exactly.
//!
//! The backend recognizes each frame by its width and top-left gray
//! level and returns hand-placed keypoints with tag descriptors. Any
//! frame wider than the key frame is treated as a composite built on it,
//! which keeps the key frame's keypoints at their original positions.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use panostitch_core::features::DescriptorDistance;
use panostitch_core::{
    BruteForceMatcher, CancelToken, Candidate, Decision, FeatureExtractor, Features, Keypoint,
    NoClock, NullSink, Point, RgbImage, SinkError, SkipReason, StitchConfig, StitchError,
    Stitcher, WarpInterpolation,
};

use image::{GrayImage, Rgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const KEY_WIDTH: u32 = 100;
const KEY_HEIGHT: u32 = 80;
const KEY_GRAY: u8 = 128;
const A_GRAY: u8 = 100;
const B_WIDTH: u32 = 70;
const B_GRAY: u8 = 50;

/// Candidate A sits this far right of the key frame.
const A_OFFSET: f64 = 60.0;

/// Descriptor identified by a tag: equal tags are close, others far.
#[derive(Debug, Clone, Copy)]
struct Tag(u32);

impl DescriptorDistance for Tag {
    #[allow(clippy::cast_precision_loss)]
    fn distance(&self, other: &Self) -> f32 {
        if self.0 == other.0 {
            1.0
        } else {
            10.0 + self.0.abs_diff(other.0) as f32
        }
    }
}

/// Whole-pixel coordinate in `0..range`.
fn coord(rng: &mut StdRng, range: u32) -> f64 {
    f64::from(rng.gen_range(0..range))
}

struct SceneExtractor {
    key: Features<Tag>,
    a: Features<Tag>,
    b: Features<Tag>,
}

impl FeatureExtractor for SceneExtractor {
    type Descriptor = Tag;

    fn extract(&self, image: &GrayImage) -> Features<Tag> {
        let width = image.width();
        let gray = image.get_pixel(0, 0).0[0];
        if width > KEY_WIDTH || (width == KEY_WIDTH && gray == KEY_GRAY) {
            self.key.clone()
        } else if width == KEY_WIDTH && gray == A_GRAY {
            self.a.clone()
        } else if width == B_WIDTH && gray == B_GRAY {
            self.b.clone()
        } else {
            Features::empty()
        }
    }
}

fn features(entries: Vec<(Point, u32)>) -> Features<Tag> {
    let (points, tags): (Vec<_>, Vec<_>) = entries.into_iter().unzip();
    Features::new(
        points.into_iter().map(|p| Keypoint::at(p, 1.0)).collect(),
        tags.into_iter().map(Tag).collect(),
    )
    .unwrap()
}

/// Key frame keypoints plus A (12 consistent of 20) and B (8 consistent
/// of 40).
fn scene() -> SceneExtractor {
    let mut key = Vec::new();
    let mut a = Vec::new();
    let mut b = Vec::new();

    // A: inliers in the right part of the key frame, shifted left in A.
    for i in 0..12_u32 {
        let p = Point::new(
            f64::from(62 + (i * 7) % 37),
            f64::from(4 + (i * 23) % 73),
        );
        key.push((p, i));
        a.push((Point::new(p.x - A_OFFSET, p.y), i));
    }
    // A: outliers collinear in the key frame, scattered far away in A.
    for k in 0..8_u32 {
        let tag = 12 + k;
        key.push((Point::new(f64::from(64 + 4 * k), f64::from(10 + 7 * k)), tag));
        a.push((
            Point::new(f64::from(500 + 37 * k), f64::from(300 + (53 * k) % 200)),
            tag,
        ));
    }

    // B: eight pairs consistent with a small shift.
    let consistent = [
        (15.0, 12.0),
        (40.0, 60.0),
        (70.0, 20.0),
        (85.0, 55.0),
        (30.0, 35.0),
        (55.0, 8.0),
        (8.0, 70.0),
        (92.0, 30.0),
    ];
    for (j, &(x, y)) in (100_u32..).zip(consistent.iter()) {
        key.push((Point::new(x, y), j));
        b.push((Point::new(x + 10.0, y + 5.0), j));
    }
    // B: unrelated positions on both sides.
    let mut rng = StdRng::seed_from_u64(0x00c0_ffee);
    for j in 108..140_u32 {
        key.push((
            Point::new(coord(&mut rng, KEY_WIDTH), coord(&mut rng, KEY_HEIGHT)),
            j,
        ));
        b.push((Point::new(coord(&mut rng, 2000), coord(&mut rng, 2000)), j));
    }

    SceneExtractor {
        key: features(key),
        a: features(a),
        b: features(b),
    }
}

fn config() -> StitchConfig {
    StitchConfig {
        blur_sigma: 0.0,
        ransac_seed: Some(42),
        // B's consensus is a fifth of its correspondences; give RANSAC
        // room to find it.
        ransac_max_iterations: 20_000,
        interpolation: WarpInterpolation::Nearest,
        ..StitchConfig::default()
    }
}

fn filled(width: u32, height: u32, gray: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([gray, gray, gray]))
}

fn key_frame() -> RgbImage {
    filled(KEY_WIDTH, KEY_HEIGHT, KEY_GRAY)
}

#[test]
fn merges_overlapping_candidate_and_skips_weak_one() {
    let _ = env_logger::builder().is_test(true).try_init();

    let stitcher = Stitcher::new(config(), scene(), BruteForceMatcher).unwrap();
    let candidates = vec![
        Candidate::new("b.JPG", filled(B_WIDTH, B_WIDTH, B_GRAY)),
        Candidate::new("a.JPG", filled(KEY_WIDTH, KEY_HEIGHT, A_GRAY)),
    ];

    let mut emitted = Vec::new();
    let mut sink = |round: usize, composite: &RgbImage| -> Result<(), SinkError> {
        emitted.push((round, composite.dimensions()));
        Ok(())
    };
    let out = stitcher
        .stitch(key_frame(), candidates, &mut sink, &NoClock, &CancelToken::new())
        .expect("stitch should succeed");

    // One merge, emitted under its round index.
    assert_eq!(emitted, vec![(0, (160, 80))]);

    assert_eq!(out.panorama.dimensions(), (160, 80));
    assert_eq!(out.panorama.get_pixel(10, 40), &Rgb([KEY_GRAY; 3]));
    assert_eq!(out.panorama.get_pixel(80, 40), &Rgb([A_GRAY; 3]));
    assert_eq!(out.panorama.get_pixel(150, 40), &Rgb([A_GRAY; 3]));

    let rounds = &out.diagnostics.rounds;
    assert_eq!(rounds.len(), 2, "each candidate takes exactly one round");

    assert_eq!(rounds[0].chosen, "a.JPG");
    assert_eq!(rounds[0].decision, Decision::Merge);
    assert_eq!(rounds[0].candidates, 2);
    assert!((rounds[0].inlier_ratio - 0.6).abs() < 1e-12);
    assert!((rounds[0].average_distance - 1.0).abs() < 1e-12);

    assert_eq!(rounds[1].chosen, "b.JPG");
    assert_eq!(rounds[1].candidates, 1);
    assert_eq!(
        rounds[1].decision,
        Decision::Skip(SkipReason::LowConfidence)
    );
    assert!(rounds[1].inlier_ratio <= 0.25);
    assert_eq!(rounds[1].output, rounds[1].base);
}

#[test]
fn duplicate_of_key_frame_is_skipped_without_touching_composite() {
    let stitcher = Stitcher::new(config(), scene(), BruteForceMatcher).unwrap();
    let key = key_frame();
    let candidates = vec![
        Candidate::new("dup-1.JPG", key.clone()),
        Candidate::new("dup-2.JPG", key.clone()),
        Candidate::new("dup-3.JPG", key.clone()),
    ];

    let out = stitcher
        .stitch(key.clone(), candidates, &mut NullSink, &NoClock, &CancelToken::new())
        .unwrap();

    assert_eq!(out.panorama.as_raw(), key.as_raw());
    assert_eq!(out.diagnostics.rounds.len(), 3);
    for (i, r) in out.diagnostics.rounds.iter().enumerate() {
        assert_eq!(r.round, i);
        assert_eq!(r.candidates, 3 - i);
        assert_eq!(r.decision, Decision::Skip(SkipReason::NoGrowth));
    }
    assert_eq!(out.diagnostics.merged(), 0);
}

#[test]
fn sink_errors_are_recorded_but_not_fatal() {
    let stitcher = Stitcher::new(config(), scene(), BruteForceMatcher).unwrap();
    let candidates = vec![Candidate::new("a.JPG", filled(KEY_WIDTH, KEY_HEIGHT, A_GRAY))];

    let mut sink =
        |_: usize, _: &RgbImage| -> Result<(), SinkError> { Err("disk full".into()) };
    let out = stitcher
        .stitch(key_frame(), candidates, &mut sink, &NoClock, &CancelToken::new())
        .unwrap();

    assert_eq!(out.panorama.dimensions(), (160, 80));
    assert_eq!(
        out.diagnostics.rounds[0].sink_error.as_deref(),
        Some("disk full")
    );
}

#[test]
fn unrecognized_frames_end_the_run_with_no_viable_candidate() {
    let stitcher = Stitcher::new(config(), scene(), BruteForceMatcher).unwrap();
    let candidates = vec![
        Candidate::new("a.JPG", filled(KEY_WIDTH, KEY_HEIGHT, A_GRAY)),
        Candidate::new("blank.JPG", filled(40, 40, 0)),
    ];

    let err = stitcher
        .stitch(key_frame(), candidates, &mut NullSink, &NoClock, &CancelToken::new())
        .unwrap_err();

    // Round 0 merges A; round 1 has only the featureless frame left.
    assert!(
        matches!(
            &err,
            StitchError::NoViableCandidate { round: 1, excluded }
                if excluded.len() == 1 && excluded[0].0 == "blank.JPG"
        ),
        "unexpected error: {err:?}"
    );
}
