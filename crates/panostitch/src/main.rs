//! panostitch: merge a directory of overlapping photographs into a
//! panorama grown outward from a key frame.
//!
//! Every merge writes the composite so far to
//! `<output_directory>/<round>.JPG`; rounds that skip their candidate
//! write nothing, so file numbers can have gaps.
//!
//! # Usage
//!
//! ```text
//! panostitch [OPTIONS] <IMAGE_DIRECTORY> <KEY_FRAME> <OUTPUT_DIRECTORY>
//! ```
//!
//! Input problems (bad arguments, unreadable directory or key frame,
//! invalid configuration) exit with status 255 before any stitching.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod discover;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use panostitch_core::grayscale::decode_rgb;
use panostitch_core::{
    CancelToken, Candidate, Clock, RgbImage, StitchConfig, Stitcher, WarpInterpolation,
};

use crate::output::FileSink;

/// Exit status for unusable input.
const EXIT_INPUT_ERROR: u8 = 255;

/// Incremental panorama stitcher.
///
/// Repeatedly picks the unmerged frame that best matches the current
/// composite, estimates a homography with RANSAC, and warps it in.
#[derive(Parser)]
#[command(name = "panostitch", version)]
struct Cli {
    /// Directory containing the frames (file names containing "JPG").
    image_dir: PathBuf,

    /// Frame the panorama grows from.
    key_frame: PathBuf,

    /// Directory for per-round composites (created if missing).
    output_dir: PathBuf,

    /// Gaussian blur sigma for feature extraction (0 disables).
    #[arg(long, default_value_t = StitchConfig::DEFAULT_BLUR_SIGMA)]
    blur_sigma: f32,

    /// FAST-9 corner threshold.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_FAST_THRESHOLD)]
    fast_threshold: u8,

    /// Keypoints kept per image, strongest first.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_MAX_KEYPOINTS)]
    max_keypoints: usize,

    /// Lowe ratio test threshold.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RATIO_THRESHOLD)]
    ratio_threshold: f64,

    /// RANSAC inlier threshold in pixels.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_REPROJECTION_THRESHOLD)]
    reprojection_threshold: f64,

    /// RANSAC iteration cap.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_RANSAC_MAX_ITERATIONS)]
    ransac_iterations: usize,

    /// Merge only candidates whose inlier ratio exceeds this.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_MIN_INLIER_RATIO)]
    min_inlier_ratio: f64,

    /// Largest allowed composite side in pixels.
    #[arg(long, default_value_t = StitchConfig::DEFAULT_MAX_CANVAS_SIDE)]
    max_canvas_side: u32,

    /// Fixed RANSAC seed for reproducible output.
    #[arg(long)]
    seed: Option<u64>,

    /// Warp sampling.
    #[arg(long, value_enum, default_value_t = Interp::Bilinear)]
    interpolation: Interp,

    /// Score candidates on one thread.
    #[arg(long)]
    sequential: bool,

    /// Full stitch config as a JSON string.
    ///
    /// When provided, all other stitch parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,

    /// Also save the final panorama here (format from extension).
    #[arg(long = "final")]
    final_path: Option<PathBuf>,

    /// Print diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Stop before the next round once this many seconds have passed.
    #[arg(long, value_parser = parse_seconds)]
    time_limit: Option<Duration>,

    /// Log level (overrides `RUST_LOG`).
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Warp sampling selection.
#[derive(Clone, Copy, ValueEnum)]
enum Interp {
    /// Nearest-neighbour (fastest, blocky).
    Nearest,
    /// Bilinear (smooth).
    Bilinear,
    /// Bicubic (sharpest, slowest).
    Bicubic,
}

/// Log level selection.
#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if secs <= 0.0 {
        return Err(format!("time limit must be positive, got {secs}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

/// Build a [`StitchConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored. Otherwise, a config is
/// assembled from the individual flags. Either way the result is
/// validated.
fn config_from_cli(cli: &Cli) -> Result<StitchConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        StitchConfig {
            blur_sigma: cli.blur_sigma,
            fast_threshold: cli.fast_threshold,
            max_keypoints: cli.max_keypoints,
            ratio_threshold: cli.ratio_threshold,
            reprojection_threshold: cli.reprojection_threshold,
            ransac_max_iterations: cli.ransac_iterations,
            ransac_seed: cli.seed,
            min_inlier_ratio: cli.min_inlier_ratio,
            max_canvas_side: cli.max_canvas_side,
            interpolation: match cli.interpolation {
                Interp::Nearest => WarpInterpolation::Nearest,
                Interp::Bilinear => WarpInterpolation::Bilinear,
                Interp::Bicubic => WarpInterpolation::Bicubic,
            },
            parallel_scoring: !cli.sequential,
            ..StitchConfig::default()
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// `--log-level`, then a non-empty `RUST_LOG`, then `info`.
fn resolve_log_level(cli: &Cli) -> String {
    if let Some(level) = cli.log_level {
        return level.as_str().to_string();
    }
    if let Ok(level) = std::env::var("RUST_LOG")
        && !level.trim().is_empty()
    {
        return level;
    }
    "info".to_string()
}

fn init_logger(level: &str) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_filters(level);
    if let Err(err) = builder.try_init() {
        eprintln!("Failed to initialize logger: {err}");
    }
}

/// Read and decode one frame.
fn load(path: &Path) -> Result<RgbImage, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    decode_rgb(&bytes).map_err(|e| format!("Error decoding {}: {e}", path.display()))
}

/// Decode every discovered frame, skipping the ones that fail.
fn load_candidates(paths: &[PathBuf]) -> Vec<Candidate> {
    paths
        .iter()
        .filter_map(|path| match load(path) {
            Ok(image) => Some(Candidate::new(path.display().to_string(), image)),
            Err(msg) => {
                log::warn!("{msg}; skipping");
                None
            }
        })
        .collect()
}

/// Trip `token` after `limit` on a background thread.
fn arm_watchdog(token: &CancelToken, limit: Duration) {
    let token = token.clone();
    std::thread::spawn(move || {
        std::thread::sleep(limit);
        log::warn!("time limit of {:.1}s reached", limit.as_secs_f64());
        token.cancel();
    });
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::from(EXIT_INPUT_ERROR)
            } else {
                ExitCode::SUCCESS
            };
            let _ = e.print();
            return code;
        }
    };

    init_logger(&resolve_log_level(&cli));

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };

    let key_frame = match load(&cli.key_frame) {
        Ok(image) => image,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };

    let paths = match discover::discover(&cli.image_dir, &cli.key_frame) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_dir.display());
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };

    if let Err(e) = std::fs::create_dir_all(&cli.output_dir) {
        eprintln!("Error creating {}: {e}", cli.output_dir.display());
        return ExitCode::from(EXIT_INPUT_ERROR);
    }

    let candidates = load_candidates(&paths);
    log::info!(
        "key frame {} ({}x{}), {} candidates",
        cli.key_frame.display(),
        key_frame.width(),
        key_frame.height(),
        candidates.len(),
    );

    let stitcher = match Stitcher::with_default_backends(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(EXIT_INPUT_ERROR);
        }
    };

    let cancel = CancelToken::new();
    if let Some(limit) = cli.time_limit {
        arm_watchdog(&cancel, limit);
    }

    let mut sink = FileSink::new(cli.output_dir.clone());
    let result = stitcher.stitch(key_frame, candidates, &mut sink, &StdClock, &cancel);

    let out = match result {
        Ok(out) => out,
        Err(e) => {
            eprintln!("Stitch error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&out.diagnostics) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing diagnostics: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", out.diagnostics.report());
    }

    if let Some(ref path) = cli.final_path {
        match output::save(path, &out.panorama) {
            Ok(()) => log::info!("final panorama written to {}", path.display()),
            Err(e) => {
                eprintln!("Error writing {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    log::info!("{} composites written", sink.written().len());
    ExitCode::SUCCESS
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["panostitch", "frames", "frames/key.JPG", "out"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn missing_positionals_are_a_usage_error() {
        let err = Cli::try_parse_from(["panostitch", "frames"]).err().unwrap();
        assert!(err.use_stderr());
    }

    #[test]
    fn help_is_not_an_error_exit() {
        let err = Cli::try_parse_from(["panostitch", "--help"]).err().unwrap();
        assert!(!err.use_stderr());
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = parse(&[
            "--min-inlier-ratio",
            "0.4",
            "--seed",
            "9",
            "--interpolation",
            "nearest",
            "--sequential",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!((config.min_inlier_ratio - 0.4).abs() < f64::EPSILON);
        assert_eq!(config.ransac_seed, Some(9));
        assert_eq!(config.interpolation, WarpInterpolation::Nearest);
        assert!(!config.parallel_scoring);
    }

    #[test]
    fn defaults_match_core_defaults() {
        let config = config_from_cli(&parse(&[])).unwrap();
        assert_eq!(config, StitchConfig::default());
    }

    #[test]
    fn config_json_overrides_flags() {
        let cli = parse(&[
            "--min-inlier-ratio",
            "0.9",
            "--config-json",
            r#"{"ratio_threshold": 0.6}"#,
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert!((config.ratio_threshold - 0.6).abs() < f64::EPSILON);
        assert!((config.min_inlier_ratio - StitchConfig::DEFAULT_MIN_INLIER_RATIO).abs() < f64::EPSILON);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cli = parse(&["--ratio-threshold", "1.5"]);
        assert!(config_from_cli(&cli).is_err());
        let cli = parse(&["--config-json", "{not json"]);
        assert!(config_from_cli(&cli).unwrap_err().contains("--config-json"));
    }

    #[test]
    fn time_limit_must_be_positive() {
        assert_eq!(parse_seconds("1.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_seconds("0").is_err());
        assert!(parse_seconds("-3").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn undecodable_candidates_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.JPG");
        RgbImage::from_pixel(6, 4, image::Rgb([200, 10, 10]))
            .save_with_format(&good, image::ImageFormat::Jpeg)
            .unwrap();
        let bad = dir.path().join("bad.JPG");
        std::fs::write(&bad, b"not an image").unwrap();

        let loaded = load_candidates(&[bad, good.clone()]);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.display().to_string());
        assert_eq!(loaded[0].image.dimensions(), (6, 4));
    }
}
