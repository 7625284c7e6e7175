//! Writing composites to disk.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use panostitch_core::{RgbImage, RoundSink, SinkError};

/// Writes each merged composite to `<dir>/<round>.JPG`.
///
/// File numbers are round indices, so skipped rounds leave gaps.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl FileSink {
    /// Sink into `dir`, which must already exist.
    pub const fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            written: Vec::new(),
        }
    }

    /// Path used for a round's composite.
    pub fn path_for(&self, round: usize) -> PathBuf {
        self.dir.join(format!("{round}.JPG"))
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl RoundSink for FileSink {
    fn merged(&mut self, round: usize, composite: &RgbImage) -> Result<(), SinkError> {
        let path = self.path_for(round);
        composite.save_with_format(&path, ImageFormat::Jpeg)?;
        log::info!(
            "wrote {} ({}x{})",
            path.display(),
            composite.width(),
            composite.height(),
        );
        self.written.push(path);
        Ok(())
    }
}

/// Save an image, choosing the format from the file extension.
///
/// # Errors
///
/// Returns the encoder or I/O error.
pub fn save(path: &Path, image: &RgbImage) -> Result<(), image::ImageError> {
    image.save(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn merged_rounds_are_written_as_jpeg_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().to_path_buf());
        let img = RgbImage::from_pixel(12, 8, image::Rgb([120, 60, 30]));

        sink.merged(0, &img).unwrap();
        sink.merged(3, &img).unwrap();

        let first = dir.path().join("0.JPG");
        let fourth = dir.path().join("3.JPG");
        assert_eq!(sink.written(), &[first.clone(), fourth.clone()]);
        assert!(!dir.path().join("1.JPG").exists());

        let bytes = std::fs::read(&fourth).unwrap();
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            ImageFormat::Jpeg
        );
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
    }

    #[test]
    fn unwritable_directory_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("missing"));
        let img = RgbImage::new(4, 4);
        assert!(sink.merged(0, &img).is_err());
        assert!(sink.written().is_empty());
    }

    #[test]
    fn save_picks_format_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.png");
        save(&path, &RgbImage::new(3, 2)).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
    }
}
