//! Candidate discovery in the input directory.

use std::io;
use std::path::{Path, PathBuf};

/// File names must contain this to be considered a frame.
pub const FRAME_MARKER: &str = "JPG";

/// List the candidate frames in `dir`, sorted by path.
///
/// A regular file is a candidate when its name contains [`FRAME_MARKER`]
/// (case-sensitive). The key frame is excluded both by exact path and by
/// file name, so a copy of it elsewhere in `dir` is skipped too.
///
/// # Errors
///
/// Returns the I/O error if `dir` cannot be read.
pub fn discover(dir: &Path, key_frame: &Path) -> io::Result<Vec<PathBuf>> {
    let key_name = key_frame.file_name();

    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();

        if !name.to_string_lossy().contains(FRAME_MARKER) || !path.is_file() {
            continue;
        }
        if path == key_frame || key_name == Some(name.as_os_str()) {
            log::debug!("skipping key frame {}", path.display());
            continue;
        }
        frames.push(path);
    }

    frames.sort();
    Ok(frames)
}
