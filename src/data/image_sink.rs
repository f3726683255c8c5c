//! Destination for completed image transfers.

use crate::error::AppResult;
use bytes::Bytes;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::info;

/// A reassembled image and the local time the transfer completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCapture {
    /// Completion time of the transfer
    pub captured_at: NaiveDateTime,
    /// Payload exactly as reassembled by the frame decoder
    pub bytes: Bytes,
}

/// Persists image captures. Implementations must be safe to call from the reader task.
pub trait ImageSink: Send + Sync {
    /// Store one capture and return where it went.
    fn save(&self, capture: &ImageCapture) -> AppResult<PathBuf>;
}

/// Writes each capture to `image_YYYYMMDD_HHMMSS.jpg` in a directory.
///
/// Two captures completing within the same second get `_1`, `_2`, ... suffixes. Only the
/// most recent second's counter is kept in memory; names already present in the directory
/// (earlier runs, or a wall clock that stepped back) are skipped as well.
pub struct FsImageSink {
    dir: PathBuf,
    last_stem: Mutex<Option<(String, u32)>>,
}

impl FsImageSink {
    /// Create the sink, creating `dir` if needed.
    pub fn new(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            last_stem: Mutex::new(None),
        })
    }

    /// Directory receiving the images.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn claim_file_name(&self, captured_at: NaiveDateTime) -> String {
        let stem = format!("image_{}", captured_at.format("%Y%m%d_%H%M%S"));
        let mut last = self.last_stem.lock();

        let mut suffix = match last.as_ref() {
            Some((previous, next)) if *previous == stem => *next,
            _ => 0,
        };
        let name = |suffix: u32| match suffix {
            0 => format!("{stem}.jpg"),
            n => format!("{stem}_{n}.jpg"),
        };
        while self.dir.join(name(suffix)).exists() {
            suffix += 1;
        }
        let candidate = name(suffix);
        *last = Some((stem, suffix + 1));
        candidate
    }
}

impl ImageSink for FsImageSink {
    fn save(&self, capture: &ImageCapture) -> AppResult<PathBuf> {
        let path = self.dir.join(self.claim_file_name(capture.captured_at));
        std::fs::write(&path, &capture.bytes)?;
        info!(path = %path.display(), bytes = capture.bytes.len(), "Image saved");
        Ok(path)
    }
}
