//! Still-image acquisition.
//!
//! Outside of continuous capture a camera can take a fixed number of stills:
//! acquisition is started, `count` frames are pulled, every complete one is saved
//! as a TIFF, and acquisition is ended again. Incomplete frames are logged and
//! skipped. They still use up their attempt, so a run of `count` attempts may save
//! fewer files.
//!
//! Files are named `<prefix><YYYY-MM-DD-HH-MM><index:05>.tiff`, where the index is
//! the attempt number. Gaps in the saved indices mark the skipped frames.

use crate::data::tiff_writer::{TiffWriter, TIFF_EXTENSION};
use crate::data::PixelFormat;
use crate::error::{AppResult, DaqError};
use crate::hardware::FrameSource;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to acquire and where to put it.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRequest {
    /// Number of frames to pull from the camera
    pub count: usize,
    /// Path prefix every file name starts with (directory plus base name)
    pub prefix: PathBuf,
    /// Format frames are converted to before saving
    pub pixel_format: PixelFormat,
    /// Time stamped into the file names
    pub taken_at: DateTime<Local>,
}

/// Outcome of [`acquire_images`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotReport {
    /// Files written, in acquisition order
    pub saved: Vec<PathBuf>,
    /// Driver frame ids of the frames skipped as incomplete
    pub incomplete: Vec<u64>,
}

impl SnapshotReport {
    /// Number of stills written.
    pub fn saved_count(&self) -> usize {
        self.saved.len()
    }
}

/// File name for attempt `index`, e.g. `shot2024-05-02-14-0700003.tiff`.
pub fn snapshot_path(prefix: &Path, taken_at: DateTime<Local>, index: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!(
        "{}{:05}.{}",
        taken_at.format("%Y-%m-%d-%H-%M"),
        index,
        TIFF_EXTENSION
    ));
    PathBuf::from(name)
}

/// Acquire `request.count` frames from `source` and save the complete ones.
///
/// `source` must be initialized and configured. Acquisition is ended on return,
/// also when an error cuts the run short.
///
/// # Errors
///
/// - [`DaqError::Path`] if the prefix directory cannot be created
/// - Driver errors from starting acquisition or fetching a frame
/// - [`DaqError::Io`] / [`DaqError::Image`] if a still cannot be written
pub fn acquire_images(
    source: &mut dyn FrameSource,
    request: &SnapshotRequest,
) -> AppResult<SnapshotReport> {
    debug!(count = request.count, prefix = %request.prefix.display(), "Acquiring stills");
    prepare_directory(&request.prefix)?;

    source.begin_acquisition()?;
    let result = save_frames(source, request);
    let ended = source.end_acquisition();

    let report = result?;
    ended?;
    info!(
        saved = report.saved_count(),
        incomplete = report.incomplete.len(),
        "Still acquisition finished"
    );
    Ok(report)
}

fn save_frames(source: &mut dyn FrameSource, request: &SnapshotRequest) -> AppResult<SnapshotReport> {
    let mut report = SnapshotReport::default();
    for index in 0..request.count {
        let raw = source.next_frame()?;
        if raw.metadata.incomplete {
            let err = DaqError::IncompleteFrame {
                frame_id: raw.metadata.frame_id,
                status: raw.metadata.image_status,
            };
            warn!(error = %err, index, "Skipping incomplete still");
            report.incomplete.push(raw.metadata.frame_id);
            continue;
        }

        let frame = raw.convert(request.pixel_format)?;
        let path = snapshot_path(&request.prefix, request.taken_at, index);
        TiffWriter::write_frame(&frame, &path)?;
        report.saved.push(path);
    }
    Ok(report)
}

fn prepare_directory(prefix: &Path) -> AppResult<()> {
    // A prefix ending in a separator names a directory; otherwise its parent
    let text = prefix.as_os_str().to_string_lossy();
    let dir = if text.ends_with('/') || text.ends_with(std::path::MAIN_SEPARATOR) {
        Some(prefix)
    } else {
        prefix.parent()
    };
    match dir.filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => std::fs::create_dir_all(dir).map_err(|source| DaqError::Path {
            path: prefix.to_path_buf(),
            source,
        }),
        None => Ok(()),
    }
}
