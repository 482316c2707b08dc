//! TWV container writer.
//!
//! A [`TwvWriter`] owns one output file for the lifetime of a recording session:
//!
//! 1. [`TwvWriter::open`] resolves the target name, creates missing directories and
//!    writes a placeholder header so the frame region always starts at
//!    [`HEADER_SIZE`].
//! 2. [`TwvWriter::append_frame`] writes one frame record per captured frame. The
//!    first record fixes the pixel length; a frame of any other length is refused
//!    before anything reaches the file.
//! 3. [`TwvWriter::finalize`] seeks back to offset 0 and overwrites the placeholder
//!    with the real header, then closes the file.
//!
//! Dropping a writer (or calling [`TwvWriter::abandon`]) keeps the frame data but
//! leaves the placeholder header in place.
//!
//! # Example
//!
//! ```no_run
//! use twv_daq::data::twv::{CalibrationData, FrameHeader, FrameLayout, FrameRoi};
//! use twv_daq::data::twv_writer::TwvWriter;
//!
//! # fn main() -> twv_daq::error::AppResult<()> {
//! let mut writer = TwvWriter::open("data/clip.twv")?;
//! writer.append_frame(&FrameHeader::at(0, 0, 0), &[0u8; 4])?;
//! let layout = FrameLayout::builder()
//!     .roi(FrameRoi { width: 2, height: 2, top: 0, left: 0 })
//!     .bytes_per_pixel(1)
//!     .build();
//! writer.finalize(layout, CalibrationData { image_to_sample_scale: 1.0 })?;
//! # Ok(())
//! # }
//! ```

use crate::data::twv::{
    CalibrationData, ContainerHeader, FrameHeader, FrameLayout, FRAME_HEADER_SIZE, HEADER_SIZE,
    TWV_EXTENSION,
};
use crate::error::{AppResult, DaqError};
use bytes::BytesMut;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Normalize a requested recording name.
///
/// Backslash separators become `/`, and `.twv` is appended when the name does not
/// already end with it.
pub fn normalize_recording_path(requested: &Path) -> PathBuf {
    let text = requested.to_string_lossy();
    let mut path = if text.contains('\\') {
        PathBuf::from(text.replace('\\', "/"))
    } else {
        requested.to_path_buf()
    };

    let has_extension = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(TWV_EXTENSION));
    if !has_extension {
        let mut name = path.into_os_string();
        name.push(".");
        name.push(TWV_EXTENSION);
        path = PathBuf::from(name);
    }
    path
}

/// Apply the overwrite guard: when `path` already exists, a literal `1` is inserted
/// before the extension.
///
/// The check is made once. If the alternate name exists as well it is used anyway
/// (and truncated on open).
pub fn avoid_collision(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };
    let mut name = OsString::from(stem);
    name.push("1");
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    path.with_file_name(name)
}

/// Writer for a single TWV recording.
#[derive(Debug)]
pub struct TwvWriter {
    path: PathBuf,
    file: BufWriter<File>,
    frames_written: u32,
    pixel_bytes: Option<usize>,
    scratch: BytesMut,
}

impl TwvWriter {
    /// Open a new container for `requested`, returning once the placeholder header is
    /// on disk.
    ///
    /// # Errors
    ///
    /// - [`DaqError::Path`] if the parent directory cannot be created
    /// - [`DaqError::Io`] if the file cannot be created or written
    pub fn open(requested: impl AsRef<Path>) -> AppResult<Self> {
        let path = normalize_recording_path(requested.as_ref());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| DaqError::Path {
                path: path.clone(),
                source,
            })?;
        }

        let path = avoid_collision(&path);
        debug!(path = %path.display(), "Opening TWV container");

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut file = BufWriter::new(file);
        file.write_all(&ContainerHeader::placeholder().encode())?;

        Ok(Self {
            path,
            file,
            frames_written: 0,
            pixel_bytes: None,
            scratch: BytesMut::with_capacity(FRAME_HEADER_SIZE),
        })
    }

    /// Path actually being written (after normalization and collision avoidance).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame records appended so far.
    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Pixel bytes per record, fixed by the first append.
    pub fn pixel_bytes(&self) -> Option<usize> {
        self.pixel_bytes
    }

    /// Append one frame record.
    ///
    /// # Errors
    /// [`DaqError::InvalidContainer`] if `pixels` differs in length from the first
    /// record; the file is left untouched in that case.
    pub fn append_frame(&mut self, header: &FrameHeader, pixels: &[u8]) -> AppResult<()> {
        let next = self
            .frames_written
            .checked_add(1)
            .ok_or_else(|| DaqError::InvalidContainer("frame counter overflow".into()))?;
        if let Some(expected) = self.pixel_bytes {
            if pixels.len() != expected {
                return Err(DaqError::InvalidContainer(format!(
                    "frame {} has {} pixel bytes, records in {} hold {}",
                    header.frame_number,
                    pixels.len(),
                    self.path.display(),
                    expected
                )));
            }
        }

        self.scratch.clear();
        header.encode_into(&mut self.scratch);
        self.file.write_all(&self.scratch)?;
        self.file.write_all(pixels)?;

        self.pixel_bytes.get_or_insert(pixels.len());
        self.frames_written = next;
        Ok(())
    }

    /// Backpatch the header and close the file.
    ///
    /// The header records [`frames_written`](Self::frames_written) frames with the
    /// given layout and calibration. The file is closed whether or not the rewrite
    /// succeeds; on error its header cannot be trusted.
    pub fn finalize(self, layout: FrameLayout, calibration: CalibrationData) -> AppResult<PathBuf> {
        let header = ContainerHeader::builder()
            .recorded_frames(self.frames_written)
            .calibration(calibration)
            .layout(layout)
            .build();

        let path = self.path;
        let frames = self.frames_written;
        let mut file = self
            .file
            .into_inner()
            .map_err(|e| DaqError::Io(e.into_error()))?;

        file.seek(SeekFrom::Start(0))?;
        let encoded = header.encode();
        debug_assert_eq!(encoded.len(), HEADER_SIZE);
        file.write_all(&encoded)?;
        file.flush()?;
        file.sync_data()?;

        debug!(path = %path.display(), frames, "Finalized TWV container");
        Ok(path)
    }

    /// Close the file without rewriting the header.
    ///
    /// Frame data is flushed; the header keeps its placeholder values.
    pub fn abandon(mut self) -> AppResult<PathBuf> {
        warn!(
            path = %self.path.display(),
            frames = self.frames_written,
            "Closing TWV container without finalizing header"
        );
        self.file.flush()?;
        Ok(self.path)
    }
}
