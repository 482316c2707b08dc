//! TWV container reader.
//!
//! Besides reading frames back, the reader is the tool for judging whether a
//! container can be trusted. A recording that was never stopped still carries the
//! all-zero placeholder header, and a recording whose header rewrite failed may
//! undercount its frames. In both cases the file length, not the header, says how
//! many frame records exist, which requires knowing the frame layout.

use crate::data::twv::{ContainerHeader, FrameHeader, FrameLayout, FRAME_HEADER_SIZE, HEADER_SIZE};
use crate::error::{AppResult, DaqError};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Outcome of [`TwvReader::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerCheck {
    /// Header is finalized and matches the data region exactly.
    Consistent {
        /// Frame records in the file.
        frames: u64,
    },
    /// Placeholder header: recording was never finalized.
    Unfinalized {
        /// Complete records under the fallback layout.
        frames_on_disk: u64,
        /// Bytes after the last complete record.
        trailing_bytes: u64,
    },
    /// Header is finalized but disagrees with the data region.
    CountMismatch {
        /// Frame count the header claims.
        header_frames: u64,
        /// Complete records actually present.
        frames_on_disk: u64,
        /// Bytes after the last complete record.
        trailing_bytes: u64,
    },
}

impl ContainerCheck {
    /// Only a consistent container's header can be taken at its word.
    pub fn is_trustworthy(&self) -> bool {
        matches!(self, ContainerCheck::Consistent { .. })
    }
}

/// Reader for a TWV file.
#[derive(Debug)]
pub struct TwvReader {
    path: PathBuf,
    header: ContainerHeader,
    file_len: u64,
    reader: BufReader<File>,
}

impl TwvReader {
    /// Open `path` and decode its header.
    ///
    /// # Errors
    /// [`DaqError::InvalidContainer`] for files shorter than a header, a bad magic
    /// or a finalized layout whose record size cannot be addressed.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => DaqError::InvalidContainer(format!(
                "{} is shorter than a TWV header",
                path.display()
            )),
            _ => DaqError::Io(e),
        })?;
        let header = ContainerHeader::decode(&raw)?;

        Ok(Self {
            path,
            header,
            file_len,
            reader,
        })
    }

    /// Path the reader was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decoded container header.
    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Whether the header was backpatched at the end of a recording.
    pub fn is_finalized(&self) -> bool {
        self.header.is_finalized()
    }

    /// Layout from the header, if the header was finalized.
    pub fn layout(&self) -> Option<FrameLayout> {
        self.is_finalized().then(|| self.header.layout())
    }

    /// Bytes following the header.
    pub fn data_len(&self) -> u64 {
        self.file_len.saturating_sub(HEADER_SIZE as u64)
    }

    /// Complete frame records present on disk for `layout`.
    ///
    /// Zero when a record of `layout` would not fit in the address space.
    pub fn frames_on_disk(&self, layout: &FrameLayout) -> u64 {
        match layout.checked_record_size() {
            Some(record) if record > 0 => self.data_len() / record,
            _ => 0,
        }
    }

    /// Compare the header against the data region.
    ///
    /// `fallback` supplies the layout for unfinalized files; without it an unfinalized
    /// file reports zero frames on disk and all data as trailing bytes.
    pub fn check(&self, fallback: Option<&FrameLayout>) -> ContainerCheck {
        match self.layout() {
            Some(layout) => {
                let frames_on_disk = self.frames_on_disk(&layout);
                let trailing_bytes = self.trailing_bytes(&layout, frames_on_disk);
                let header_frames = u64::from(self.header.recorded_frames());
                if header_frames == frames_on_disk && trailing_bytes == 0 {
                    ContainerCheck::Consistent {
                        frames: frames_on_disk,
                    }
                } else {
                    ContainerCheck::CountMismatch {
                        header_frames,
                        frames_on_disk,
                        trailing_bytes,
                    }
                }
            }
            None => {
                let (frames_on_disk, trailing_bytes) = match fallback {
                    Some(layout) => {
                        let frames = self.frames_on_disk(layout);
                        (frames, self.trailing_bytes(layout, frames))
                    }
                    None => (0, self.data_len()),
                };
                ContainerCheck::Unfinalized {
                    frames_on_disk,
                    trailing_bytes,
                }
            }
        }
    }

    /// Read frame record `index` (header + pixel bytes).
    pub fn read_frame(&mut self, layout: &FrameLayout, index: u64) -> AppResult<(FrameHeader, Vec<u8>)> {
        if index >= self.frames_on_disk(layout) {
            return Err(DaqError::InvalidContainer(format!(
                "frame {} out of range ({} on disk)",
                index,
                self.frames_on_disk(layout)
            )));
        }
        self.seek_record(layout, index)?;

        let mut raw = [0u8; FRAME_HEADER_SIZE];
        self.reader.read_exact(&mut raw)?;
        let header = FrameHeader::decode(&raw)?;
        let mut pixels = vec![0u8; layout.frame_bytes()];
        self.reader.read_exact(&mut pixels)?;
        Ok((header, pixels))
    }

    /// Headers of every complete frame record, skipping pixel data.
    pub fn frame_headers(&mut self, layout: &FrameLayout) -> AppResult<Vec<FrameHeader>> {
        let count = self.frames_on_disk(layout);
        let mut headers = Vec::with_capacity(count as usize);
        let mut raw = [0u8; FRAME_HEADER_SIZE];
        for index in 0..count {
            self.seek_record(layout, index)?;
            self.reader.read_exact(&mut raw)?;
            headers.push(FrameHeader::decode(&raw)?);
        }
        Ok(headers)
    }

    fn trailing_bytes(&self, layout: &FrameLayout, frames: u64) -> u64 {
        let used = layout
            .checked_record_size()
            .and_then(|record| record.checked_mul(frames))
            .unwrap_or(0);
        self.data_len().saturating_sub(used)
    }

    fn seek_record(&mut self, layout: &FrameLayout, index: u64) -> AppResult<()> {
        let offset = HEADER_SIZE as u64 + index * layout.record_size() as u64;
        self.reader.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}
