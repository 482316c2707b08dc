//! TIFF export for still images.
//!
//! Snapshots are written one frame per file as grayscale TIFF, keeping the bit
//! depth of the decoded frame: Mono8 becomes an 8-bit image, Mono16 a 16-bit one.

use crate::data::{DecodedFrame, PixelFormat};
use crate::error::{AppResult, DaqError};
use image::error::{ImageError, ParameterError, ParameterErrorKind};
use image::ExtendedColorType;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// File extension of exported stills.
pub const TIFF_EXTENSION: &str = "tiff";

/// TIFF export for decoded frames.
pub struct TiffWriter;

impl TiffWriter {
    /// Write `frame` to `path`, creating or truncating the file.
    ///
    /// # Errors
    ///
    /// - [`DaqError::Image`] if the pixel buffer does not match the frame size or
    ///   encoding fails
    /// - [`DaqError::Io`] if the file cannot be created
    pub fn write_frame(frame: &DecodedFrame, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let meta = frame.metadata();
        let expected = meta.pixel_count() * frame.bytes_per_pixel() as usize;
        if frame.data().len() != expected {
            return Err(DaqError::Image(ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            ))));
        }

        let color = match frame.format() {
            PixelFormat::Mono8 => ExtendedColorType::L8,
            // Frame data is already little-endian u16
            PixelFormat::Mono16 => ExtendedColorType::L16,
        };

        let writer = BufWriter::new(File::create(path)?);
        image::codecs::tiff::TiffEncoder::new(writer).encode(
            frame.data(),
            meta.width,
            meta.height,
            color,
        )?;

        tracing::debug!(
            path = ?path,
            dimensions = format!("{}x{}", meta.width, meta.height),
            format = %frame.format(),
            "Wrote TIFF"
        );
        Ok(())
    }
}
