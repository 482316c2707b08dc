//! Camera frame types.
//!
//! A driver hands out [`RawFrame`]s in the sensor's native pixel format. The capture
//! loop converts each one with [`RawFrame::convert`] into a [`DecodedFrame`], an
//! immutable pixel buffer plus the chunk metadata the camera attached to it.
//!
//! # Storage
//! Pixel data is a contiguous byte buffer, row-major, no row padding.
//! - `Mono8`: 1 byte per pixel.
//! - `Mono16`: 2 bytes per pixel, Little Endian.

use crate::error::{AppResult, DriverError, DriverErrorKind};
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Pixel format of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit monochrome
    #[default]
    Mono8,
    /// 16-bit monochrome, Little Endian
    Mono16,
}

impl PixelFormat {
    /// Bytes used by one pixel in this format.
    pub fn bytes_per_pixel(self) -> u8 {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PixelFormat::Mono8 => write!(f, "Mono8"),
            PixelFormat::Mono16 => write!(f, "Mono16"),
        }
    }
}

/// Per-frame chunk data reported by the camera.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameMetadata {
    /// Driver frame counter
    pub frame_id: u64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Horizontal ROI offset in pixels
    pub offset_x: u32,
    /// Vertical ROI offset in pixels
    pub offset_y: u32,
    /// Exposure time in microseconds
    pub exposure_us: f64,
    /// Gain in decibels
    pub gain_db: f64,
    /// Whether a sequencer set drove this exposure
    pub sequencer_set_active: bool,
    /// Monotonic hardware timestamp in nanoseconds
    pub timestamp_ns: u64,
    /// Set when the driver flagged the capture as partial or corrupted
    pub incomplete: bool,
    /// Driver image status code (0 when the image is complete)
    pub image_status: i32,
}

impl FrameMetadata {
    /// Pixels in one frame (`width * height`).
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A frame as delivered by the driver, before pixel format conversion.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Sensor pixel format of `data`
    pub format: PixelFormat,
    /// Pixel bytes, row-major
    pub data: Vec<u8>,
    /// Chunk data attached by the camera
    pub metadata: FrameMetadata,
}

impl RawFrame {
    /// Wrap a driver buffer.
    pub fn new(format: PixelFormat, data: Vec<u8>, metadata: FrameMetadata) -> Self {
        Self {
            format,
            data,
            metadata,
        }
    }

    /// Convert into `target` format, consuming (releasing) the raw buffer.
    ///
    /// `Mono16 -> Mono8` keeps the most significant byte of each pixel,
    /// `Mono8 -> Mono16` scales values up by 256.
    pub fn convert(self, target: PixelFormat) -> AppResult<DecodedFrame> {
        let expected = self.metadata.pixel_count() * self.format.bytes_per_pixel() as usize;
        if self.data.len() != expected {
            return Err(DriverError::new(
                "frame",
                DriverErrorKind::Acquisition,
                format!(
                    "Frame {} buffer is {} bytes, expected {} for {}x{} {}",
                    self.metadata.frame_id,
                    self.data.len(),
                    expected,
                    self.metadata.width,
                    self.metadata.height,
                    self.format
                ),
            )
            .into());
        }

        let data = match (self.format, target) {
            (PixelFormat::Mono8, PixelFormat::Mono8) | (PixelFormat::Mono16, PixelFormat::Mono16) => {
                Bytes::from(self.data)
            }
            (PixelFormat::Mono16, PixelFormat::Mono8) => {
                let out: Vec<u8> = self.data.chunks_exact(2).map(|px| px[1]).collect();
                Bytes::from(out)
            }
            (PixelFormat::Mono8, PixelFormat::Mono16) => {
                let mut out = BytesMut::with_capacity(self.data.len() * 2);
                for &px in &self.data {
                    out.extend_from_slice(&(u16::from(px) << 8).to_le_bytes());
                }
                out.freeze()
            }
        };

        Ok(DecodedFrame {
            format: target,
            data,
            metadata: self.metadata,
        })
    }
}

/// A converted, addressable frame. Immutable once produced.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    format: PixelFormat,
    data: Bytes,
    metadata: FrameMetadata,
}

impl DecodedFrame {
    /// Pixel format after conversion.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes, row-major.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Camera chunk data for this frame.
    pub fn metadata(&self) -> &FrameMetadata {
        &self.metadata
    }

    /// Hardware timestamp in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        self.metadata.timestamp_ns
    }

    /// Bytes per pixel of [`format`](Self::format).
    pub fn bytes_per_pixel(&self) -> u8 {
        self.format.bytes_per_pixel()
    }
}
