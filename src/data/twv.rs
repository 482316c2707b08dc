//! TWV video container format.
//!
//! A TWV file is a fixed-size [`ContainerHeader`] at offset 0 followed by zero or more
//! frame records, each a [`FrameHeader`] immediately followed by the raw pixel bytes of
//! one frame (no compression, no padding).
//!
//! # Layout
//!
//! All fields are Little Endian and packed; nothing depends on host struct layout.
//!
//! Header (57 bytes):
//! - magic: u32 (`0x1A57`)
//! - version: u32 (`20`)
//! - recorded_frames: u32
//! - header_size: u32 (57)
//! - image_to_sample_scale: f64
//! - frame_header_size: u32 (12)
//! - roi width, height, top, left: u32 each
//! - bytes_per_pixel: u8
//! - frame_rate: f32
//! - exposure_ms: f32
//! - gain: f32
//!
//! Frame header (12 bytes):
//! - frame_number: u32
//! - frame_time_seconds: f64
//!
//! The header is written twice: as 57 zero bytes when the file is opened and with real
//! values once recording stops. A file whose magic is still zero was never finalized.

use crate::error::{AppResult, DaqError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic identifier of a finalized container.
pub const TWV_MAGIC: u32 = 0x1A57;

/// Format version written into finalized headers.
pub const TWV_VERSION: u32 = 20;

/// File extension of TWV containers.
pub const TWV_EXTENSION: &str = "twv";

/// Serialized size of [`ContainerHeader`].
pub const HEADER_SIZE: usize = 4 + 4 + 4 + 4 // magic, version, recorded_frames, header_size
    + 8 // calibration
    + 4 // frame_header_size
    + 4 * 4 // roi
    + 1 // bytes_per_pixel
    + 4 + 4 + 4; // frame_rate, exposure, gain

/// Serialized size of [`FrameHeader`].
pub const FRAME_HEADER_SIZE: usize = 4 + 8;

const _: () = assert!(HEADER_SIZE == 57, "TWV header must be 57 bytes");

/// Region of interest of the recorded frames, in sensor pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRoi {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Offset of the first row on the sensor
    pub top: u32,
    /// Offset of the first column on the sensor
    pub left: u32,
}

/// Spatial calibration of the optical path.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationData {
    /// Sample-plane distance per image pixel
    pub image_to_sample_scale: f64,
}

/// Description of every frame record in the container.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameLayout {
    frame_header_size: u32,
    roi: FrameRoi,
    bytes_per_pixel: u8,
    frame_rate: f32,
    exposure_ms: f32,
    gain: f32,
}

impl FrameLayout {
    /// Start a layout; the frame header size is fixed by the format.
    pub fn builder() -> FrameLayoutBuilder {
        FrameLayoutBuilder::default()
    }

    /// Size of the per-frame header in bytes (12 once finalized).
    pub fn frame_header_size(&self) -> u32 {
        self.frame_header_size
    }

    /// Region of interest the frames were captured with.
    pub fn roi(&self) -> FrameRoi {
        self.roi
    }

    /// Bytes per pixel of the recorded pixel data.
    pub fn bytes_per_pixel(&self) -> u8 {
        self.bytes_per_pixel
    }

    /// Acquisition frame rate in frames per second.
    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Exposure time in milliseconds.
    pub fn exposure_ms(&self) -> f32 {
        self.exposure_ms
    }

    /// Sensor gain in decibels.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Pixel bytes in one frame record, or `None` if the product overflows.
    pub fn checked_frame_bytes(&self) -> Option<u64> {
        u64::from(self.roi.width)
            .checked_mul(u64::from(self.roi.height))?
            .checked_mul(u64::from(self.bytes_per_pixel))
    }

    /// Size of one frame record (header + pixels), or `None` if it overflows.
    pub fn checked_record_size(&self) -> Option<u64> {
        self.checked_frame_bytes()?
            .checked_add(FRAME_HEADER_SIZE as u64)
    }

    /// Pixel bytes in one frame record.
    ///
    /// Saturates on layouts too large to address. Use
    /// [`checked_frame_bytes`](Self::checked_frame_bytes) for untrusted headers.
    pub fn frame_bytes(&self) -> usize {
        self.checked_frame_bytes()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(usize::MAX)
    }

    /// Total size of one frame record (header + pixels), saturating like
    /// [`frame_bytes`](Self::frame_bytes).
    pub fn record_size(&self) -> usize {
        self.frame_bytes().saturating_add(FRAME_HEADER_SIZE)
    }
}

/// Builder for [`FrameLayout`]. `frame_header_size` is always [`FRAME_HEADER_SIZE`].
#[derive(Debug, Clone, Default)]
pub struct FrameLayoutBuilder {
    roi: FrameRoi,
    bytes_per_pixel: u8,
    frame_rate: f32,
    exposure_ms: f32,
    gain: f32,
}

impl FrameLayoutBuilder {
    /// Region of interest.
    pub fn roi(mut self, roi: FrameRoi) -> Self {
        self.roi = roi;
        self
    }

    /// Bytes per pixel.
    pub fn bytes_per_pixel(mut self, bytes_per_pixel: u8) -> Self {
        self.bytes_per_pixel = bytes_per_pixel;
        self
    }

    /// Frames per second.
    pub fn frame_rate(mut self, fps: f32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Exposure in milliseconds.
    pub fn exposure_ms(mut self, exposure_ms: f32) -> Self {
        self.exposure_ms = exposure_ms;
        self
    }

    /// Gain in decibels.
    pub fn gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    /// Finish the layout.
    pub fn build(self) -> FrameLayout {
        FrameLayout {
            frame_header_size: FRAME_HEADER_SIZE as u32,
            roi: self.roi,
            bytes_per_pixel: self.bytes_per_pixel,
            frame_rate: self.frame_rate,
            exposure_ms: self.exposure_ms,
            gain: self.gain,
        }
    }
}

/// The fixed-size container header.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ContainerHeader {
    magic: u32,
    version: u32,
    recorded_frames: u32,
    header_size: u32,
    calibration: CalibrationData,
    layout: FrameLayout,
}

impl ContainerHeader {
    /// All-zero header written when a recording is opened.
    pub fn placeholder() -> Self {
        Self::default()
    }

    /// Start a finalized header.
    pub fn builder() -> ContainerHeaderBuilder {
        ContainerHeaderBuilder::default()
    }

    /// [`TWV_MAGIC`] once finalized, 0 for the placeholder.
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// [`TWV_VERSION`] once finalized, 0 for the placeholder.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Frame records the writer accounted for when it finalized.
    pub fn recorded_frames(&self) -> u32 {
        self.recorded_frames
    }

    /// Value of the `header_size` field.
    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// Spatial calibration stored in the header.
    pub fn calibration(&self) -> CalibrationData {
        self.calibration
    }

    /// Layout of every frame record.
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Whether the header was backpatched with real values.
    pub fn is_finalized(&self) -> bool {
        self.magic == TWV_MAGIC
    }

    /// Serialize into exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.recorded_frames);
        buf.put_u32_le(self.header_size);
        buf.put_f64_le(self.calibration.image_to_sample_scale);
        buf.put_u32_le(self.layout.frame_header_size);
        buf.put_u32_le(self.layout.roi.width);
        buf.put_u32_le(self.layout.roi.height);
        buf.put_u32_le(self.layout.roi.top);
        buf.put_u32_le(self.layout.roi.left);
        buf.put_u8(self.layout.bytes_per_pixel);
        buf.put_f32_le(self.layout.frame_rate);
        buf.put_f32_le(self.layout.exposure_ms);
        buf.put_f32_le(self.layout.gain);
        debug_assert_eq!(buf.len(), HEADER_SIZE);
        buf.freeze()
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(DaqError::InvalidContainer(format!(
                "header needs {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        let mut buf = &data[..HEADER_SIZE];
        let magic = buf.get_u32_le();
        let version = buf.get_u32_le();
        let recorded_frames = buf.get_u32_le();
        let header_size = buf.get_u32_le();
        let calibration = CalibrationData {
            image_to_sample_scale: buf.get_f64_le(),
        };
        let frame_header_size = buf.get_u32_le();
        let roi = FrameRoi {
            width: buf.get_u32_le(),
            height: buf.get_u32_le(),
            top: buf.get_u32_le(),
            left: buf.get_u32_le(),
        };
        let layout = FrameLayout {
            frame_header_size,
            roi,
            bytes_per_pixel: buf.get_u8(),
            frame_rate: buf.get_f32_le(),
            exposure_ms: buf.get_f32_le(),
            gain: buf.get_f32_le(),
        };

        let header = Self {
            magic,
            version,
            recorded_frames,
            header_size,
            calibration,
            layout,
        };

        if header.is_finalized() {
            if header.header_size as usize != HEADER_SIZE {
                return Err(DaqError::InvalidContainer(format!(
                    "header_size field is {}, expected {}",
                    header.header_size, HEADER_SIZE
                )));
            }
            let addressable = layout
                .checked_record_size()
                .is_some_and(|size| usize::try_from(size).is_ok());
            if !addressable {
                return Err(DaqError::InvalidContainer(format!(
                    "frame layout {}x{} at {} bytes/pixel is too large",
                    roi.width, roi.height, layout.bytes_per_pixel
                )));
            }
        }
        Ok(header)
    }
}

/// Builder for finalized headers.
///
/// `magic`, `version` and `header_size` are fixed by the format and cannot be set.
#[derive(Debug, Clone, Default)]
pub struct ContainerHeaderBuilder {
    recorded_frames: u32,
    calibration: CalibrationData,
    layout: FrameLayout,
}

impl ContainerHeaderBuilder {
    /// Number of frame records in the file.
    pub fn recorded_frames(mut self, frames: u32) -> Self {
        self.recorded_frames = frames;
        self
    }

    /// Spatial calibration.
    pub fn calibration(mut self, calibration: CalibrationData) -> Self {
        self.calibration = calibration;
        self
    }

    /// Layout of the frame records.
    pub fn layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Finish with magic, version and header size filled in.
    pub fn build(self) -> ContainerHeader {
        ContainerHeader {
            magic: TWV_MAGIC,
            version: TWV_VERSION,
            recorded_frames: self.recorded_frames,
            header_size: HEADER_SIZE as u32,
            calibration: self.calibration,
            layout: self.layout,
        }
    }
}

/// Header preceding the pixel data of each frame record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameHeader {
    /// 0-based position of the frame in the recording
    pub frame_number: u32,
    /// Seconds since the first frame of the recording
    pub frame_time_seconds: f64,
}

impl FrameHeader {
    /// Header for frame `frame_number` captured at `timestamp_ns` in a session that
    /// started at `start_timestamp_ns`.
    pub fn at(frame_number: u32, timestamp_ns: u64, start_timestamp_ns: u64) -> Self {
        let elapsed_ns = timestamp_ns.saturating_sub(start_timestamp_ns);
        Self {
            frame_number,
            frame_time_seconds: elapsed_ns as f64 * 1e-9,
        }
    }

    /// Append the 12 encoded bytes to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.frame_number);
        buf.put_f64_le(self.frame_time_seconds);
    }

    /// Parse from the first [`FRAME_HEADER_SIZE`] bytes of `data`.
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(DaqError::InvalidContainer(format!(
                "frame header needs {} bytes, got {}",
                FRAME_HEADER_SIZE,
                data.len()
            )));
        }
        let mut buf = &data[..FRAME_HEADER_SIZE];
        Ok(Self {
            frame_number: buf.get_u32_le(),
            frame_time_seconds: buf.get_f64_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layout() -> FrameLayout {
        FrameLayout::builder()
            .roi(FrameRoi {
                width: 1920,
                height: 1200,
                top: 4,
                left: 8,
            })
            .bytes_per_pixel(1)
            .frame_rate(20.0)
            .exposure_ms(30.0)
            .gain(1.5)
            .build()
    }

    #[test]
    fn test_placeholder_is_all_zero_and_same_size() {
        let placeholder = ContainerHeader::placeholder().encode();
        let finalized = ContainerHeader::builder()
            .recorded_frames(12)
            .layout(sample_layout())
            .build()
            .encode();
        assert_eq!(placeholder.len(), HEADER_SIZE);
        assert_eq!(finalized.len(), placeholder.len());
        assert!(placeholder.iter().all(|&b| b == 0));
        assert!(!ContainerHeader::placeholder().is_finalized());
    }

    #[test]
    fn test_header_field_offsets() {
        let header = ContainerHeader::builder()
            .recorded_frames(3)
            .calibration(CalibrationData {
                image_to_sample_scale: 2.5,
            })
            .layout(sample_layout())
            .build();
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &0x1A57u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &20u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &57u32.to_le_bytes());
        assert_eq!(&bytes[16..24], &2.5f64.to_le_bytes());
        assert_eq!(&bytes[24..28], &12u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &1920u32.to_le_bytes());
        assert_eq!(&bytes[32..36], &1200u32.to_le_bytes());
        assert_eq!(&bytes[36..40], &4u32.to_le_bytes());
        assert_eq!(&bytes[40..44], &8u32.to_le_bytes());
        assert_eq!(bytes[44], 1);
        assert_eq!(&bytes[45..49], &20.0f32.to_le_bytes());
        assert_eq!(&bytes[49..53], &30.0f32.to_le_bytes());
        assert_eq!(&bytes[53..57], &1.5f32.to_le_bytes());

        let decoded = ContainerHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_finalized());
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(ContainerHeader::decode(&[0u8; 10]).is_err());
        assert!(FrameHeader::decode(&[0u8; 11]).is_err());
    }

    #[test]
    fn test_frame_header_time_arithmetic() {
        let header = FrameHeader::at(2, 1_200_000_000, 1_000_000_000);
        assert_eq!(header.frame_number, 2);
        assert!((header.frame_time_seconds - 0.2).abs() < 1e-12);
        assert_eq!(FrameHeader::at(0, 5, 5).frame_time_seconds, 0.0);

        let mut buf = BytesMut::new();
        header.encode_into(&mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_SIZE);
        assert_eq!(FrameHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_decode_rejects_unaddressable_layout() {
        let huge = FrameLayout::builder()
            .roi(FrameRoi {
                width: u32::MAX,
                height: u32::MAX,
                top: 0,
                left: 0,
            })
            .bytes_per_pixel(2)
            .build();
        assert_eq!(huge.checked_record_size(), None);
        assert_eq!(huge.frame_bytes(), usize::MAX);
        assert_eq!(huge.record_size(), usize::MAX);

        let bytes = ContainerHeader::builder().layout(huge).build().encode();
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(DaqError::InvalidContainer(_))
        ));
    }

    #[test]
    fn test_record_size() {
        let layout = sample_layout();
        assert_eq!(layout.frame_bytes(), 1920 * 1200);
        assert_eq!(layout.record_size(), 1920 * 1200 + 12);
        assert_eq!(layout.frame_header_size(), 12);
    }
}
