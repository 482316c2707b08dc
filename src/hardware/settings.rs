//! Camera configuration value object.
//!
//! All camera properties the pipeline cares about live in one [`CameraSettings`]
//! value, applied in a single [`FrameSource::apply_configuration`] call. Drivers clamp
//! each field to what the sensor supports and report back what was actually applied.
//!
//! [`FrameSource::apply_configuration`]: crate::hardware::FrameSource::apply_configuration

use crate::data::twv::{FrameLayout, FrameRoi};
use crate::data::PixelFormat;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Region of interest on the sensor, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    /// X-coordinate of top-left corner in pixels
    #[serde(default)]
    pub x: u32,
    /// Y-coordinate of top-left corner in pixels
    #[serde(default)]
    pub y: u32,
    /// Width of ROI in pixels
    pub width: u32,
    /// Height of ROI in pixels
    pub height: u32,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1920,
            height: 1200,
        }
    }
}

/// Trigger source for frame acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Free-running at the configured frame rate
    #[default]
    Off,
    /// One frame per software trigger command
    Software,
    /// Hardware trigger on input line 0
    Line0,
}

/// Complete camera configuration baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Exposure time in microseconds
    #[serde(default = "default_exposure_us")]
    pub exposure_us: f64,
    /// Let the camera pick the exposure
    #[serde(default)]
    pub exposure_auto: bool,
    /// Acquisition frame rate in frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Format frames are delivered in after conversion
    #[serde(default)]
    pub pixel_format: PixelFormat,
    /// Sensor region read out
    #[serde(default)]
    pub roi: Roi,
    /// Analog gain in dB
    #[serde(default)]
    pub gain_db: f64,
    /// Let the camera pick the gain
    #[serde(default)]
    pub gain_auto: bool,
    /// Trigger source
    #[serde(default)]
    pub trigger: TriggerMode,
}

fn default_exposure_us() -> f64 {
    30_000.0
}

fn default_frame_rate() -> f64 {
    20.0
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            exposure_us: default_exposure_us(),
            exposure_auto: false,
            frame_rate: default_frame_rate(),
            pixel_format: PixelFormat::Mono8,
            roi: Roi::default(),
            gain_db: 0.0,
            gain_auto: false,
            trigger: TriggerMode::Off,
        }
    }
}

impl CameraSettings {
    /// Reject values no sensor could honour.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.exposure_us.is_finite() && self.exposure_us > 0.0) {
            return Err(DaqError::Configuration(format!(
                "exposure_us must be positive, got {}",
                self.exposure_us
            )));
        }
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(DaqError::Configuration(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.roi.width == 0 || self.roi.height == 0 {
            return Err(DaqError::Configuration(
                "roi width and height must be non-zero".into(),
            ));
        }
        if !self.gain_db.is_finite() {
            return Err(DaqError::Configuration("gain_db must be finite".into()));
        }
        Ok(())
    }

    /// Exposure in milliseconds, as stored in TWV headers.
    pub fn exposure_ms(&self) -> f64 {
        self.exposure_us / 1000.0
    }

    /// TWV frame layout for frames captured with these settings, stored as
    /// `pixel_format`.
    pub fn frame_layout(&self, pixel_format: PixelFormat) -> FrameLayout {
        FrameLayout::builder()
            .roi(FrameRoi {
                width: self.roi.width,
                height: self.roi.height,
                top: self.roi.y,
                left: self.roi.x,
            })
            .bytes_per_pixel(pixel_format.bytes_per_pixel())
            .frame_rate(self.frame_rate as f32)
            .exposure_ms(self.exposure_ms() as f32)
            .gain(self.gain_db as f32)
            .build()
    }

    /// Clamp every field into the range `limits` allows.
    ///
    /// ROI offsets are clamped after the size so the region stays on the sensor.
    pub fn clamped(&self, limits: &SensorLimits) -> Self {
        let width = self.roi.width.clamp(1, limits.max_width);
        let height = self.roi.height.clamp(1, limits.max_height);
        Self {
            exposure_us: self
                .exposure_us
                .clamp(limits.exposure_us.0, limits.exposure_us.1),
            frame_rate: self.frame_rate.clamp(limits.frame_rate.0, limits.frame_rate.1),
            gain_db: self.gain_db.clamp(limits.gain_db.0, limits.gain_db.1),
            roi: Roi {
                x: self.roi.x.min(limits.max_width - width),
                y: self.roi.y.min(limits.max_height - height),
                width,
                height,
            },
            ..self.clone()
        }
    }
}

/// Ranges a sensor accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorLimits {
    /// Full sensor width in pixels
    pub max_width: u32,
    /// Full sensor height in pixels
    pub max_height: u32,
    /// (min, max) exposure in microseconds
    pub exposure_us: (f64, f64),
    /// (min, max) frame rate in fps
    pub frame_rate: (f64, f64),
    /// (min, max) gain in dB
    pub gain_db: (f64, f64),
}

impl Default for SensorLimits {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1200,
            exposure_us: (6.0, 30_000_000.0),
            frame_rate: (1.0, 163.0),
            gain_db: (0.0, 47.99),
        }
    }
}
