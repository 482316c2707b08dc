//! Simulated camera driver.
//!
//! Stands in for the vendor SDK in tests, demos and on machines without a camera.
//! Frames carry a deterministic gradient that shifts with the frame number, so any
//! recorded frame can be matched back to the frame that produced it.
//!
//! Timestamps are synthetic: frame `n` is stamped `timestamp_origin_ns + n * period`,
//! where the period comes from `frame_period_ms` or, if unset, from the applied frame
//! rate. With `pace_frames` the camera also sleeps out the period in wall-clock time.

use crate::data::{FrameMetadata, PixelFormat, RawFrame};
use crate::error::{AppResult, DriverError, DriverErrorKind};
use crate::hardware::capabilities::{DriverContext, FrameSource};
use crate::hardware::settings::{CameraSettings, SensorLimits};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const DRIVER_TYPE: &str = "simulated";

/// Image status reported for injected incomplete frames.
pub const SIMULATED_INCOMPLETE_STATUS: i32 = 1;

/// Simulated driver configuration (`[simulation]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of attached cameras
    #[serde(default = "default_cameras")]
    pub cameras: usize,
    /// Fixed frame period in milliseconds, overriding the applied frame rate
    #[serde(default)]
    pub frame_period_ms: Option<f64>,
    /// Timestamp of frame 0 in nanoseconds
    #[serde(default)]
    pub timestamp_origin_ns: u64,
    /// Sleep out each frame period in wall-clock time
    #[serde(default)]
    pub pace_frames: bool,
    /// Pixel format delivered by the sensor before conversion
    #[serde(default = "default_sensor_format")]
    pub sensor_format: PixelFormat,
    /// Flag every n-th frame as incomplete
    #[serde(default)]
    pub incomplete_every: Option<u64>,
    /// Fail acquisition once this many frames have been delivered
    #[serde(default)]
    pub fail_after: Option<u64>,
    /// Fail camera initialization
    #[serde(default)]
    pub fail_init: bool,
}

fn default_cameras() -> usize {
    1
}

fn default_sensor_format() -> PixelFormat {
    PixelFormat::Mono16
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            cameras: default_cameras(),
            frame_period_ms: None,
            timestamp_origin_ns: 0,
            pace_frames: false,
            sensor_format: default_sensor_format(),
            incomplete_every: None,
            fail_after: None,
            fail_init: false,
        }
    }
}

/// Driver context for simulated cameras.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    config: SimulationConfig,
}

impl SimulatedDriver {
    /// Driver exposing `config.cameras` simulated cameras.
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }
}

impl DriverContext for SimulatedDriver {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn camera_count(&self) -> usize {
        self.config.cameras
    }

    fn open(&self, index: usize) -> AppResult<Box<dyn FrameSource>> {
        if index >= self.config.cameras {
            return Err(DriverError::new(
                DRIVER_TYPE,
                DriverErrorKind::NotFound,
                format!(
                    "Camera number {} too big. Total number {}",
                    index, self.config.cameras
                ),
            )
            .into());
        }
        Ok(Box::new(SimulatedCamera::new(index, self.config.clone())))
    }
}

/// One simulated camera.
#[derive(Debug)]
pub struct SimulatedCamera {
    index: usize,
    config: SimulationConfig,
    limits: SensorLimits,
    settings: CameraSettings,
    initialized: bool,
    streaming: bool,
    frame_count: u64,
    last_delivery: Option<Instant>,
}

impl SimulatedCamera {
    /// Camera `index`, uninitialized.
    pub fn new(index: usize, config: SimulationConfig) -> Self {
        Self {
            index,
            config,
            limits: SensorLimits::default(),
            settings: CameraSettings::default(),
            initialized: false,
            streaming: false,
            frame_count: 0,
            last_delivery: None,
        }
    }

    fn frame_period_ns(&self) -> u64 {
        match self.config.frame_period_ms {
            Some(ms) => (ms * 1e6).round() as u64,
            None => (1e9 / self.settings.frame_rate).round() as u64,
        }
    }

    fn error(&self, kind: DriverErrorKind, message: impl Into<String>) -> DriverError {
        DriverError::new(DRIVER_TYPE, kind, message)
    }

    fn require_init(&self, operation: &str) -> AppResult<()> {
        if !self.initialized {
            return Err(self
                .error(
                    DriverErrorKind::Initialization,
                    format!("camera {} not initialized before {}", self.index, operation),
                )
                .into());
        }
        Ok(())
    }

    fn pace(&mut self) {
        if self.config.pace_frames {
            let period = Duration::from_nanos(self.frame_period_ns());
            if let Some(last) = self.last_delivery {
                let elapsed = last.elapsed();
                if elapsed < period {
                    std::thread::sleep(period - elapsed);
                }
            }
        }
        self.last_delivery = Some(Instant::now());
    }
}

impl FrameSource for SimulatedCamera {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> String {
        format!("Simulated BFS-U3-23S3M #{}", self.index)
    }

    fn init(&mut self) -> AppResult<()> {
        if self.config.fail_init {
            return Err(self
                .error(
                    DriverErrorKind::Initialization,
                    format!("camera {} refused to initialize", self.index),
                )
                .into());
        }
        self.initialized = true;
        self.frame_count = 0;
        info!(camera = self.index, "Simulated camera initialized");
        Ok(())
    }

    fn apply_configuration(&mut self, settings: &CameraSettings) -> AppResult<CameraSettings> {
        self.require_init("apply_configuration")?;
        settings.validate()?;
        self.settings = settings.clamped(&self.limits);
        debug!(camera = self.index, settings = ?self.settings, "Applied configuration");
        Ok(self.settings.clone())
    }

    fn settings(&self) -> AppResult<CameraSettings> {
        self.require_init("settings")?;
        Ok(self.settings.clone())
    }

    fn begin_acquisition(&mut self) -> AppResult<()> {
        self.require_init("begin_acquisition")?;
        if !self.streaming {
            self.streaming = true;
            self.last_delivery = None;
            debug!(camera = self.index, "Acquisition started");
        }
        Ok(())
    }

    fn end_acquisition(&mut self) -> AppResult<()> {
        if self.streaming {
            self.streaming = false;
            debug!(camera = self.index, frames = self.frame_count, "Acquisition ended");
        }
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn next_frame(&mut self) -> AppResult<RawFrame> {
        if !self.streaming {
            return Err(self
                .error(
                    DriverErrorKind::Acquisition,
                    format!("camera {} is not streaming", self.index),
                )
                .into());
        }
        if let Some(limit) = self.config.fail_after {
            if self.frame_count >= limit {
                return Err(self
                    .error(
                        DriverErrorKind::Acquisition,
                        format!("simulated acquisition fault after {} frames", limit),
                    )
                    .into());
            }
        }

        self.pace();

        let frame_id = self.frame_count;
        let roi = self.settings.roi;
        let incomplete = self
            .config
            .incomplete_every
            .is_some_and(|n| n > 0 && (frame_id + 1) % n == 0);

        let metadata = FrameMetadata {
            frame_id,
            width: roi.width,
            height: roi.height,
            offset_x: roi.x,
            offset_y: roi.y,
            exposure_us: self.settings.exposure_us,
            gain_db: self.settings.gain_db,
            sequencer_set_active: false,
            timestamp_ns: self.config.timestamp_origin_ns + frame_id * self.frame_period_ns(),
            incomplete,
            image_status: if incomplete {
                SIMULATED_INCOMPLETE_STATUS
            } else {
                0
            },
        };
        let data = gradient(roi.width, roi.height, frame_id, self.config.sensor_format);

        self.frame_count += 1;
        Ok(RawFrame::new(self.config.sensor_format, data, metadata))
    }

    fn close(&mut self) -> AppResult<()> {
        self.end_acquisition()?;
        if self.initialized {
            self.initialized = false;
            info!(camera = self.index, "Simulated camera deinitialized");
        }
        Ok(())
    }
}

/// Diagonal gradient offset by the frame number, encoded little-endian in `format`.
pub fn gradient(width: u32, height: u32, frame_num: u64, format: PixelFormat) -> Vec<u8> {
    let w = width as u64;
    let h = height as u64;
    let span = (w + h).max(1);
    let shift = (frame_num * 257) % 65536;

    let mut buffer =
        Vec::with_capacity((w * h) as usize * format.bytes_per_pixel() as usize);
    for y in 0..h {
        for x in 0..w {
            let value = (((x + y) * 65535 / span + shift) % 65536) as u16;
            match format {
                PixelFormat::Mono8 => buffer.push((value >> 8) as u8),
                PixelFormat::Mono16 => buffer.extend_from_slice(&value.to_le_bytes()),
            }
        }
    }
    buffer
}
