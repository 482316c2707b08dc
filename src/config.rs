//! Configuration loading using Figment.
//!
//! Configuration is layered:
//! 1. `config/twv_daq.toml` (or the file passed on the command line)
//! 2. Environment variables prefixed with `TWV_DAQ_`, nested with `__`
//!
//! Every field has a default, so an empty or missing file yields a usable setup
//! driving one simulated camera.
//!
//! # Example
//! ```no_run
//! use twv_daq::config::DaqConfig;
//!
//! # fn main() -> twv_daq::error::AppResult<()> {
//! // TWV_DAQ_CAMERA__SETTINGS__FRAME_RATE=40 overrides the file
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Recording to {}", config.recording.output_dir.display());
//! # Ok(())
//! # }
//! ```

use crate::capture::{CaptureConfig, IncompleteFramePolicy, DEFAULT_CALIBRATION_SCALE};
use crate::data::twv::{CalibrationData, TWV_EXTENSION};
use crate::error::{AppResult, DaqError};
use crate::hardware::{CameraSettings, SimulationConfig};
use crate::supervisor::SupervisorConfig;
use chrono::{DateTime, Local};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/twv_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TWV_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// `[application]`: name and logging
    #[serde(default)]
    pub application: ApplicationConfig,
    /// `[camera]`: which camera and its configuration baseline
    #[serde(default)]
    pub camera: CameraConfig,
    /// `[recording]`: output location and header calibration
    #[serde(default)]
    pub recording: RecordingConfig,
    /// `[simulation]`: simulated driver behavior
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name used in log output
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Which camera to drive and how to configure it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera index within the driver
    #[serde(default)]
    pub index: usize,
    /// Driver backend; only "simulated" is built in
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Configuration baseline applied when the camera is opened
    #[serde(default)]
    pub settings: CameraSettings,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            driver: default_driver(),
            settings: CameraSettings::default(),
        }
    }
}

/// Recording output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory relative recording names are resolved against
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Sample-plane distance per image pixel, stored in every header
    #[serde(default = "default_calibration_scale")]
    pub calibration_scale: f64,
    /// Handling of frames the driver flags as incomplete
    #[serde(default)]
    pub incomplete_frames: IncompleteFramePolicy,
    /// File name prefix for stills when none is given
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            calibration_scale: default_calibration_scale(),
            incomplete_frames: IncompleteFramePolicy::default(),
            snapshot_prefix: default_snapshot_prefix(),
        }
    }
}

fn default_name() -> String {
    "twv_daq".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_driver() -> String {
    "simulated".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_calibration_scale() -> f64 {
    DEFAULT_CALIBRATION_SCALE
}

fn default_snapshot_prefix() -> String {
    "snapshot".to_string()
}

impl RecordingConfig {
    /// Resolve a user supplied recording name.
    ///
    /// `None` (or an empty name) produces a date-stamped file in `output_dir`;
    /// relative names are placed under `output_dir`; absolute paths are kept.
    pub fn resolve_path(&self, requested: Option<&Path>) -> PathBuf {
        match requested.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.output_dir.join(path),
            None => self.output_dir.join(timestamped_file_name(Local::now())),
        }
    }

    /// Resolve the prefix for a batch of stills, like [`resolve_path`](Self::resolve_path)
    /// but falling back to `snapshot_prefix` under `output_dir`.
    pub fn resolve_snapshot_prefix(&self, requested: Option<&Path>) -> PathBuf {
        match requested.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.output_dir.join(path),
            None => self.output_dir.join(&self.snapshot_prefix),
        }
    }

    /// Calibration stored in every finalized header.
    pub fn calibration(&self) -> CalibrationData {
        CalibrationData {
            image_to_sample_scale: self.calibration_scale,
        }
    }
}

/// Recording name for `now`, e.g. `2024-05-02-14-07.twv`.
pub fn timestamped_file_name(now: DateTime<Local>) -> String {
    format!("{}.{}", now.format("%Y-%m-%d-%H-%M"), TWV_EXTENSION)
}

impl DaqConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// The layered provider stack, exposed for callers adding their own layers.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.camera.driver != "simulated" {
            return Err(DaqError::Configuration(format!(
                "Unknown camera driver '{}'",
                self.camera.driver
            )));
        }
        self.camera.settings.validate()?;

        if !(self.recording.calibration_scale.is_finite() && self.recording.calibration_scale > 0.0)
        {
            return Err(DaqError::Configuration(format!(
                "calibration_scale must be positive, got {}",
                self.recording.calibration_scale
            )));
        }

        if self.simulation.cameras == 0 {
            return Err(DaqError::Configuration(
                "simulation.cameras must be at least 1".into(),
            ));
        }
        if let Some(period) = self.simulation.frame_period_ms {
            if !(period.is_finite() && period > 0.0) {
                return Err(DaqError::Configuration(format!(
                    "simulation.frame_period_ms must be positive, got {}",
                    period
                )));
            }
        }

        Ok(())
    }

    /// Supervisor setup for `camera_index`.
    pub fn supervisor_config(&self, camera_index: usize) -> SupervisorConfig {
        SupervisorConfig {
            camera_index,
            settings: self.camera.settings.clone(),
            capture: CaptureConfig {
                pixel_format: self.camera.settings.pixel_format,
                calibration: self.recording.calibration(),
                incomplete_frames: self.recording.incomplete_frames,
            },
        }
    }
}
