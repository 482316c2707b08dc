//! Custom error types for the capture-and-record pipeline.
//!
//! This module defines the primary error type, `DaqError`, used across the crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of failures that can occur, from camera initialization to
//! writing the TWV container to disk.
//!
//! ## Error Hierarchy
//!
//! - **`Driver`**: The camera driver failed (camera absent, init/deinit or
//!   acquisition failure). Fatal to the supervisor thread or worker process that owns
//!   the camera, never to the controller.
//! - **`IncompleteFrame`**: The driver delivered a corrupted or partial frame.
//! - **`Path`**: The output directory for a recording could not be created. Recording
//!   does not start.
//! - **`Io`**: Any other file I/O problem, most notably a failed header backpatch.
//! - **`Config`** / **`Configuration`**: Configuration could not be parsed, or parsed
//!   values are semantically invalid.
//! - **`InvalidContainer`**: A `.twv` file could not be understood by the reader, or
//!   a frame does not fit the records already written.
//! - **`Image`**: A still image could not be encoded.
//! - **`Supervisor`** / **`ChannelClosed`**: The capture unit died or the control
//!   channel to it is gone.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

// =============================================================================
// Driver Errors
// =============================================================================

/// Broad classification of camera driver failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// No camera exists at the requested index.
    NotFound,
    /// Camera initialization or deinitialization failed.
    Initialization,
    /// Settings were rejected or could not be read back.
    Configuration,
    /// Starting, stopping or reading the image stream failed.
    Acquisition,
    /// Releasing the camera failed.
    Shutdown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::NotFound => "not_found",
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Acquisition => "acquisition",
            DriverErrorKind::Shutdown => "shutdown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a camera driver (the "DeviceError" family).
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that raised the error (e.g. "simulated")
    pub driver_type: String,
    /// Failure class
    pub kind: DriverErrorKind,
    /// Driver message
    pub message: String,
}

impl DriverError {
    /// Build a driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Primary error type for the crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Camera driver failure.
    ///
    /// **Error Type**: Permanent for the owning capture unit.
    ///
    /// **Recovery Strategy**: The supervisor tears down the camera and reports the
    /// error; the controller may spawn a new supervisor.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The driver reported a partial capture.
    ///
    /// Whether such frames are persisted is decided by
    /// [`IncompleteFramePolicy`](crate::capture::IncompleteFramePolicy).
    #[error("Incomplete frame {frame_id} (image status {status})")]
    IncompleteFrame {
        /// Driver frame counter
        frame_id: u64,
        /// Driver image status code
        status: i32,
    },

    /// Output directory for a recording could not be created.
    ///
    /// **Recovery Strategy**: Report to the user; recording stays idle.
    #[error("Cannot create output directory for '{}': {source}", path.display())]
    Path {
        /// Target the directory was created for
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Standard I/O operation failed.
    ///
    /// When this comes out of a header backpatch the container must be treated as
    /// corrupt: its header may undercount the frames actually on disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A still image could not be encoded or written.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but are not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A control command or status line could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A `.twv` file is malformed.
    #[error("Invalid TWV container: {0}")]
    InvalidContainer(String),

    /// The capture thread or worker process failed outside of normal error returns.
    #[error("Camera supervisor failed: {0}")]
    Supervisor(String),

    /// The control channel to the capture loop is closed.
    #[error("Control channel closed")]
    ChannelClosed,
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the error originated in the camera driver.
    pub fn is_device_error(&self) -> bool {
        matches!(self, DaqError::Driver(_))
    }
}
