//! Continuous capture and recording.
//!
//! [`CaptureLoop`] pulls frames from a [`FrameSource`](crate::hardware::FrameSource)
//! forever and, while a recording session is active, appends each one to a TWV
//! container. Sessions are toggled through the [`control`] channel; progress is
//! published as [`CaptureStatus`] snapshots.
//!
//! [`snapshot`] covers the other way of using a camera: a fixed number of stills
//! saved as TIFF files.

pub mod capture_loop;
pub mod control;
pub mod snapshot;

pub use capture_loop::{CaptureLoop, RecordingSession, TickOutcome};
pub use snapshot::{acquire_images, SnapshotReport, SnapshotRequest};
pub use control::{control_channel, ControlCommand, ControlReceiver, ControlSender, TickSignals};

use crate::data::twv::CalibrationData;
use crate::data::PixelFormat;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::watch;

/// Default sample-plane scale: Mitutoyo 50x objective, 0.3 um per pixel.
pub const DEFAULT_CALIBRATION_SCALE: f64 = 1.0 / 0.3;

/// What to do with frames the driver flags as incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncompleteFramePolicy {
    /// Keep the frame as current and record it like any other (logged)
    #[default]
    Record,
    /// Drop the frame: it neither becomes current nor is recorded
    Skip,
}

/// Per-loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Format every frame is converted to before it becomes current
    pub pixel_format: PixelFormat,
    /// Calibration written into every finalized header
    pub calibration: CalibrationData,
    /// Handling of frames flagged incomplete
    pub incomplete_frames: IncompleteFramePolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Mono8,
            calibration: CalibrationData {
                image_to_sample_scale: DEFAULT_CALIBRATION_SCALE,
            },
            incomplete_frames: IncompleteFramePolicy::Record,
        }
    }
}

/// Recording state of a capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CaptureState {
    /// Frames are captured but not stored
    #[default]
    Idle,
    /// Every captured frame is appended to the open container
    Recording,
}

/// Snapshot of a capture loop, published after every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureStatus {
    /// Idle or recording
    pub state: CaptureState,
    /// Container being written while recording
    pub recording_path: Option<PathBuf>,
    /// Frames accepted since the loop started
    pub frames_captured: u64,
    /// Frames dropped under [`IncompleteFramePolicy::Skip`]
    pub frames_skipped: u64,
    /// Records written to the active container
    pub frames_written: u32,
    /// Driver id of the current frame
    pub last_frame_id: Option<u64>,
    /// Last finalized container
    pub last_recording: Option<PathBuf>,
    /// Most recent recording error (open, append or finalize)
    pub last_error: Option<String>,
    /// Set once the loop has exited
    pub stopped: bool,
}

/// Create a status channel seeded with the idle snapshot.
pub fn status_channel() -> (watch::Sender<CaptureStatus>, watch::Receiver<CaptureStatus>) {
    watch::channel(CaptureStatus::default())
}
