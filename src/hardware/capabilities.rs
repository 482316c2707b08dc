//! Camera driver seams.
//!
//! The capture pipeline talks to hardware through two traits:
//!
//! - [`DriverContext`]: the driver "system" object. It is constructed explicitly,
//!   owned by whoever starts the camera supervisors, and released when they are done.
//!   It knows how many cameras are attached and hands out [`FrameSource`]s by index.
//! - [`FrameSource`]: one camera. Blocking calls, driven from a single dedicated
//!   thread by the capture loop.
//!
//! # Design Philosophy
//!
//! Unlike the async capability traits used for instrument control, these are
//! synchronous: the capture loop is a tight blocking cycle and `next_frame` is its
//! only suspension point. Errors are [`DaqError`](crate::error::DaqError)s so the
//! supervisor can tell device faults apart from recording faults.

use crate::data::RawFrame;
use crate::error::AppResult;
use crate::hardware::settings::CameraSettings;

/// Capability: Continuous Frame Acquisition
///
/// # Contract
/// - `init` must succeed before any other call
/// - `next_frame` blocks until the driver delivers a frame; it fails if the camera is
///   not streaming
/// - Partial captures are delivered as frames with
///   [`FrameMetadata::incomplete`](crate::data::FrameMetadata::incomplete) set, not as
///   errors
/// - `settings` reflects what the hardware is actually using (after clamping)
pub trait FrameSource: Send {
    /// Driver identifier used in error messages (e.g. "simulated")
    fn driver_type(&self) -> &'static str;

    /// Human readable camera name (model and serial)
    fn name(&self) -> String;

    /// Initialize the camera.
    fn init(&mut self) -> AppResult<()>;

    /// Apply a complete configuration baseline.
    ///
    /// # Returns
    /// The settings actually applied, after clamping to hardware ranges.
    fn apply_configuration(&mut self, settings: &CameraSettings) -> AppResult<CameraSettings>;

    /// Current configuration (ROI, frame rate, exposure, gain, pixel format).
    fn settings(&self) -> AppResult<CameraSettings>;

    fn begin_acquisition(&mut self) -> AppResult<()>;

    fn end_acquisition(&mut self) -> AppResult<()>;

    fn is_streaming(&self) -> bool;

    /// Wait for and return the next frame from the driver queue.
    fn next_frame(&mut self) -> AppResult<RawFrame>;

    /// End acquisition if needed and deinitialize the camera.
    fn close(&mut self) -> AppResult<()>;
}

/// Driver system handle.
///
/// Replaces a process-wide camera registry: every supervisor receives the context it
/// should use, and tests can hand in their own.
pub trait DriverContext: Send + Sync {
    fn driver_type(&self) -> &'static str;

    /// Number of cameras currently attached.
    fn camera_count(&self) -> usize;

    /// Acquire the camera at `index`.
    ///
    /// # Errors
    /// A [`DriverError`](crate::error::DriverError) of kind `NotFound` when no camera
    /// exists at `index`.
    fn open(&self, index: usize) -> AppResult<Box<dyn FrameSource>>;
}
