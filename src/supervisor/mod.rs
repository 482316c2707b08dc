//! Camera session supervision.
//!
//! A [`CameraSupervisor`] owns one camera for its whole lifetime on a dedicated OS
//! thread named `Cam_<index>`:
//!
//! ```text
//! open(index) -> init -> apply_configuration -> begin_acquisition
//!     -> CaptureLoop::run (until Shutdown)
//!     -> end_acquisition -> close
//! ```
//!
//! Errors and panics stay on that thread. The controller learns about them from
//! [`SupervisorHandle::join`], never by unwinding. [`process`] runs the same
//! lifecycle in a child process for address-space isolation.
//!
//! [`snap_images`] is the short lifecycle for stills: open, configure, take a
//! fixed number of frames, release.

pub mod process;

use crate::capture::{
    acquire_images, control_channel, status_channel, CaptureConfig, CaptureLoop, CaptureStatus,
    ControlReceiver, ControlSender, SnapshotReport, SnapshotRequest,
};
use crate::error::{AppResult, DaqError};
use crate::hardware::{CameraSettings, DriverContext, FrameSource};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn};

/// What a supervisor needs to bring one camera up.
#[derive(Debug, Clone, Default)]
pub struct SupervisorConfig {
    /// Camera index within the driver context
    pub camera_index: usize,
    /// Configuration baseline applied before acquisition starts
    pub settings: CameraSettings,
    /// Capture loop settings. The pixel format is taken from the applied settings.
    pub capture: CaptureConfig,
}

/// Spawns camera threads.
pub struct CameraSupervisor;

impl CameraSupervisor {
    /// Spawn the camera thread and return immediately.
    ///
    /// Driver errors (no camera at the index, init failure) surface from
    /// [`SupervisorHandle::join`].
    pub fn spawn(
        driver: Arc<dyn DriverContext>,
        config: SupervisorConfig,
    ) -> AppResult<SupervisorHandle> {
        let (control, receiver) = control_channel();
        let (status_tx, status) = status_channel();
        let index = config.camera_index;

        let join = std::thread::Builder::new()
            .name(format!("Cam_{}", index))
            .spawn(move || {
                let span = info_span!("camera", index);
                let _enter = span.enter();
                let result = run_camera(driver.as_ref(), &config, receiver, status_tx);
                if let Err(e) = &result {
                    error!(error = %e, "Camera session ended with error");
                }
                result
            })?;

        info!(camera = index, "Camera supervisor spawned");
        Ok(SupervisorHandle {
            camera_index: index,
            control,
            status,
            join: Some(join),
        })
    }
}

/// The whole camera lifecycle, run on the supervisor thread.
fn run_camera(
    driver: &dyn DriverContext,
    config: &SupervisorConfig,
    control: ControlReceiver,
    status: watch::Sender<CaptureStatus>,
) -> AppResult<()> {
    let mut source = open_camera(driver, config.camera_index)?;
    let result = bring_up_and_capture(source.as_mut(), config, control, status);
    release_camera(source.as_mut(), result)
}

fn open_camera(driver: &dyn DriverContext, index: usize) -> AppResult<Box<dyn FrameSource>> {
    let attached = driver.camera_count();
    debug!(driver = driver.driver_type(), attached, index, "Opening camera");
    let source = driver.open(index).inspect_err(|e| {
        error!(error = %e, attached, index, "Camera not available");
    })?;
    info!(name = %source.name(), "Camera opened");
    Ok(source)
}

fn release_camera<T>(source: &mut dyn FrameSource, result: AppResult<T>) -> AppResult<T> {
    if let Err(e) = source.end_acquisition() {
        warn!(error = %e, "end_acquisition failed");
    }
    let closed = source.close();
    info!("Camera released");
    let value = result?;
    closed?;
    Ok(value)
}

/// Take stills with the camera at `camera_index` on the calling thread.
///
/// The camera is opened, initialized and configured with `settings`, then
/// [`acquire_images`] runs `request`. The camera is closed afterwards whether or
/// not the acquisition succeeded. Frames are saved in the pixel format the camera
/// applied, regardless of `request.pixel_format`.
///
/// # Errors
/// Driver errors from any lifecycle step, or the acquisition's own error.
pub fn snap_images(
    driver: &dyn DriverContext,
    camera_index: usize,
    settings: &CameraSettings,
    request: &SnapshotRequest,
) -> AppResult<SnapshotReport> {
    let mut source = open_camera(driver, camera_index)?;
    let result = configure(source.as_mut(), settings).and_then(|applied| {
        let request = SnapshotRequest {
            pixel_format: applied.pixel_format,
            ..request.clone()
        };
        acquire_images(source.as_mut(), &request)
    });
    release_camera(source.as_mut(), result)
}

fn configure(source: &mut dyn FrameSource, settings: &CameraSettings) -> AppResult<CameraSettings> {
    source.init()?;
    let applied = source.apply_configuration(settings)?;
    if &applied != settings {
        info!(applied = ?applied, "Camera clamped the configuration baseline");
    }
    Ok(applied)
}

fn bring_up_and_capture(
    source: &mut dyn FrameSource,
    config: &SupervisorConfig,
    control: ControlReceiver,
    status: watch::Sender<CaptureStatus>,
) -> AppResult<()> {
    let applied = configure(source, &config.settings)?;
    source.begin_acquisition()?;

    let capture = CaptureConfig {
        pixel_format: applied.pixel_format,
        ..config.capture.clone()
    };
    CaptureLoop::new(source, control, capture, status).run()
}

/// Controller side of a running supervisor.
///
/// Dropping the handle closes the control channel, which the capture loop reads as
/// a shutdown; the thread is then left to finish on its own.
#[derive(Debug)]
pub struct SupervisorHandle {
    camera_index: usize,
    control: ControlSender,
    status: watch::Receiver<CaptureStatus>,
    join: Option<JoinHandle<AppResult<()>>>,
}

impl SupervisorHandle {
    /// Index of the supervised camera.
    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    /// Control channel into the capture loop.
    pub fn control(&self) -> &ControlSender {
        &self.control
    }

    /// Ask the loop to start recording at `path`.
    pub fn start_recording(&self, path: impl Into<PathBuf>) -> AppResult<()> {
        self.control.start_recording(path)
    }

    /// Ask the loop to finalize the active recording.
    pub fn stop_recording(&self) -> AppResult<()> {
        self.control.stop_recording()
    }

    /// Ask the loop to exit without waiting for it.
    pub fn shutdown(&self) -> AppResult<()> {
        self.control.shutdown()
    }

    /// Latest published status.
    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    /// Independent status receiver.
    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.clone()
    }

    /// Whether the camera thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Wait for the camera thread to exit.
    ///
    /// # Errors
    /// The session's own error, or [`DaqError::Supervisor`] if the thread panicked.
    pub fn join(mut self) -> AppResult<()> {
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        match join.join() {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(camera = self.camera_index, panic = %message, "Camera thread panicked");
                Err(DaqError::Supervisor(format!(
                    "camera {} thread panicked: {}",
                    self.camera_index, message
                )))
            }
        }
    }

    /// Send shutdown and wait for the thread.
    pub fn shutdown_and_join(self) -> AppResult<()> {
        // A closed channel means the loop already exited; join reports why
        let _ = self.control.shutdown();
        self.join()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
