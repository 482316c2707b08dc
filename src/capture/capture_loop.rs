//! The capture loop state machine.
//!
//! ```text
//!            StartRecording(path)
//!   ┌──────┐ ─────────────────────► ┌───────────┐
//!   │ Idle │                        │ Recording │
//!   └──────┘ ◄───────────────────── └───────────┘
//!              StopRecording / append failure
//! ```
//!
//! Every tick, in this order:
//!
//! 1. drain the control channel; on shutdown, return without touching the frame
//! 2. fetch the next frame, make it current, and append it when recording
//! 3. service a stop
//! 4. service a start (or retry one deferred for want of a complete frame)
//!
//! The loop borrows its [`FrameSource`]: acquisition setup and teardown belong to
//! the supervisor that owns the camera.

use crate::capture::control::ControlReceiver;
use crate::capture::{CaptureConfig, CaptureState, CaptureStatus, IncompleteFramePolicy};
use crate::data::twv::{CalibrationData, FrameHeader, FrameLayout, FrameRoi};
use crate::data::twv_writer::TwvWriter;
use crate::data::{DecodedFrame, FrameMetadata};
use crate::error::{AppResult, DaqError};
use crate::hardware::FrameSource;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of one [`CaptureLoop::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking
    Continue,
    /// A shutdown command was received
    Shutdown,
}

/// An open recording: the container writer plus the frame it was anchored on.
#[derive(Debug)]
pub struct RecordingSession {
    writer: TwvWriter,
    anchor: FrameMetadata,
    bytes_per_pixel: u8,
}

impl RecordingSession {
    /// Open the container for `path`, measuring frame times from `anchor`.
    ///
    /// The anchor is not written; callers append it as record 0.
    pub fn open(path: &Path, anchor: &DecodedFrame) -> AppResult<Self> {
        Ok(Self {
            writer: TwvWriter::open(path)?,
            anchor: anchor.metadata().clone(),
            bytes_per_pixel: anchor.bytes_per_pixel(),
        })
    }

    /// Container path after normalization and collision avoidance.
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Records appended so far, including record 0.
    pub fn frames_written(&self) -> u32 {
        self.writer.frames_written()
    }

    /// Timestamp that maps to frame time 0.0.
    pub fn start_timestamp_ns(&self) -> u64 {
        self.anchor.timestamp_ns
    }

    /// Layout of the records in this container as seen in the anchor frame.
    ///
    /// Frame metadata carries no frame rate; `frame_rate` fills it in.
    pub fn recorded_layout(&self, frame_rate: f32) -> FrameLayout {
        FrameLayout::builder()
            .roi(FrameRoi {
                width: self.anchor.width,
                height: self.anchor.height,
                top: self.anchor.offset_y,
                left: self.anchor.offset_x,
            })
            .bytes_per_pixel(self.bytes_per_pixel)
            .frame_rate(frame_rate)
            .exposure_ms((self.anchor.exposure_us / 1000.0) as f32)
            .gain(self.anchor.gain_db as f32)
            .build()
    }

    /// Header for the next record: sequential number, time relative to the start.
    pub fn next_frame_header(&self, timestamp_ns: u64) -> FrameHeader {
        FrameHeader::at(self.frames_written(), timestamp_ns, self.start_timestamp_ns())
    }

    /// Append `frame` as the next record.
    ///
    /// # Errors
    /// I/O failures, or [`DaqError::InvalidContainer`] when the frame size differs
    /// from record 0.
    pub fn append(&mut self, frame: &DecodedFrame) -> AppResult<()> {
        let header = self.next_frame_header(frame.timestamp_ns());
        self.writer.append_frame(&header, frame.data())
    }

    /// Backpatch the header and close the container.
    pub fn finish(self, layout: FrameLayout, calibration: CalibrationData) -> AppResult<PathBuf> {
        self.writer.finalize(layout, calibration)
    }

    /// Close without backpatching; the header keeps its placeholder.
    pub fn abandon(self) -> AppResult<PathBuf> {
        self.writer.abandon()
    }
}

/// Continuous acquisition loop for one camera.
pub struct CaptureLoop<'a> {
    source: &'a mut dyn FrameSource,
    control: ControlReceiver,
    config: CaptureConfig,
    session: Option<RecordingSession>,
    pending_start: Option<PathBuf>,
    current_frame: Option<DecodedFrame>,
    status: watch::Sender<CaptureStatus>,
    frames_captured: u64,
    frames_skipped: u64,
    last_recording: Option<PathBuf>,
    last_error: Option<String>,
}

impl<'a> CaptureLoop<'a> {
    /// Build an idle loop around an initialized `source`.
    pub fn new(
        source: &'a mut dyn FrameSource,
        control: ControlReceiver,
        config: CaptureConfig,
        status: watch::Sender<CaptureStatus>,
    ) -> Self {
        Self {
            source,
            control,
            config,
            session: None,
            pending_start: None,
            current_frame: None,
            status,
            frames_captured: 0,
            frames_skipped: 0,
            last_recording: None,
            last_error: None,
        }
    }

    /// Recording while a session is open, idle otherwise.
    pub fn state(&self) -> CaptureState {
        if self.session.is_some() {
            CaptureState::Recording
        } else {
            CaptureState::Idle
        }
    }

    /// Most recent accepted frame.
    pub fn current_frame(&self) -> Option<&DecodedFrame> {
        self.current_frame.as_ref()
    }

    /// Active recording session.
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Start request waiting for the first complete frame.
    pub fn pending_start(&self) -> Option<&Path> {
        self.pending_start.as_deref()
    }

    /// Run until shutdown.
    ///
    /// An active recording is closed without finalizing its header, whether the loop
    /// ends by shutdown or by a frame source error.
    ///
    /// # Errors
    /// The first frame source error. Recording errors never end the loop.
    pub fn run(&mut self) -> AppResult<()> {
        info!(camera = %self.source.name(), "Capture loop started");
        let result = loop {
            match self.tick() {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Shutdown) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        if let Some(session) = self.session.take() {
            warn!(
                path = %session.path().display(),
                frames = session.frames_written(),
                "Leaving capture loop while recording; header not finalized"
            );
            if let Err(e) = session.abandon() {
                self.record_error(&e);
            }
        }

        match &result {
            Ok(()) => info!(frames = self.frames_captured, "Capture loop shut down"),
            Err(e) => error!(error = %e, "Capture loop terminated by frame source"),
        }
        self.publish_with(|status| status.stopped = true);
        result
    }

    /// One iteration of the loop.
    pub fn tick(&mut self) -> AppResult<TickOutcome> {
        let signals = self.control.poll();
        if signals.shutdown {
            return Ok(TickOutcome::Shutdown);
        }

        self.capture()?;

        if signals.stop {
            if let Some(path) = self.pending_start.take() {
                debug!(path = %path.display(), "Deferred start cancelled by stop");
            }
            self.stop_recording();
        }
        // A fresh start replaces a held one
        let held = self.pending_start.take();
        if let Some(path) = signals.start.or(held) {
            self.start_recording(&path)?;
        }

        self.publish();
        Ok(TickOutcome::Continue)
    }

    /// Fetch the next frame, make it current and record it if a session is active.
    pub fn capture(&mut self) -> AppResult<()> {
        let raw = self.source.next_frame()?;

        if raw.metadata.incomplete {
            let incomplete = DaqError::IncompleteFrame {
                frame_id: raw.metadata.frame_id,
                status: raw.metadata.image_status,
            };
            match self.config.incomplete_frames {
                IncompleteFramePolicy::Record => {
                    warn!(error = %incomplete, "Keeping incomplete frame");
                }
                IncompleteFramePolicy::Skip => {
                    warn!(error = %incomplete, "Dropping incomplete frame");
                    self.frames_skipped += 1;
                    return Ok(());
                }
            }
        }

        let frame = raw.convert(self.config.pixel_format)?;
        self.frames_captured += 1;

        if let Some(session) = self.session.as_mut() {
            if let Err(e) = session.append(&frame) {
                self.recording_failed(e);
            }
        }

        self.current_frame = Some(frame);
        Ok(())
    }

    /// Start a recording session at `path`.
    ///
    /// No-op while recording. The current frame (captured now if there is none yet)
    /// becomes record 0 at time 0.0. If every frame so far was dropped as incomplete
    /// the request is held and retried on the next tick. Failing to open the
    /// container is logged and published; the loop stays idle.
    ///
    /// # Errors
    /// Only frame source errors from starting acquisition or capturing the first frame.
    pub fn start_recording(&mut self, path: &Path) -> AppResult<Option<PathBuf>> {
        if let Some(session) = &self.session {
            debug!(
                active = %session.path().display(),
                "Start requested while already recording; ignored"
            );
            return Ok(None);
        }

        if !self.source.is_streaming() {
            self.source.begin_acquisition()?;
        }
        if self.current_frame.is_none() {
            self.capture()?;
        }
        let Some(frame) = self.current_frame.as_ref() else {
            // Only reachable when the first frame was skipped as incomplete
            warn!(path = %path.display(), "No complete frame to anchor the recording yet; start deferred");
            self.pending_start = Some(path.to_path_buf());
            return Ok(None);
        };

        let mut session = match RecordingSession::open(path, frame) {
            Ok(session) => session,
            Err(e) => {
                error!(path = %path.display(), error = %e, "Could not start recording");
                self.record_error(&e);
                return Ok(None);
            }
        };
        if let Err(e) = session.append(frame) {
            error!(path = %session.path().display(), error = %e, "Could not write first frame");
            self.record_error(&e);
            if let Err(e) = session.abandon() {
                self.record_error(&e);
            }
            return Ok(None);
        }

        let opened = session.path().to_path_buf();
        info!(path = %opened.display(), "Recording started");
        self.session = Some(session);
        self.publish();
        Ok(Some(opened))
    }

    /// Finalize the active session, if any.
    ///
    /// Returns the container path when the header was written.
    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        let session = self.session.take()?;
        let frames = session.frames_written();
        let layout = self.header_layout(&session);

        let finished = match session.finish(layout, self.config.calibration) {
            Ok(path) => {
                info!(path = %path.display(), frames, "Recording stopped");
                self.last_recording = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                error!(error = %e, frames, "Could not finalize recording");
                self.record_error(&e);
                None
            }
        };
        self.publish();
        finished
    }

    /// Layout written into the header of `session`.
    ///
    /// The camera's current configuration, unless it cannot be read or no longer
    /// matches the recorded frames; then the anchor frame's metadata.
    fn header_layout(&self, session: &RecordingSession) -> FrameLayout {
        let configured = self
            .source
            .settings()
            .map(|settings| settings.frame_layout(self.config.pixel_format));
        match configured {
            Ok(layout) => {
                let recorded = session.recorded_layout(layout.frame_rate());
                let (have, want) = (layout.roi(), recorded.roi());
                if have.width == want.width
                    && have.height == want.height
                    && layout.bytes_per_pixel() == recorded.bytes_per_pixel()
                {
                    layout
                } else {
                    warn!(
                        configured = ?have,
                        recorded = ?want,
                        "Camera geometry changed during recording; header uses recorded geometry"
                    );
                    recorded
                }
            }
            Err(e) => {
                warn!(error = %e, "Camera settings unavailable; header layout taken from frame metadata");
                session.recorded_layout(0.0)
            }
        }
    }

    fn recording_failed(&mut self, err: DaqError) {
        error!(error = %err, "Recording write failed; closing session");
        self.record_error(&err);
        // Keep whatever made it to disk readable
        if self.stop_recording().is_none() {
            warn!("Session closed after write failure could not be finalized");
        }
    }

    fn record_error(&mut self, err: &DaqError) {
        self.last_error = Some(err.to_string());
    }

    fn publish(&self) {
        self.publish_with(|_| {});
    }

    fn publish_with(&self, adjust: impl FnOnce(&mut CaptureStatus)) {
        let mut status = CaptureStatus {
            state: self.state(),
            recording_path: self.session.as_ref().map(|s| s.path().to_path_buf()),
            frames_captured: self.frames_captured,
            frames_skipped: self.frames_skipped,
            frames_written: self.session.as_ref().map_or(0, |s| s.frames_written()),
            last_frame_id: self.current_frame.as_ref().map(|f| f.metadata().frame_id),
            last_recording: self.last_recording.clone(),
            last_error: self.last_error.clone(),
            stopped: false,
        };
        adjust(&mut status);
        self.status.send_replace(status);
    }
}
