//! Control channel between a controller and one capture loop.
//!
//! The controller sends [`ControlCommand`]s through a [`ControlSender`]; the capture
//! loop drains its [`ControlReceiver`] once per tick without blocking and gets a
//! single [`TickSignals`] value back.
//!
//! # Coalescing
//!
//! The loop services signals in a fixed order (stop, then start) and exits before
//! either when shutdown is set. Draining stops at the first command that would be
//! serviced out of order. That command is held and delivered at the start of the
//! next poll:
//!
//! - `Stop` after a `Start` in the same batch
//! - `Shutdown` after a `Start` or `Stop` in the same batch
//!
//! A later `Start` replaces an earlier one. A dropped sender reads as `Shutdown`.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// Command for a capture loop.
///
/// Serialized as externally tagged JSON, e.g. `{"StartRecording":"clips/a.twv"}` or
/// `"Shutdown"`, so it can cross a process boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Open a container at the given path and start persisting frames
    StartRecording(PathBuf),
    /// Finalize the active container
    StopRecording,
    /// Leave the capture loop. An active recording is not finalized.
    Shutdown,
}

/// Everything a capture loop has to service on one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSignals {
    /// Leave the loop before capturing
    pub shutdown: bool,
    /// Finalize the active session
    pub stop: bool,
    /// Open a session at this path (after any stop)
    pub start: Option<PathBuf>,
}

impl TickSignals {
    /// No command was received.
    pub fn is_empty(&self) -> bool {
        !self.shutdown && !self.stop && self.start.is_none()
    }

    /// Fold `command` in, returning it back when it has to wait for the next tick.
    fn absorb(&mut self, command: ControlCommand) -> Option<ControlCommand> {
        match command {
            ControlCommand::StartRecording(path) => {
                self.start = Some(path);
                None
            }
            ControlCommand::StopRecording if self.start.is_some() => {
                Some(ControlCommand::StopRecording)
            }
            ControlCommand::StopRecording => {
                self.stop = true;
                None
            }
            ControlCommand::Shutdown if !self.is_empty() => Some(ControlCommand::Shutdown),
            ControlCommand::Shutdown => {
                self.shutdown = true;
                None
            }
        }
    }
}

/// Create a connected sender/receiver pair.
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ControlSender { tx },
        ControlReceiver { rx, held: None },
    )
}

/// Controller side of the control channel.
#[derive(Debug, Clone)]
pub struct ControlSender {
    tx: mpsc::UnboundedSender<ControlCommand>,
}

impl ControlSender {
    /// Queue a command. Never blocks.
    ///
    /// # Errors
    /// [`DaqError::ChannelClosed`] once the capture loop has exited.
    pub fn send(&self, command: ControlCommand) -> AppResult<()> {
        self.tx.send(command).map_err(|_| DaqError::ChannelClosed)
    }

    /// Queue [`ControlCommand::StartRecording`].
    pub fn start_recording(&self, path: impl Into<PathBuf>) -> AppResult<()> {
        self.send(ControlCommand::StartRecording(path.into()))
    }

    /// Queue [`ControlCommand::StopRecording`].
    pub fn stop_recording(&self) -> AppResult<()> {
        self.send(ControlCommand::StopRecording)
    }

    /// Queue [`ControlCommand::Shutdown`].
    pub fn shutdown(&self) -> AppResult<()> {
        self.send(ControlCommand::Shutdown)
    }

    /// Whether the capture loop dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Capture loop side of the control channel.
#[derive(Debug)]
pub struct ControlReceiver {
    rx: mpsc::UnboundedReceiver<ControlCommand>,
    held: Option<ControlCommand>,
}

impl ControlReceiver {
    /// Drain pending commands without blocking.
    pub fn poll(&mut self) -> TickSignals {
        let mut signals = TickSignals::default();

        if let Some(command) = self.held.take() {
            // Held commands were deferred against an empty batch, so they always fit
            let _ = signals.absorb(command);
            if signals.shutdown {
                return signals;
            }
        }

        loop {
            match self.rx.try_recv() {
                Ok(command) => {
                    if let Some(deferred) = signals.absorb(command) {
                        self.held = Some(deferred);
                        break;
                    }
                    if signals.shutdown {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Pending start/stop is serviced first; the disconnect is seen again
                    // on the next poll.
                    if signals.is_empty() {
                        signals.shutdown = true;
                    }
                    break;
                }
            }
        }
        signals
    }
}
