//! Supervisor in a child process.
//!
//! The parent launches `twv_daq worker` and talks to it over pipes:
//!
//! - stdin: one JSON [`ControlCommand`] per line. EOF means shutdown.
//! - stdout: one JSON [`CaptureStatus`] per line whenever the recording state,
//!   container path or error changes. Frame counters alone do not produce a line.
//! - stderr: the worker's log output, inherited from the parent.
//!
//! A crash inside the driver or capture loop therefore ends only the child; the
//! parent sees a closed stdout and a failed exit status.

use crate::capture::{CaptureStatus, ControlCommand};
use crate::error::{AppResult, DaqError};
use crate::hardware::DriverContext;
use crate::supervisor::{CameraSupervisor, SupervisorConfig};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Parent side handle to a worker process.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    status_lines: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    /// Launch `program worker --camera <camera> [--config <config>]`.
    pub fn spawn(program: &Path, config: Option<&Path>, camera: usize) -> AppResult<Self> {
        let mut command = Command::new(program);
        command.arg("worker").arg("--camera").arg(camera.to_string());
        if let Some(config) = config {
            command.arg("--config").arg(config);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DaqError::Supervisor("worker stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DaqError::Supervisor("worker stdout not captured".into()))?;

        info!(pid = ?child.id(), camera, "Worker process started");
        Ok(Self {
            child,
            stdin: Some(stdin),
            status_lines: BufReader::new(stdout).lines(),
        })
    }

    /// Write one command line to the worker's stdin.
    ///
    /// # Errors
    /// [`DaqError::ChannelClosed`] once stdin is closed or the worker is gone.
    pub async fn send(&mut self, command: &ControlCommand) -> AppResult<()> {
        let stdin = self.stdin.as_mut().ok_or(DaqError::ChannelClosed)?;
        let mut line = serde_json::to_string(command)?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| DaqError::ChannelClosed)?;
        stdin.flush().await.map_err(|_| DaqError::ChannelClosed)?;
        debug!(?command, "Sent command to worker");
        Ok(())
    }

    /// Send [`ControlCommand::StartRecording`].
    pub async fn start_recording(&mut self, path: impl Into<PathBuf>) -> AppResult<()> {
        self.send(&ControlCommand::StartRecording(path.into())).await
    }

    /// Send [`ControlCommand::StopRecording`].
    pub async fn stop_recording(&mut self) -> AppResult<()> {
        self.send(&ControlCommand::StopRecording).await
    }

    /// Next status line, or `None` once the worker closed stdout.
    pub async fn next_status(&mut self) -> AppResult<Option<CaptureStatus>> {
        loop {
            match self.status_lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(serde_json::from_str(&line)?)),
                None => return Ok(None),
            }
        }
    }

    /// Read status lines until one satisfies `predicate`.
    pub async fn wait_for_status(
        &mut self,
        mut predicate: impl FnMut(&CaptureStatus) -> bool,
    ) -> AppResult<CaptureStatus> {
        while let Some(status) = self.next_status().await? {
            if predicate(&status) {
                return Ok(status);
            }
        }
        Err(DaqError::Supervisor(
            "worker exited before reaching the expected state".into(),
        ))
    }

    /// Send shutdown, close stdin and wait for the child to exit.
    ///
    /// # Errors
    /// [`DaqError::Supervisor`] when the worker exits unsuccessfully.
    pub async fn shutdown(mut self) -> AppResult<ExitStatus> {
        if let Err(e) = self.send(&ControlCommand::Shutdown).await {
            warn!(error = %e, "Worker no longer accepting commands");
        }
        self.stdin = None;

        // Drain remaining status so the child never blocks on a full pipe
        while let Ok(Some(_)) = self.next_status().await {}

        let status = self.child.wait().await?;
        info!(%status, "Worker process exited");
        if status.success() {
            Ok(status)
        } else {
            Err(DaqError::Supervisor(format!("worker exited with {}", status)))
        }
    }
}

/// Child side: run a supervisor and bridge it to stdin/stdout.
pub async fn run_worker(driver: Arc<dyn DriverContext>, config: SupervisorConfig) -> AppResult<()> {
    let handle = CameraSupervisor::spawn(driver, config)?;
    let control = handle.control().clone();
    let mut status = handle.subscribe();

    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut stdin_open = true;
    let mut reported: Option<CaptureStatus> = None;

    loop {
        tokio::select! {
            line = commands.next_line(), if stdin_open => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<ControlCommand>(line.trim()) {
                    Ok(command) => {
                        debug!(?command, "Worker received command");
                        if control.send(command).is_err() {
                            stdin_open = false;
                        }
                    }
                    Err(e) => warn!(error = %e, line = %line, "Ignoring malformed command"),
                },
                None => {
                    debug!("Worker stdin closed");
                    let _ = control.shutdown();
                    stdin_open = false;
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                if is_noteworthy(reported.as_ref(), &snapshot) {
                    let mut line = serde_json::to_string(&snapshot)?;
                    line.push('\n');
                    stdout.write_all(line.as_bytes()).await?;
                    stdout.flush().await?;
                    reported = Some(snapshot);
                }
            }
        }
    }

    tokio::task::spawn_blocking(move || handle.join())
        .await
        .map_err(|e| DaqError::Supervisor(format!("worker join failed: {}", e)))?
}

fn is_noteworthy(previous: Option<&CaptureStatus>, next: &CaptureStatus) -> bool {
    match previous {
        None => true,
        Some(prev) => {
            prev.state != next.state
                || prev.recording_path != next.recording_path
                || prev.last_recording != next.last_recording
                || prev.last_error != next.last_error
                || prev.stopped != next.stopped
        }
    }
}
