//! CLI entry point for twv_daq
//!
//! # Usage
//!
//! Interactive console, camera on a thread of this process:
//! ```bash
//! twv_daq run
//! > start clips/sample
//! > stop
//! > kill
//! ```
//!
//! Same console, camera in a child process:
//! ```bash
//! twv_daq spawn --camera 0
//! ```
//!
//! Check a recording:
//! ```bash
//! twv_daq inspect data/2024-05-02-14-07.twv
//! ```
//!
//! Save ten stills as TIFF:
//! ```bash
//! twv_daq snap --count 10 --prefix stills/sample
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use twv_daq::capture::{CaptureStatus, SnapshotRequest};
use twv_daq::config::{DaqConfig, DEFAULT_CONFIG_PATH};
use twv_daq::data::{ContainerCheck, TwvReader};
use twv_daq::hardware::{DriverContext, SimulatedDriver};
use twv_daq::supervisor::process::{run_worker, WorkerProcess};
use twv_daq::supervisor::{snap_images, CameraSupervisor};
use twv_daq::tracing_setup;

#[derive(Parser)]
#[command(name = "twv_daq")]
#[command(about = "Continuous camera capture with TWV recording", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a camera on a thread of this process with an interactive console
    Run {
        /// Camera index (defaults to camera.index from the configuration)
        #[arg(long)]
        camera: Option<usize>,
    },

    /// Run a camera in a child worker process with an interactive console
    Spawn {
        #[arg(long)]
        camera: Option<usize>,
    },

    /// Worker side of `spawn`: commands on stdin, status on stdout
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        camera: Option<usize>,
    },

    /// Acquire a fixed number of stills and save the complete ones as TIFF
    Snap {
        #[arg(long)]
        camera: Option<usize>,

        /// Frames to acquire
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// File name prefix, relative to the output directory
        #[arg(long)]
        prefix: Option<PathBuf>,
    },

    /// Print a TWV container summary; fails if the header was never finalized
    Inspect {
        file: PathBuf,

        /// List every frame header
        #[arg(long)]
        frames: bool,
    },
}

/// A line typed into the console.
#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Start(Option<PathBuf>),
    Stop,
    Status,
    Kill,
}

fn parse_console_line(line: &str) -> Option<ConsoleCommand> {
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let verb = parts.next()?.to_lowercase();
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());
    match verb.as_str() {
        "start" => Some(ConsoleCommand::Start(rest.map(PathBuf::from))),
        "stop" => Some(ConsoleCommand::Stop),
        "status" => Some(ConsoleCommand::Status),
        "kill" | "quit" | "exit" => Some(ConsoleCommand::Kill),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = DaqConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    tracing_setup::init_from_config(&config)?;

    match cli.command {
        Commands::Run { camera } => run_console(&config, camera).await,
        Commands::Spawn { camera } => spawn_console(&cli.config, &config, camera).await,
        Commands::Worker { camera } => {
            let index = camera.unwrap_or(config.camera.index);
            run_worker(build_driver(&config), config.supervisor_config(index)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Snap {
            camera,
            count,
            prefix,
        } => snap(config, camera, count, prefix).await,
        Commands::Inspect { file, frames } => inspect(&config, &file, frames),
    }
}

async fn snap(
    config: DaqConfig,
    camera: Option<usize>,
    count: usize,
    prefix: Option<PathBuf>,
) -> Result<ExitCode> {
    let index = camera.unwrap_or(config.camera.index);
    let request = SnapshotRequest {
        count,
        prefix: config.recording.resolve_snapshot_prefix(prefix.as_deref()),
        pixel_format: config.camera.settings.pixel_format,
        taken_at: chrono::Local::now(),
    };
    let driver = build_driver(&config);
    let settings = config.camera.settings.clone();

    let report = tokio::task::spawn_blocking(move || {
        snap_images(driver.as_ref(), index, &settings, &request)
    })
    .await??;

    for path in &report.saved {
        println!("{}", path.display());
    }
    if !report.incomplete.is_empty() {
        println!(
            "skipped {} incomplete frame(s): {:?}",
            report.incomplete.len(),
            report.incomplete
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn build_driver(config: &DaqConfig) -> Arc<dyn DriverContext> {
    // validate() rejects every other driver name
    Arc::new(SimulatedDriver::new(config.simulation.clone()))
}

fn print_help() {
    println!("commands: start [path] | stop | status | kill");
}

fn print_status(status: &CaptureStatus) {
    match &status.recording_path {
        Some(path) => println!(
            "recording {} ({} frames)",
            path.display(),
            status.frames_written
        ),
        None => println!("idle ({} frames captured)", status.frames_captured),
    }
    if let Some(path) = &status.last_recording {
        println!("last recording: {}", path.display());
    }
    if let Some(error) = &status.last_error {
        println!("last error: {}", error);
    }
}

async fn run_console(config: &DaqConfig, camera: Option<usize>) -> Result<ExitCode> {
    let index = camera.unwrap_or(config.camera.index);
    let handle = CameraSupervisor::spawn(build_driver(config), config.supervisor_config(index))?;
    let mut status = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let sent = match parse_console_line(&line) {
                    Some(ConsoleCommand::Start(name)) => {
                        handle.start_recording(config.recording.resolve_path(name.as_deref()))
                    }
                    Some(ConsoleCommand::Stop) => handle.stop_recording(),
                    Some(ConsoleCommand::Status) => {
                        print_status(&handle.status());
                        Ok(())
                    }
                    Some(ConsoleCommand::Kill) => break,
                    None => {
                        print_help();
                        Ok(())
                    }
                };
                if sent.is_err() {
                    warn!("Camera is no longer running");
                    break;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = status.borrow_and_update().clone();
                if snapshot.stopped {
                    break;
                }
            }
        }
    }

    let result = tokio::task::spawn_blocking(move || handle.shutdown_and_join()).await?;
    match result {
        Ok(()) => {
            info!("Camera shut down");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("camera session failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn spawn_console(
    config_path: &Path,
    config: &DaqConfig,
    camera: Option<usize>,
) -> Result<ExitCode> {
    let index = camera.unwrap_or(config.camera.index);
    let program = std::env::current_exe().context("locating own executable")?;
    let mut worker = WorkerProcess::spawn(&program, Some(config_path), index)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_status = CaptureStatus::default();
    print_help();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let sent = match parse_console_line(&line) {
                    Some(ConsoleCommand::Start(name)) => {
                        worker
                            .start_recording(config.recording.resolve_path(name.as_deref()))
                            .await
                    }
                    Some(ConsoleCommand::Stop) => worker.stop_recording().await,
                    Some(ConsoleCommand::Status) => {
                        print_status(&last_status);
                        Ok(())
                    }
                    Some(ConsoleCommand::Kill) => break,
                    None => {
                        print_help();
                        Ok(())
                    }
                };
                if sent.is_err() {
                    warn!("Worker is no longer accepting commands");
                    break;
                }
            }
            status = worker.next_status() => match status? {
                Some(status) => {
                    print_status(&status);
                    last_status = status;
                }
                None => break,
            }
        }
    }

    match worker.shutdown().await {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("{}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn inspect(config: &DaqConfig, file: &Path, list_frames: bool) -> Result<ExitCode> {
    let mut reader =
        TwvReader::open(file).with_context(|| format!("opening {}", file.display()))?;
    let header = *reader.header();

    println!("file:            {}", file.display());
    println!("magic:           {:#x}", header.magic());
    println!("version:         {}", header.version());
    println!("recorded frames: {}", header.recorded_frames());

    // Unfinalized files carry no layout; assume the configured camera produced them
    let fallback = config
        .camera
        .settings
        .frame_layout(config.camera.settings.pixel_format);
    let layout = reader.layout().unwrap_or(fallback);
    if reader.is_finalized() {
        let roi = layout.roi();
        println!(
            "roi:             {}x{} at ({}, {})",
            roi.width, roi.height, roi.left, roi.top
        );
        println!("bytes/pixel:     {}", layout.bytes_per_pixel());
        println!("frame rate:      {} fps", layout.frame_rate());
        println!("exposure:        {} ms", layout.exposure_ms());
        println!("gain:            {} dB", layout.gain());
        println!(
            "scale:           {}",
            header.calibration().image_to_sample_scale
        );
    }

    let check = reader.check(Some(&fallback));
    match check {
        ContainerCheck::Consistent { frames } => println!("status:          ok ({} frames)", frames),
        ContainerCheck::Unfinalized {
            frames_on_disk,
            trailing_bytes,
        } => println!(
            "status:          NOT FINALIZED, {} frames on disk assuming configured layout, {} trailing bytes",
            frames_on_disk, trailing_bytes
        ),
        ContainerCheck::CountMismatch {
            header_frames,
            frames_on_disk,
            trailing_bytes,
        } => println!(
            "status:          header says {} frames, {} on disk, {} trailing bytes",
            header_frames, frames_on_disk, trailing_bytes
        ),
    }

    if list_frames {
        for frame in reader.frame_headers(&layout)? {
            println!("{:>8}  {:.6} s", frame.frame_number, frame.frame_time_seconds);
        }
    }

    Ok(if check.is_trustworthy() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
