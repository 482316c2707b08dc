//! Shared test utilities for capture and supervisor tests.
//!
//! - `ScriptedSource`: a `FrameSource` that replays a fixed list of timestamps
//! - `ScriptedDriver`: a `DriverContext` handing out scripted sources
//! - `LifecycleLog`: records which driver calls a supervisor made
//! - helpers for small camera settings and status polling

#![allow(dead_code)] // Utilities may not all be used in every test file

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use twv_daq::capture::{CaptureConfig, CaptureStatus};
use twv_daq::data::twv::{ContainerHeader, FrameHeader, FrameLayout, HEADER_SIZE};
use twv_daq::data::{FrameMetadata, PixelFormat, RawFrame, TwvReader};
use twv_daq::error::{AppResult, DriverError, DriverErrorKind};
use twv_daq::hardware::{CameraSettings, DriverContext, FrameSource, Roi};

pub const WIDTH: u32 = 4;
pub const HEIGHT: u32 = 3;

/// Small Mono8 settings used across tests.
pub fn small_settings(frame_rate: f64) -> CameraSettings {
    CameraSettings {
        frame_rate,
        pixel_format: PixelFormat::Mono8,
        roi: Roi {
            x: 0,
            y: 0,
            width: WIDTH,
            height: HEIGHT,
        },
        ..Default::default()
    }
}

pub fn mono8_capture() -> CaptureConfig {
    CaptureConfig {
        pixel_format: PixelFormat::Mono8,
        ..Default::default()
    }
}

pub fn small_layout() -> FrameLayout {
    small_settings(10.0).frame_layout(PixelFormat::Mono8)
}

/// Driver calls observed by a scripted source.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LifecycleLog {
    pub calls: Vec<&'static str>,
    /// Name of the thread that called `init`
    pub thread: Option<String>,
}

/// `FrameSource` replaying scripted timestamps.
///
/// Frame `n` is filled with the byte `n as u8`. Once the script runs out the
/// source fails with an acquisition error, unless `repeat_period_ns` is set, in
/// which case it keeps going from the last timestamp.
pub struct ScriptedSource {
    timestamps: VecDeque<u64>,
    repeat_period_ns: Option<u64>,
    last_timestamp: u64,
    next_id: u64,
    settings: CameraSettings,
    streaming: bool,
    panic_at: Option<u64>,
    fail_init: bool,
    fail_settings: bool,
    incomplete: HashSet<u64>,
    log: Arc<Mutex<LifecycleLog>>,
}

impl ScriptedSource {
    pub fn new(timestamps: impl IntoIterator<Item = u64>) -> Self {
        Self {
            timestamps: timestamps.into_iter().collect(),
            repeat_period_ns: None,
            last_timestamp: 0,
            next_id: 0,
            settings: small_settings(10.0),
            streaming: false,
            panic_at: None,
            fail_init: false,
            fail_settings: false,
            incomplete: HashSet::new(),
            log: Arc::new(Mutex::new(LifecycleLog::default())),
        }
    }

    /// Continue past the script with frames `period_ns` apart.
    pub fn repeating(mut self, period_ns: u64) -> Self {
        self.repeat_period_ns = Some(period_ns);
        self
    }

    pub fn panic_at(mut self, frame_id: u64) -> Self {
        self.panic_at = Some(frame_id);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Make `settings()` fail after configuration.
    pub fn failing_settings(mut self) -> Self {
        self.fail_settings = true;
        self
    }

    /// Flag the frames with these ids as incomplete.
    pub fn incomplete_at(mut self, frame_ids: impl IntoIterator<Item = u64>) -> Self {
        self.incomplete.extend(frame_ids);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn log(&self) -> Arc<Mutex<LifecycleLog>> {
        Arc::clone(&self.log)
    }

    fn note(&self, call: &'static str) {
        self.log.lock().unwrap().calls.push(call);
    }

    fn error(kind: DriverErrorKind, message: &str) -> DriverError {
        DriverError::new("scripted", kind, message)
    }
}

impl FrameSource for ScriptedSource {
    fn driver_type(&self) -> &'static str {
        "scripted"
    }

    fn name(&self) -> String {
        "Scripted camera".to_string()
    }

    fn init(&mut self) -> AppResult<()> {
        self.note("init");
        self.log.lock().unwrap().thread = std::thread::current().name().map(str::to_string);
        if self.fail_init {
            return Err(Self::error(DriverErrorKind::Initialization, "scripted init failure").into());
        }
        Ok(())
    }

    fn apply_configuration(&mut self, settings: &CameraSettings) -> AppResult<CameraSettings> {
        self.note("apply_configuration");
        self.settings = settings.clone();
        Ok(self.settings.clone())
    }

    fn settings(&self) -> AppResult<CameraSettings> {
        if self.fail_settings {
            return Err(Self::error(DriverErrorKind::Configuration, "settings unreadable").into());
        }
        Ok(self.settings.clone())
    }

    fn begin_acquisition(&mut self) -> AppResult<()> {
        self.note("begin_acquisition");
        self.streaming = true;
        Ok(())
    }

    fn end_acquisition(&mut self) -> AppResult<()> {
        self.note("end_acquisition");
        self.streaming = false;
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn next_frame(&mut self) -> AppResult<RawFrame> {
        if !self.streaming {
            return Err(Self::error(DriverErrorKind::Acquisition, "not streaming").into());
        }
        let frame_id = self.next_id;
        if self.panic_at == Some(frame_id) {
            panic!("scripted panic at frame {}", frame_id);
        }

        let timestamp_ns = match (self.timestamps.pop_front(), self.repeat_period_ns) {
            (Some(ts), _) => ts,
            (None, Some(period)) if frame_id > 0 => self.last_timestamp + period,
            (None, Some(_)) => 0,
            (None, None) => {
                return Err(Self::error(DriverErrorKind::Acquisition, "script exhausted").into())
            }
        };
        self.last_timestamp = timestamp_ns;
        self.next_id += 1;

        let roi = self.settings.roi;
        let incomplete = self.incomplete.contains(&frame_id);
        let metadata = FrameMetadata {
            frame_id,
            width: roi.width,
            height: roi.height,
            offset_x: roi.x,
            offset_y: roi.y,
            exposure_us: self.settings.exposure_us,
            gain_db: self.settings.gain_db,
            timestamp_ns,
            incomplete,
            image_status: i32::from(incomplete),
            ..Default::default()
        };
        let data = vec![frame_id as u8; (roi.width * roi.height) as usize];
        Ok(RawFrame::new(PixelFormat::Mono8, data, metadata))
    }

    fn close(&mut self) -> AppResult<()> {
        self.note("close");
        self.streaming = false;
        Ok(())
    }
}

type SourceFactory = dyn Fn() -> ScriptedSource + Send + Sync;

/// `DriverContext` with a fixed number of scripted cameras.
pub struct ScriptedDriver {
    cameras: usize,
    factory: Box<SourceFactory>,
}

impl ScriptedDriver {
    pub fn new(cameras: usize, factory: impl Fn() -> ScriptedSource + Send + Sync + 'static) -> Self {
        Self {
            cameras,
            factory: Box::new(factory),
        }
    }
}

impl DriverContext for ScriptedDriver {
    fn driver_type(&self) -> &'static str {
        "scripted"
    }

    fn camera_count(&self) -> usize {
        self.cameras
    }

    fn open(&self, index: usize) -> AppResult<Box<dyn FrameSource>> {
        if index >= self.cameras {
            return Err(DriverError::new(
                "scripted",
                DriverErrorKind::NotFound,
                format!("Camera number {} too big. Total number {}", index, self.cameras),
            )
            .into());
        }
        Ok(Box::new((self.factory)()))
    }
}

/// Poll `status` until `predicate` holds, failing the test after `timeout`.
pub fn wait_for_status(
    status: &watch::Receiver<CaptureStatus>,
    timeout: Duration,
    predicate: impl Fn(&CaptureStatus) -> bool,
) -> CaptureStatus {
    let deadline = Instant::now() + timeout;
    loop {
        let snapshot = status.borrow().clone();
        if predicate(&snapshot) {
            return snapshot;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for status, last: {:?}",
            snapshot
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Header of the container at `path`.
pub fn read_header(path: &Path) -> ContainerHeader {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.len() >= HEADER_SIZE, "{} too short", path.display());
    ContainerHeader::decode(&bytes).unwrap()
}

/// Every frame record in the container at `path`, read with `layout`.
pub fn read_records(path: &Path, layout: &FrameLayout) -> Vec<(FrameHeader, Vec<u8>)> {
    let mut reader = TwvReader::open(path).unwrap();
    let count = reader.frames_on_disk(layout);
    (0..count)
        .map(|i| reader.read_frame(layout, i).unwrap())
        .collect()
}

pub fn twv_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "twv"))
        .collect();
    files.sort();
    files
}
