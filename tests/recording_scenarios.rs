//! End-to-end recording behaviour of the capture loop.
//!
//! Loops are driven tick by tick so every assertion knows exactly which frames
//! were captured while a session was active.

mod common;

use common::*;
use std::fs;
use tempfile::tempdir;
use twv_daq::capture::{
    control_channel, status_channel, CaptureConfig, CaptureLoop, CaptureState,
    IncompleteFramePolicy, TickOutcome,
};
use twv_daq::data::twv::{ContainerHeader, HEADER_SIZE};
use twv_daq::data::{ContainerCheck, TwvReader};
use twv_daq::hardware::{FrameSource, SimulatedCamera, SimulationConfig};

fn tick(capture: &mut CaptureLoop<'_>) {
    assert_eq!(capture.tick().unwrap(), TickOutcome::Continue);
}

#[test]
fn test_clip_scenario_three_frames() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([0, 100_000_000, 200_000_000]).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    control.start_recording(dir.path().join("clip.twv")).unwrap();
    tick(&mut capture);
    tick(&mut capture);
    control.stop_recording().unwrap();
    tick(&mut capture);

    assert_eq!(capture.state(), CaptureState::Idle);
    let path = status.borrow().last_recording.clone().unwrap();
    assert_eq!(path, dir.path().join("clip.twv"));

    let header = read_header(&path);
    assert!(header.is_finalized());
    assert_eq!(header.recorded_frames(), 3);

    let records = read_records(&path, &small_layout());
    let numbers: Vec<u32> = records.iter().map(|(h, _)| h.frame_number).collect();
    let times: Vec<f64> = records.iter().map(|(h, _)| h.frame_time_seconds).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert_eq!(times, vec![0.0, 0.1, 0.2]);
    assert_eq!(records[2].1, vec![2u8; (WIDTH * HEIGHT) as usize]);
}

#[test]
fn test_n_ticks_produce_n_records() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([]).repeating(50_000_000).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    // Idle ticks before the session must not be recorded
    for _ in 0..4 {
        tick(&mut capture);
    }

    const N: usize = 7;
    control.start_recording(dir.path().join("seven")).unwrap();
    for _ in 0..N - 1 {
        tick(&mut capture);
    }
    control.stop_recording().unwrap();
    tick(&mut capture);

    // Idle ticks after the session must not be recorded either
    tick(&mut capture);
    tick(&mut capture);

    let path = status.borrow().last_recording.clone().unwrap();
    assert_eq!(path, dir.path().join("seven.twv"));
    assert_eq!(read_header(&path).recorded_frames(), N as u32);

    let layout = small_layout();
    let size = fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(size, HEADER_SIZE + N * layout.record_size());

    let records = read_records(&path, &layout);
    assert_eq!(records.len(), N);
    for (i, (header, pixels)) in records.iter().enumerate() {
        assert_eq!(header.frame_number, i as u32);
        // Session started on frame 4: pixel bytes identify the source frame
        assert_eq!(pixels[0], (4 + i) as u8);
        let expected = i as f64 * 0.05;
        assert!((header.frame_time_seconds - expected).abs() < 1e-9);
    }
}

#[test]
fn test_frame_times_follow_irregular_timestamps() {
    let dir = tempdir().unwrap();
    let stamps = [1_000, 5_000_000_000, 5_000_000_000, 5_250_000_000, 9_000_000_001];
    let mut source = ScriptedSource::new(stamps).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    tick(&mut capture);
    control.start_recording(dir.path().join("jitter")).unwrap();
    tick(&mut capture);
    tick(&mut capture);
    tick(&mut capture);
    control.stop_recording().unwrap();
    tick(&mut capture);

    let path = status.borrow().last_recording.clone().unwrap();
    let records = read_records(&path, &small_layout());
    let times: Vec<f64> = records.iter().map(|(h, _)| h.frame_time_seconds).collect();

    // Session anchored at the second frame (5 s)
    assert_eq!(times[0], 0.0);
    assert!(times.windows(2).all(|w| w[0] <= w[1]));
    for (time, stamp) in times.iter().zip(&stamps[1..]) {
        let expected = (stamp - 5_000_000_000) as f64 * 1e-9;
        assert_eq!(*time, expected);
    }
}

#[test]
fn test_placeholder_and_final_header_sizes_match() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([]).repeating(1_000).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    control.start_recording(dir.path().join("sizes")).unwrap();
    tick(&mut capture);
    let path = status.borrow().recording_path.clone().unwrap();
    control.stop_recording().unwrap();
    tick(&mut capture);

    let placeholder = ContainerHeader::placeholder().encode();
    let finalized = read_header(&path).encode();
    assert_eq!(placeholder.len(), HEADER_SIZE);
    assert_eq!(finalized.len(), placeholder.len());
    assert!(placeholder.iter().all(|&b| b == 0));

    // Backpatching rewrote the header in place: nothing was inserted or appended
    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..HEADER_SIZE], &finalized[..]);
    assert_eq!(bytes.len(), HEADER_SIZE + 2 * small_layout().record_size());
}

#[test]
fn test_start_twice_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([]).repeating(1_000).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    control.start_recording(dir.path().join("first")).unwrap();
    tick(&mut capture);
    tick(&mut capture);
    control.start_recording(dir.path().join("second")).unwrap();
    tick(&mut capture);

    let session = capture.session().unwrap();
    assert_eq!(session.path(), dir.path().join("first.twv"));
    assert_eq!(session.frames_written(), 3);
    assert_eq!(session.start_timestamp_ns(), 0);

    control.stop_recording().unwrap();
    tick(&mut capture);
    assert_eq!(twv_files(dir.path()), vec![dir.path().join("first.twv")]);
    assert_eq!(read_header(&dir.path().join("first.twv")).recorded_frames(), 4);
    assert!(status.borrow().last_error.is_none());
}

#[test]
fn test_collision_keeps_original() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("clip.twv");
    fs::write(&original, b"precious").unwrap();

    let mut source = ScriptedSource::new([]).repeating(1_000).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    control.start_recording(&original).unwrap();
    tick(&mut capture);
    control.stop_recording().unwrap();
    tick(&mut capture);

    let written = status.borrow().last_recording.clone().unwrap();
    assert_eq!(written, dir.path().join("clip1.twv"));
    assert_eq!(fs::read(&original).unwrap(), b"precious");
    assert_eq!(read_header(&written).recorded_frames(), 2);
}

#[test]
fn test_shutdown_before_stop_leaves_header_unfinalized() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([]).repeating(1_000).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let path = {
        let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

        control.start_recording(dir.path().join("cut")).unwrap();
        tick(&mut capture);
        tick(&mut capture);
        tick(&mut capture);
        let path = capture.session().unwrap().path().to_path_buf();

        control.shutdown().unwrap();
        capture.run().unwrap();
        path
    };

    // The file exists and carries frame data...
    let layout = small_layout();
    let size = fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(size, HEADER_SIZE + 3 * layout.record_size());

    // ...but the header was never backpatched
    let header = read_header(&path);
    assert_eq!(header.recorded_frames(), 0);
    assert!(!header.is_finalized());

    let reader = TwvReader::open(&path).unwrap();
    assert_eq!(
        reader.check(Some(&layout)),
        ContainerCheck::Unfinalized {
            frames_on_disk: 3,
            trailing_bytes: 0
        }
    );

    let final_status = status.borrow().clone();
    assert!(final_status.stopped);
    assert_eq!(final_status.state, CaptureState::Idle);
    assert!(final_status.last_recording.is_none());
    assert!(source.is_streaming(), "acquisition teardown belongs to the supervisor");
}

#[test]
fn test_recording_can_restart_after_stop() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([]).repeating(1_000).streaming();
    let (control, receiver) = control_channel();
    let (status_tx, _status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    control.start_recording(dir.path().join("a")).unwrap();
    tick(&mut capture);
    // Stop then start in one batch: stop is serviced first, then a new session opens
    control.stop_recording().unwrap();
    control.start_recording(dir.path().join("b")).unwrap();
    tick(&mut capture);
    assert_eq!(capture.session().unwrap().path(), dir.path().join("b.twv"));
    assert_eq!(capture.session().unwrap().frames_written(), 1);
    control.stop_recording().unwrap();
    tick(&mut capture);

    assert_eq!(read_header(&dir.path().join("a.twv")).recorded_frames(), 2);
    assert_eq!(read_header(&dir.path().join("b.twv")).recorded_frames(), 2);
}

#[test]
fn test_start_begins_streaming_when_needed() {
    let dir = tempdir().unwrap();
    let mut camera = SimulatedCamera::new(0, SimulationConfig::default());
    camera.init().unwrap();
    camera.apply_configuration(&small_settings(10.0)).unwrap();
    assert!(!camera.is_streaming());

    let (_control, receiver) = control_channel();
    let (status_tx, _status) = status_channel();
    let mut capture = CaptureLoop::new(&mut camera, receiver, mono8_capture(), status_tx);

    let opened = capture
        .start_recording(&dir.path().join("direct"))
        .unwrap()
        .unwrap();
    assert_eq!(opened, dir.path().join("direct.twv"));
    assert_eq!(capture.session().unwrap().frames_written(), 1);
    assert_eq!(capture.current_frame().unwrap().metadata().frame_id, 0);

    let finished = capture.stop_recording().unwrap();
    assert_eq!(read_header(&finished).recorded_frames(), 1);
}

fn skipping_capture() -> CaptureConfig {
    CaptureConfig {
        incomplete_frames: IncompleteFramePolicy::Skip,
        ..mono8_capture()
    }
}

#[test]
fn test_start_waits_for_first_complete_frame() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([])
        .repeating(10)
        .incomplete_at([0, 1])
        .streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, skipping_capture(), status_tx);

    // Frame 0 is dropped by the tick, frame 1 by the start itself
    control.start_recording(dir.path().join("late")).unwrap();
    tick(&mut capture);
    assert_eq!(capture.state(), CaptureState::Idle);
    assert_eq!(capture.pending_start(), Some(dir.path().join("late").as_path()));
    assert_eq!(status.borrow().frames_skipped, 2);

    // Frame 2 is complete and anchors the held start without a new command
    tick(&mut capture);
    assert_eq!(capture.state(), CaptureState::Recording);
    assert!(capture.pending_start().is_none());
    let session = capture.session().unwrap();
    assert_eq!(session.frames_written(), 1);
    assert_eq!(session.start_timestamp_ns(), 20);

    tick(&mut capture);
    control.stop_recording().unwrap();
    tick(&mut capture);

    let path = status.borrow().last_recording.clone().unwrap();
    assert_eq!(path, dir.path().join("late.twv"));
    let records = read_records(&path, &small_layout());
    let numbers: Vec<u32> = records.iter().map(|(h, _)| h.frame_number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert_eq!(records[0].0.frame_time_seconds, 0.0);
    assert_eq!(records[0].1, vec![2u8; (WIDTH * HEIGHT) as usize]);
}

#[test]
fn test_stop_cancels_deferred_start() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([])
        .repeating(10)
        .incomplete_at([0, 1, 2])
        .streaming();
    let (control, receiver) = control_channel();
    let (status_tx, _status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, skipping_capture(), status_tx);

    control.start_recording(dir.path().join("never")).unwrap();
    tick(&mut capture);
    assert!(capture.pending_start().is_some());

    control.stop_recording().unwrap();
    tick(&mut capture);
    tick(&mut capture);
    assert!(capture.pending_start().is_none());
    assert_eq!(capture.state(), CaptureState::Idle);
    assert_eq!(capture.current_frame().unwrap().metadata().frame_id, 3);
    assert!(!dir.path().join("never.twv").exists());
}

#[test]
fn test_unreadable_settings_fall_back_to_frame_metadata() {
    let dir = tempdir().unwrap();
    let mut source = ScriptedSource::new([]).repeating(1_000).failing_settings().streaming();
    let (control, receiver) = control_channel();
    let (status_tx, status) = status_channel();
    let mut capture = CaptureLoop::new(&mut source, receiver, mono8_capture(), status_tx);

    control.start_recording(dir.path().join("fallback")).unwrap();
    tick(&mut capture);
    tick(&mut capture);
    control.stop_recording().unwrap();
    tick(&mut capture);

    let done = status.borrow().clone();
    assert!(done.last_error.is_none());
    let path = done.last_recording.unwrap();

    let reader = TwvReader::open(&path).unwrap();
    assert_eq!(reader.check(None), ContainerCheck::Consistent { frames: 3 });
    let layout = reader.layout().unwrap();
    assert_eq!(layout.roi().width, WIDTH);
    assert_eq!(layout.roi().height, HEIGHT);
    assert_eq!(layout.bytes_per_pixel(), 1);
    assert_eq!(layout.frame_rate(), 0.0);
    assert_eq!(layout.exposure_ms(), small_settings(10.0).exposure_ms() as f32);
}
