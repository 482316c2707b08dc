//! Still-image acquisition through the supervisor lifecycle.

mod common;

use chrono::{Local, TimeZone};
use common::*;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::tempdir;
use twv_daq::capture::snapshot::snapshot_path;
use twv_daq::capture::SnapshotRequest;
use twv_daq::data::PixelFormat;
use twv_daq::error::{DaqError, DriverErrorKind};
use twv_daq::supervisor::snap_images;

fn driver_for(source: ScriptedSource) -> ScriptedDriver {
    let slot = Mutex::new(Some(source));
    ScriptedDriver::new(1, move || slot.lock().unwrap().take().unwrap())
}

fn request(prefix: PathBuf, count: usize) -> SnapshotRequest {
    SnapshotRequest {
        count,
        prefix,
        pixel_format: PixelFormat::Mono8,
        taken_at: Local.with_ymd_and_hms(2024, 5, 2, 14, 7, 0).unwrap(),
    }
}

#[test]
fn test_incomplete_frames_are_not_saved() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new([]).repeating(1_000).incomplete_at([1, 3]);
    let log = source.log();
    let driver = driver_for(source);
    let request = request(dir.path().join("stills/BflyTestImage"), 5);

    let report = snap_images(&driver, 0, &small_settings(10.0), &request).unwrap();

    // Skipped frames use up their attempt and leave a gap in the numbering
    assert_eq!(report.saved_count(), 3);
    assert_eq!(report.incomplete, vec![1, 3]);
    let expected: Vec<PathBuf> = [0, 2, 4]
        .into_iter()
        .map(|i| snapshot_path(&request.prefix, request.taken_at, i))
        .collect();
    assert_eq!(report.saved, expected);
    assert!(expected[1].ends_with("BflyTestImage2024-05-02-14-0700002.tiff"));

    let mut on_disk: Vec<PathBuf> = fs::read_dir(dir.path().join("stills"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    on_disk.sort();
    assert_eq!(on_disk, expected);

    for (path, fill) in expected.iter().zip([0u8, 2, 4]) {
        let img = image::open(path).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (WIDTH, HEIGHT));
        assert!(img.as_raw().iter().all(|&p| p == fill));
    }

    let calls = log.lock().unwrap().calls.clone();
    assert_eq!(
        calls,
        vec![
            "init",
            "apply_configuration",
            "begin_acquisition",
            "end_acquisition",
            "end_acquisition",
            "close"
        ]
    );
}

#[test]
fn test_source_error_still_releases_camera() {
    let dir = tempdir().unwrap();
    let source = ScriptedSource::new([0, 1]);
    let log = source.log();
    let driver = driver_for(source);
    let request = request(dir.path().join("cut"), 4);

    let err = snap_images(&driver, 0, &small_settings(10.0), &request).unwrap_err();
    assert!(err.is_device_error());

    // Stills taken before the failure stay on disk
    assert!(snapshot_path(&request.prefix, request.taken_at, 1).exists());
    assert!(!snapshot_path(&request.prefix, request.taken_at, 2).exists());

    let calls = log.lock().unwrap().calls.clone();
    assert_eq!(calls.last(), Some(&"close"));
    assert!(calls.contains(&"end_acquisition"));
}

#[test]
fn test_missing_camera_reports_not_found() {
    let dir = tempdir().unwrap();
    let driver = driver_for(ScriptedSource::new([]));
    let request = request(dir.path().join("none"), 1);

    match snap_images(&driver, 2, &small_settings(10.0), &request) {
        Err(DaqError::Driver(err)) => assert_eq!(err.kind, DriverErrorKind::NotFound),
        other => panic!("expected NotFound driver error, got {:?}", other),
    }
}
