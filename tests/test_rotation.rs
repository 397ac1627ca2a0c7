mod common;

use std::{fs, path::Path};

use chrono::{NaiveDate, NaiveDateTime};
use daemon_runner::{rotate_file, rotate_logs_at, rotated_path, StreamRole, StreamSpec};
use tempfile::tempdir;

use common::entries;

fn march_first() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap()
}

fn spec(role: StreamRole, path: &Path) -> StreamSpec {
    StreamSpec {
        role,
        destination: Some(path.to_path_buf()),
        foreground: false,
    }
}

#[test]
fn test_timestamp_goes_before_last_extension() {
    let rotated = rotated_path(Path::new("/var/log/app.out.log"), &march_first()).unwrap();
    assert_eq!(
        rotated,
        Path::new("/var/log/app.out-2024-03-01_10-00-00.log")
    );
}

#[test]
fn test_name_without_extension_gets_suffix() {
    let rotated = rotated_path(Path::new("/var/log/app"), &march_first()).unwrap();
    assert_eq!(rotated, Path::new("/var/log/app-2024-03-01_10-00-00"));
}

#[test]
fn test_rotate_moves_file() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("app.out.log");
    fs::write(&log, "content\n").unwrap();

    let target = rotate_file(&log, &march_first()).unwrap().unwrap();
    assert_eq!(target, dir.path().join("app.out-2024-03-01_10-00-00.log"));
    assert!(!log.exists());
    assert_eq!(fs::read_to_string(&target).unwrap(), "content\n");
}

#[test]
fn test_rotating_missing_file_is_a_no_op() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("never-written.log");

    assert_eq!(rotate_file(&log, &march_first()).unwrap(), None);
    assert!(entries(dir.path()).is_empty());
}

#[test]
fn test_rotate_logs_handles_both_streams() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("out.log");
    let err = dir.path().join("err.log");
    fs::write(&out, "out\n").unwrap();

    let specs = [
        spec(StreamRole::Stdout, &out),
        spec(StreamRole::Stderr, &err),
    ];
    let rotated = rotate_logs_at(&specs, &march_first());

    assert_eq!(rotated, vec![dir.path().join("out-2024-03-01_10-00-00.log")]);
    assert_eq!(entries(dir.path()), rotated);
}

#[test]
fn test_shared_destination_is_rotated_once() {
    let dir = tempdir().unwrap();
    let combined = dir.path().join("combined.log");
    fs::write(&combined, "both\n").unwrap();

    let specs = [
        spec(StreamRole::Stdout, &combined),
        spec(StreamRole::Stderr, &combined),
    ];
    let rotated = rotate_logs_at(&specs, &march_first());

    assert_eq!(rotated.len(), 1);
    assert_eq!(entries(dir.path()), rotated);
}

#[test]
fn test_unset_destinations_are_skipped() {
    let specs = [StreamSpec {
        role: StreamRole::Stdout,
        destination: None,
        foreground: false,
    }];
    assert!(rotate_logs_at(&specs, &march_first()).is_empty());
}
