mod common;

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

use common::{endpoint, FakeServer, RecordingSleeper};
use courier_core::transfer::{RetryPolicy, UploadTask, Uploader};

const ARCHIVE_BYTES: &[u8] = b"PK\x03\x04 not really a zip, but bytes are bytes";

fn archive_in(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("edge_2026031009.zip");
    fs::write(&path, ARCHIVE_BYTES).unwrap();
    path
}

fn retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(3000))
}

#[test]
fn test_upload_stores_temp_then_renames() {
    let tmp = tempdir().unwrap();
    let archive = archive_in(tmp.path());
    let server = FakeServer::new();
    let sleeper = RecordingSleeper::default();

    let uploader = Uploader::new(&server, endpoint(), retry(), &sleeper);
    let report = uploader.upload(UploadTask {
        archive,
        remote_dir: "in/edge/".into(),
    });

    assert!(report.succeeded());
    assert_eq!(report.attempts, 1);
    assert_eq!(report.result.unwrap(), "/in/edge/edge_2026031009.zip");

    let state = server.state();
    assert_eq!(
        state.files.keys().collect::<Vec<_>>(),
        vec!["/in/edge/edge_2026031009.zip"]
    );
    assert_eq!(state.files["/in/edge/edge_2026031009.zip"], ARCHIVE_BYTES);

    let put = state
        .calls
        .iter()
        .position(|c| c == "put edge_2026031009.zip.part")
        .unwrap();
    let rename = state
        .calls
        .iter()
        .position(|c| c == "rename edge_2026031009.zip.part edge_2026031009.zip")
        .unwrap();
    assert!(put < rename);
    assert!(state.calls.contains(&"mode Passive".to_string()));
    assert!(state.calls.contains(&"type binary".to_string()));
    assert_eq!(state.open_sessions, 0);
    assert!(sleeper.delays().is_empty());
}

#[test]
fn test_remote_dir_created_segment_by_segment() {
    let tmp = tempdir().unwrap();
    let archive = archive_in(tmp.path());
    let server = FakeServer::new().configure(|s| {
        s.dirs.insert("/in".into());
    });
    let sleeper = RecordingSleeper::default();

    let report = Uploader::new(&server, endpoint(), retry(), &sleeper).upload(UploadTask {
        archive,
        remote_dir: "/in/edge/2026".into(),
    });

    assert!(report.succeeded());
    let state = server.state();
    let mkdirs: Vec<&String> = state.calls.iter().filter(|c| c.starts_with("mkdir")).collect();
    assert_eq!(mkdirs, vec!["mkdir /in/edge", "mkdir /in/edge/2026"]);
    assert!(state.dirs.contains("/in/edge/2026"));
    assert!(state.files.contains_key("/in/edge/2026/edge_2026031009.zip"));
}

#[test]
fn test_failed_rename_leaves_no_visible_file() {
    let tmp = tempdir().unwrap();
    let archive = archive_in(tmp.path());
    let server = FakeServer::new().configure(|s| s.fail_rename = true);
    let sleeper = RecordingSleeper::default();

    let report = Uploader::new(&server, endpoint(), retry(), &sleeper).upload(UploadTask {
        archive: archive.clone(),
        remote_dir: "/in".into(),
    });

    assert!(!report.succeeded());
    assert_eq!(report.attempts, 3);
    let state = server.state();
    assert!(!state.files.contains_key("/in/edge_2026031009.zip"));
    // The temp artifact is removed after each failed rename.
    assert!(state.files.is_empty());
    assert_eq!(state.open_sessions, 0);
    drop(state);
    assert_eq!(server.count_calls("delete edge_2026031009.zip.part"), 3);
    // The local archive is kept for the next run.
    assert!(archive.exists());
}

#[test]
fn test_interrupted_transfer_removes_partial_temp() {
    let tmp = tempdir().unwrap();
    let archive = archive_in(tmp.path());
    let server = FakeServer::new().configure(|s| s.fail_put = true);
    let sleeper = RecordingSleeper::default();

    let report = Uploader::new(&server, endpoint(), RetryPolicy::new(1, Duration::ZERO), &sleeper)
        .upload(UploadTask {
            archive,
            remote_dir: "/in".into(),
        });

    assert!(!report.succeeded());
    assert!(server.state().files.is_empty());
    assert_eq!(server.count_calls("rename"), 0);
}

#[test]
fn test_two_failures_then_success() {
    let tmp = tempdir().unwrap();
    let archive = archive_in(tmp.path());
    let server = FakeServer::new().configure(|s| s.fail_connects = 2);
    let sleeper = RecordingSleeper::default();

    let report = Uploader::new(&server, endpoint(), retry(), &sleeper).upload(UploadTask {
        archive,
        remote_dir: "/in".into(),
    });

    assert!(report.succeeded());
    assert_eq!(report.attempts, 3);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(3000); 2]);
    assert_eq!(server.state().connects, 3);
    assert!(server.state().files.contains_key("/in/edge_2026031009.zip"));
}

#[test]
fn test_permanent_failure_exhausts_budget_and_tears_down() {
    let tmp = tempdir().unwrap();
    let archive = archive_in(tmp.path());
    let server = FakeServer::new().configure(|s| s.fail_login = true);
    let sleeper = RecordingSleeper::default();

    let report = Uploader::new(&server, endpoint(), retry(), &sleeper).upload(UploadTask {
        archive,
        remote_dir: "/in".into(),
    });

    assert!(!report.succeeded());
    assert_eq!(report.attempts, 3);
    assert_eq!(sleeper.delays().len(), 2);
    assert_eq!(server.state().connects, 3);
    assert_eq!(server.count_calls("quit"), 3);
    assert_eq!(server.state().open_sessions, 0);
    assert_eq!(server.count_calls("put"), 0);
}

#[test]
fn test_missing_archive_never_connects() {
    let tmp = tempdir().unwrap();
    let server = FakeServer::new();
    let sleeper = RecordingSleeper::default();

    let report = Uploader::new(&server, endpoint(), retry(), &sleeper).upload(UploadTask {
        archive: tmp.path().join("gone.zip"),
        remote_dir: "/in".into(),
    });

    assert!(!report.succeeded());
    assert_eq!(server.state().connects, 0);
}
