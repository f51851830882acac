//! Integration tests for the scan command

use dnp3link_cli::commands::encode::{build, EncodeOptions};
use dnp3link_cli::commands::scan;
use dnp3link_cli::FrameKind;
use serde_json::Value;
use tempfile::tempdir;

fn frame(kind: FrameKind, payload_hex: Option<&str>) -> Vec<u8> {
    build(&EncodeOptions {
        kind,
        master: true,
        fcb: false,
        dest: 1024,
        src: 1,
        payload_hex,
    })
    .unwrap()
}

#[test]
fn test_scan_recovers_frames_through_corruption() {
    let dir = tempdir().unwrap();
    let capture_path = dir.path().join("capture.bin");
    let report_path = dir.path().join("report.json");

    let mut capture = Vec::new();
    capture.extend_from_slice(&frame(FrameKind::Reset, None));
    capture.extend_from_slice(b"LINE NOISE \x05\x64\xFF\xFF");
    capture.extend_from_slice(&frame(FrameKind::Unconfirmed, Some("DEADBEEF")));
    std::fs::write(&capture_path, &capture).unwrap();

    scan::execute(
        capture_path.to_str().unwrap(),
        Some(report_path.to_str().unwrap()),
        false,
    )
    .unwrap();

    let report: Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    let frames = report.as_array().unwrap();

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["function"], "PriResetLinkStates");
    assert_eq!(frames[0]["offset"], 0);
    assert_eq!(frames[1]["function"], "PriUnconfirmedUserData");
    assert_eq!(frames[1]["payload"], "DEADBEEF");
    assert_eq!(frames[1]["dest"], 1024);
    assert_eq!(frames[1]["src"], 1);
}

#[test]
fn test_scan_stats_only_writes_no_report() {
    let dir = tempdir().unwrap();
    let capture_path = dir.path().join("capture.bin");
    let report_path = dir.path().join("report.json");

    std::fs::write(&capture_path, frame(FrameKind::Ack, None)).unwrap();

    scan::execute(
        capture_path.to_str().unwrap(),
        Some(report_path.to_str().unwrap()),
        true,
    )
    .unwrap();

    assert!(!report_path.exists());
}

#[test]
fn test_scan_missing_input_fails() {
    assert!(scan::execute("/nonexistent/capture.bin", None, false).is_err());
}
