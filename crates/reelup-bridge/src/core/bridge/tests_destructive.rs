//! Destructive and Edge Case Tests for the CLI Bridge
//!
//! Feeds the decoder, classifier and dispatcher the kind of output a broken,
//! outdated or hostile CLI build could produce.

use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;

#[cfg(unix)]
use super::test_support::fake_cli;
use super::*;

fn exited(code: Option<i32>, stdout: &[u8], stderr: &[u8]) -> Verdict {
    classify(Evidence::Exited {
        exit_code: code,
        terminal: decode(stdout, OutputMode::Simple).map(|d| d.terminal),
        event_violation: None,
        stdout,
        stderr,
    })
}

#[test]
fn test_destructive_invalid_utf8_is_noise() {
    let mut stdout = vec![0xff, 0xfe, b'\n'];
    stdout.extend_from_slice(b"{\"success\":true}\n");
    let decoded = decode(&stdout, OutputMode::Simple).unwrap();
    assert!(decoded.terminal.is_success());
}

#[test]
fn test_destructive_invalid_utf8_in_diagnostics() {
    let verdict = exited(Some(1), b"", &[b'E', 0xc3, 0x28, b'\n']);
    match verdict {
        Verdict::Failure(err) => {
            assert_eq!(err.kind(), BridgeErrorKind::NonZeroExit);
            assert!(err.to_string().starts_with('E'));
        }
        other => panic!("unexpected verdict: {:?}", other),
    }
}

#[test]
fn test_destructive_arrays_and_scalars_are_not_results() {
    let inputs: [&[u8]; 4] = [b"[{\"success\":true}]", b"true", b"\"success\"", b"null"];
    for stdout in inputs {
        assert_eq!(
            decode(stdout, OutputMode::Simple),
            Err(DecodeError::NoJsonObject),
            "input: {}",
            String::from_utf8_lossy(stdout)
        );
    }
}

#[test]
fn test_destructive_two_objects_on_one_line() {
    // Not a single JSON value, so the whole line is noise.
    assert_eq!(
        decode(b"{\"success\":true}{\"success\":false}", OutputMode::Simple),
        Err(DecodeError::NoJsonObject)
    );
}

#[test]
fn test_destructive_wrong_discriminator_types() {
    for value in [json!({"success": 1}), json!({"success": null}), json!({"success": "true"})] {
        let stdout = value.to_string();
        assert_eq!(
            decode(stdout.as_bytes(), OutputMode::Simple),
            Err(DecodeError::MissingSuccess)
        );
    }

    let raw = match json!({"phase": ["uploading_chunk"]}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    assert!(matches!(
        ProgressEvent::from_raw(&raw),
        Err(DecodeError::MissingPhase { .. })
    ));
}

#[test]
fn test_destructive_phase_is_case_sensitive() {
    let raw = match json!({"phase": "Uploading_Chunk"}) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    assert!(matches!(
        ProgressEvent::from_raw(&raw),
        Err(DecodeError::UnknownPhase { .. })
    ));
}

#[test]
fn test_destructive_negative_and_fractional_counters() {
    let raw = match json!({
        "phase": "uploading_file",
        "bytesUploaded": -5,
        "totalBytes": 10.6,
        "currentChunk": 1e300
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let event = ProgressEvent::from_raw(&raw).unwrap();
    assert_eq!(event.bytes_uploaded, None);
    assert_eq!(event.total_bytes, Some(11));
    assert_eq!(event.percent(), None);
}

#[test]
fn test_destructive_bytes_beyond_total_clamp() {
    let mut event = ProgressEvent::new(ProgressPhase::UploadingFile);
    event.bytes_uploaded = Some(500);
    event.total_bytes = Some(100);
    assert_eq!(event.percent(), Some(100.0));
}

#[test]
fn test_destructive_huge_diagnostic_is_bounded() {
    let stderr = vec![b'x'; 1024 * 1024];
    match exited(Some(1), b"", &stderr) {
        Verdict::Failure(err) => {
            assert!(err.details().unwrap().len() <= DIAGNOSTIC_TAIL_BYTES);
            assert!(err.to_string().len() <= DIAGNOSTIC_TAIL_BYTES);
        }
        other => panic!("unexpected verdict: {:?}", other),
    }
}

#[test]
fn test_destructive_empty_output_zero_exit() {
    match exited(Some(0), b"", b"") {
        Verdict::Failure(err) => {
            assert_eq!(err.kind(), BridgeErrorKind::MalformedOutput);
            assert_eq!(err.details(), None);
        }
        other => panic!("unexpected verdict: {:?}", other),
    }
}

#[test]
fn test_destructive_secret_never_in_debug_output() {
    let operation = Operation::Login {
        token_id: "id-1".to_string(),
        token_secret: "hunter2".to_string(),
    };
    assert!(!format!("{:?}", operation).contains("hunter2"));
    assert!(!operation.display_args().iter().any(|a| a.contains("hunter2")));
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_destructive_huge_single_line() {
    let dir = TempDir::new().unwrap();
    let program = fake_cli(
        dir.path(),
        "reelup-agent",
        r#"pad=$(head -c 300000 /dev/zero | tr '\0' 'a')
printf '{"phase":"validating_file","message":"%s"}\n' "$pad"
echo '{"success":true,"assetId":"big"}'"#,
    );
    let dispatcher = CommandDispatcher::new(BridgeConfig::new(program));

    let mut sizes = Vec::new();
    let mut observer =
        |event: &ProgressEvent| sizes.push(event.message.as_ref().map(String::len));
    let uploaded = dispatcher
        .upload("/tmp/big.mp4", Some(&mut observer))
        .await
        .unwrap();
    assert_eq!(uploaded.asset_id, "big");
    assert_eq!(sizes, [Some(300000)]);
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_destructive_background_child_holding_pipes() {
    let dir = TempDir::new().unwrap();
    // The grandchild keeps stdout open long after the CLI itself exits.
    let program = fake_cli(
        dir.path(),
        "reelup-agent",
        "sleep 30 &\necho '{\"success\":true,\"isAuthenticated\":true}'\nexec sleep 30",
    );
    let dispatcher = CommandDispatcher::new(
        BridgeConfig::new(program)
            .with_default_timeout(Duration::from_millis(300))
            .with_kill_grace(Duration::from_millis(200)),
    );

    let started = std::time::Instant::now();
    let err = dispatcher.status().await.unwrap_err();
    assert_eq!(err.kind(), BridgeErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[cfg(unix)]
#[tokio::test]
#[serial]
async fn test_destructive_exited_cli_with_background_child_completes() {
    let dir = TempDir::new().unwrap();
    // The CLI finishes cleanly but leaves a child holding both pipes.
    let program = fake_cli(
        dir.path(),
        "reelup-agent",
        "sleep 5 &\necho '{\"success\":true,\"isAuthenticated\":true}'\nexit 0",
    );
    let dispatcher = CommandDispatcher::new(
        BridgeConfig::new(program)
            .with_default_timeout(Duration::from_secs(2))
            .with_kill_grace(Duration::from_millis(200)),
    );

    let started = std::time::Instant::now();
    let status = dispatcher.status().await.unwrap();
    assert!(status.is_authenticated);
    assert!(started.elapsed() < Duration::from_secs(2));
}
