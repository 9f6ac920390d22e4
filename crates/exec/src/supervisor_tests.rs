// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::Path;

fn spec(program: &str, args: &[&str]) -> RunSpec {
    RunSpec::new(
        program,
        args.iter().map(|s| s.to_string()).collect(),
        Duration::from_secs(5),
        Path::new("/tmp"),
    )
}

/// Open descriptor count for this process (Linux).
#[cfg(target_os = "linux")]
fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn success_captures_stdout() {
    let cancel = CancellationToken::new();
    let out = run(spec("echo", &["hello"]), &cancel).await.unwrap();
    assert!(out.exit_ok);
    assert_eq!(out.combined_output.trim(), "hello");
}

#[tokio::test]
async fn nonzero_exit_is_not_an_error() {
    let cancel = CancellationToken::new();
    let out = run(spec("false", &[]), &cancel).await.unwrap();
    assert!(!out.exit_ok);
}

#[tokio::test]
async fn stderr_lands_in_combined_output() {
    let cancel = CancellationToken::new();
    let out = run(spec("sh", &["-c", "echo out; echo err >&2"]), &cancel)
        .await
        .unwrap();
    assert!(out.combined_output.contains("out"));
    assert!(out.combined_output.contains("err"));
}

#[tokio::test]
async fn stdin_input_reaches_child() {
    let cancel = CancellationToken::new();
    let out = run(spec("cat", &[]).stdin("prompt text"), &cancel).await.unwrap();
    assert!(out.exit_ok);
    assert_eq!(out.combined_output, "prompt text");
}

#[tokio::test]
async fn missing_binary_is_spawn_error() {
    let cancel = CancellationToken::new();
    let err = run(spec("/nonexistent/binary", &[]), &cancel).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { .. }), "got: {err}");
}

#[tokio::test]
async fn timeout_kills_the_process_group() {
    let cancel = CancellationToken::new();
    let mut s = spec("sh", &["-c", "sleep 30 & wait"]);
    s.timeout = Duration::from_millis(200);
    let s = s.description("slow child");
    let err = run(s, &cancel).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Timeout { .. }), "got: {err}");
    assert!(err.to_string().contains("slow child"));
}

#[tokio::test]
async fn cancellation_fails_with_cancelled() {
    let cancel = CancellationToken::new();
    let child_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        child_cancel.cancel();
    });
    let err = run(spec("sleep", &["30"]), &cancel).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Cancelled { .. }), "got: {err}");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn no_fd_leak_across_all_exit_paths() {
    let cancel = CancellationToken::new();

    // Warm up the runtime's own descriptors before baselining.
    let _ = run(spec("true", &[]), &cancel).await;
    let before = open_fds();

    let _ = run(spec("echo", &["ok"]), &cancel).await;
    let _ = run(spec("false", &[]), &cancel).await;
    let _ = run(spec("/nonexistent/binary", &[]), &cancel).await;
    let mut timed = spec("sleep", &["30"]);
    timed.timeout = Duration::from_millis(100);
    let _ = run(timed, &cancel).await;

    // Reader tasks finish before run() returns, but give the reaper a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(open_fds(), before);
}

#[tokio::test]
async fn output_is_capped() {
    let cancel = CancellationToken::new();
    // 16 MiB of zeros exceeds the 8 MiB cap; the child must still exit cleanly.
    let out = run(
        spec("sh", &["-c", "head -c 16777216 /dev/zero"]),
        &cancel,
    )
    .await
    .unwrap();
    assert!(out.exit_ok);
    assert_eq!(out.combined_output.len(), MAX_OUTPUT_BYTES);
}
