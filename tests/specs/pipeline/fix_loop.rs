// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fix-loop exhaustion: bounded retries, then a retryable terminal
//! state; lint never runs after test exhaustion.

use crate::prelude::*;

#[tokio::test]
async fn test_failures_exhaust_fix_attempts_and_park() {
    let spec = Spec::with_config(
        vec![
            Ok(json!({"applied": []}).to_string()),
            Ok(json!({"fix": 1}).to_string()),
            Ok(json!({"fix": 2}).to_string()),
        ],
        |config| {
            config.test_command =
                ToolCommand::new("sh", &["-c", "echo run >> test_runs.txt; exit 1"]);
        },
    );

    spec.seed_awaiting_decisions("bar_controller");
    let response = spec
        .post("/decisions", json!({"controller": "bar_controller", "action": "approve"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(spec.wait_terminal("bar_controller").await, WorkflowStatus::TestsFailed);

    // 1 initial run + 2 fix attempts.
    let runs = std::fs::read_to_string(spec.tmp.path().join("test_runs.txt")).unwrap();
    assert_eq!(runs.lines().count(), 3);
    // Lint never ran.
    assert!(!spec.tmp.path().join("lint_runs.txt").exists());

    // The fix prompts carried the failing output to the tool.
    let prompts = spec.invoker.prompts.lock();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[1].contains("Tests failed"));

    // Retry route enforces the terminal-state guard: wrong route is 409.
    drop(prompts);
    let response = spec
        .post("/pipeline/retry-ci", json!({"controller": "bar_controller"}))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // The matching retry route re-enters apply; with the tool script
    // exhausted the rerun fails, which still proves the guard accepted.
    let response = spec
        .post("/pipeline/retry-tests", json!({"controller": "bar_controller"}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(spec.wait_terminal("bar_controller").await, WorkflowStatus::Error);
}
