// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;
use yare::parameterized;

#[test]
fn parses_bare_json_object() {
    let value = parse_response(r#"{"findings": [1, 2]}"#).unwrap();
    assert_eq!(value["findings"][0], 1);
}

#[test]
fn parses_fenced_json() {
    let raw = "```json\n{\"ok\": true}\n```";
    let value = parse_response(raw).unwrap();
    assert_eq!(value["ok"], true);
}

#[test]
fn parses_fence_without_language_tag() {
    let raw = "```\n{\"ok\": 1}\n```";
    assert_eq!(parse_response(raw).unwrap()["ok"], 1);
}

#[test]
fn parses_json_embedded_in_prose() {
    let raw = "Sure! Here is the result you asked for:\n{\"a\": {\"b\": 2}}\nLet me know.";
    let value = parse_response(raw).unwrap();
    assert_eq!(value["a"]["b"], 2);
}

#[parameterized(
    top_level_array = { "[1, 2, 3]" },
    fenced_array = { "```json\n[1]\n```" },
    plain_prose = { "I could not produce JSON." },
    empty = { "" },
)]
fn rejects_non_objects(raw: &str) {
    assert!(matches!(parse_response(raw), Err(ToolError::Parse { .. })));
}

#[test]
fn parse_error_snippet_is_capped_at_200_chars() {
    let raw = "x".repeat(500);
    match parse_response(&raw) {
        Err(ToolError::Parse { snippet }) => assert_eq!(snippet.chars().count(), 200),
        other => panic!("expected parse error, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn embedded_objects_survive_arbitrary_prose(
        prefix in "[a-zA-Z .,!\n]{0,80}",
        suffix in "[a-zA-Z .,!\n]{0,80}",
        n in 0i64..10_000,
    ) {
        let raw = format!("{prefix}{{\"n\": {n}}}{suffix}");
        let value = parse_response(&raw).unwrap();
        prop_assert_eq!(value["n"].as_i64(), Some(n));
    }
}

#[tokio::test]
async fn call_records_prompt_and_returns_scripted_response() {
    let invoker = Arc::new(ScriptedInvoker::new(vec![Ok("{\"done\": true}".into())]));
    let client = ToolClient::new(
        Arc::clone(&invoker) as Arc<dyn ToolInvoker>,
        Arc::new(Semaphore::new(2)),
    );

    let out = client.call("analyze foo", &CancellationToken::new()).await.unwrap();
    assert_eq!(out, "{\"done\": true}");
    assert_eq!(invoker.prompts.lock().as_slice(), ["analyze foo"]);
}

#[tokio::test]
async fn call_fails_fast_when_cancelled_while_waiting_for_slot() {
    let invoker = Arc::new(ScriptedInvoker::repeating("{}"));
    let slots = Arc::new(Semaphore::new(1));
    let cancel = CancellationToken::new();
    let client = ToolClient::new(invoker, Arc::clone(&slots));

    // Hold the only slot so the call blocks on acquisition.
    let held = slots.clone().acquire_owned().await.unwrap();
    cancel.cancel();
    let err = client.call("blocked", &cancel).await.unwrap_err();
    assert!(matches!(err, ToolError::Cancelled));
    drop(held);
}

#[tokio::test]
async fn slot_is_released_after_failure() {
    let invoker = Arc::new(ScriptedInvoker::new(vec![
        Err("exit 1".into()),
        Ok("{\"ok\": 1}".into()),
    ]));
    let slots = Arc::new(Semaphore::new(1));
    let client = ToolClient::new(invoker as Arc<dyn ToolInvoker>, Arc::clone(&slots));
    let cancel = CancellationToken::new();

    assert!(client.call("first", &cancel).await.is_err());
    // Second call acquires the same single slot; it would hang if leaked.
    let value = client.call_json("second", &cancel).await.unwrap();
    assert_eq!(value["ok"], 1);
    assert_eq!(slots.available_permits(), 1);
}
