// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE specs: change-suppressed frames and the subscriber cap.

use crate::prelude::*;
use futures_util::StreamExt;

/// Next SSE data frame from the body stream, within `limit`.
async fn next_frame(
    body: &mut (impl futures_util::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin),
    limit: Duration,
) -> Option<String> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, body.next()).await {
            Ok(Some(Ok(bytes))) => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                if text.contains("data:") {
                    return Some(text);
                }
                // keep-alive comment; keep reading
            }
            Ok(Some(Err(_))) | Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn frames_are_sent_only_when_the_snapshot_changes() {
    let spec = Spec::new(Vec::new());

    let response = spec.get("/events").await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();

    // Initial frame carries the current snapshot.
    let first = next_frame(&mut body, Duration::from_secs(2)).await.unwrap();
    assert!(first.contains("bar_controller"));

    // No state change: no frame inside a full poll cycle.
    assert!(next_frame(&mut body, Duration::from_millis(800)).await.is_none());

    // Mutate state; the next poll notices the difference.
    spec.seed_awaiting_decisions("bar_controller");
    let changed = next_frame(&mut body, Duration::from_secs(2)).await.unwrap();
    assert!(changed.contains("awaiting_decisions"));
}

#[tokio::test]
async fn subscriber_cap_returns_429() {
    let spec = Spec::new(Vec::new());
    let mut held = Vec::new();
    loop {
        let response = spec.get("/events").await;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            break;
        }
        assert_eq!(response.status(), StatusCode::OK);
        held.push(response);
        assert!(held.len() <= 16, "cap never engaged");
    }
    assert!(!held.is_empty());
}
