// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `/events` SSE stream: capped subscribers, change-suppressed
//! frames.

use crate::state::{AppState, SseShared, SSE_MAX_CONNECTIONS, SSE_POLL};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Decrements the subscriber count when a stream ends, however it ends.
struct ConnectionGuard(Arc<SseShared>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `GET /events`.
pub async fn stream(State(state): State<AppState>) -> Response {
    let previous = state.sse.connections.fetch_add(1, Ordering::SeqCst);
    if previous >= SSE_MAX_CONNECTIONS {
        state.sse.connections.fetch_sub(1, Ordering::SeqCst);
        tracing::warn!(subscribers = previous, "SSE subscriber cap reached");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "too many event subscribers"})),
        )
            .into_response();
    }
    let guard = ConnectionGuard(Arc::clone(&state.sse));

    let stream = async_stream::stream! {
        let _guard = guard;
        let mut last_sent: Option<Arc<String>> = None;
        loop {
            if state.shutdown.is_cancelled() {
                break;
            }
            let json = state.sse.snapshot_json(&state.pipeline, &state.sanitizer);
            let changed = last_sent.as_ref().map(|prev| **prev != *json).unwrap_or(true);
            if changed {
                yield Ok::<_, Infallible>(Event::default().data(json.as_str()));
                last_sent = Some(json);
            }
            tokio::select! {
                _ = tokio::time::sleep(SSE_POLL) => {}
                _ = state.shutdown.cancelled() => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
