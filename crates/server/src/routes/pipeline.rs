// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline control routes: status, phase starts, decisions, retries,
//! prompt retrieval, shutdown.

use super::{bad_request, controller_of, error_response};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fortify_core::Mode;
use fortify_engine::{Decision, PhaseKey, VALID_PROMPT_PHASES};
use serde_json::{json, Value};

/// `GET /pipeline/status` — sanitized state snapshot.
pub async fn status(State(state): State<AppState>) -> Response {
    let json = state.sse.snapshot_json(&state.pipeline, &state.sanitizer);
    let mut response = Response::new(axum::body::Body::from(json.as_str().to_owned()));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// `POST /pipeline/analyze` — start analysis (or enhance extraction).
pub async fn analyze(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let name = match controller_of(&body) {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let mode = match body.get("mode").and_then(Value::as_str) {
        None | Some("hardening") => Mode::Hardening,
        Some("enhancing") => Mode::Enhancing,
        Some(other) => return bad_request(&format!("unknown mode: {other}")),
    };

    match state.pipeline.start_analysis(&name, mode) {
        Ok(()) => Json(json!({"controller": name, "status": "analyzing"})).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `POST /pipeline/load-analysis` — load the analysis sidecar from disk.
pub async fn load_analysis(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let name = match controller_of(&body) {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    match state.pipeline.load_analysis(&name) {
        Ok(()) => Json(json!({"controller": name, "status": "awaiting_decisions"})).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `POST /pipeline/reset` — clear all state in place and restart the
/// background machinery.
pub async fn reset(State(state): State<AppState>) -> Response {
    state.pipeline.reset().await;
    state.pipeline.restart();
    if let Err(e) = state.pipeline.discover_targets() {
        return error_response(&state, e);
    }
    Json(json!({"ok": true})).into_response()
}

/// `POST /decisions` — operator decisions for a target.
pub async fn decisions(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let name = match controller_of(&body) {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let decision: Decision = match serde_json::from_value(body.clone()) {
        Ok(decision) => decision,
        Err(_) => {
            return bad_request("action must be one of approve, skip, selective, modify");
        }
    };
    match state.pipeline.submit_decisions(&name, decision, body) {
        Ok(()) => Json(json!({"controller": name, "ok": true})).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `POST /pipeline/retry` — retry out of `error`.
pub async fn retry(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run_retry(state, body, RetryKind::Error).await
}

/// `POST /pipeline/retry-tests` — retry out of `tests_failed`.
pub async fn retry_tests(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run_retry(state, body, RetryKind::Tests).await
}

/// `POST /pipeline/retry-ci` — retry out of `lint_failed`.
pub async fn retry_ci(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    run_retry(state, body, RetryKind::Lint).await
}

enum RetryKind {
    Error,
    Tests,
    Lint,
}

async fn run_retry(state: AppState, body: Value, kind: RetryKind) -> Response {
    let name = match controller_of(&body) {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let result = match kind {
        RetryKind::Error => state.pipeline.retry(&name),
        RetryKind::Tests => state.pipeline.retry_tests(&name),
        RetryKind::Lint => state.pipeline.retry_lint(&name),
    };
    match result {
        Ok(()) => Json(json!({"controller": name, "ok": true})).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `GET /pipeline/{name}/prompts/{phase}` — the stored prompt.
pub async fn prompt(
    State(state): State<AppState>,
    Path((name, phase)): Path<(String, String)>,
) -> Response {
    let Some(key) = PhaseKey::parse(&phase).filter(|k| VALID_PROMPT_PHASES.contains(k)) else {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown phase"}))).into_response();
    };
    if state.pipeline.workflow(&name).is_err() {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown workflow"}))).into_response();
    }
    match state.pipeline.prompt(&name, key) {
        Some(prompt) => {
            Json(json!({"controller": name, "phase": phase, "prompt": prompt})).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"error": "no prompt stored"}))).into_response(),
    }
}

/// `POST /shutdown` — graceful shutdown.
pub async fn shutdown(State(state): State<AppState>) -> Response {
    tracing::info!("shutdown requested");
    let pipeline = state.pipeline.clone();
    let signal = state.shutdown.clone();
    tokio::spawn(async move {
        pipeline.shutdown().await;
        signal.cancel();
    });
    Json(json!({"ok": true})).into_response()
}
