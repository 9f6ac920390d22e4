// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ad-hoc query routes; both return 202 with the query id.

use super::{bad_request, controller_of, error_response};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// `POST /ask` — free-form question about a target.
pub async fn ask(State(state): State<AppState>, Json(body): Json<Value>) -> Response {
    let name = match controller_of(&body) {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    let question = match body.get("question").and_then(Value::as_str) {
        Some(q) if !q.trim().is_empty() => q,
        _ => return bad_request("question is required"),
    };
    match state.pipeline.ask(&name, question) {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({"query_id": id}))).into_response(),
        Err(e) => error_response(&state, e),
    }
}

/// `POST /explain/{finding_id}` — explain one analysis finding.
pub async fn explain(
    State(state): State<AppState>,
    Path(finding_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let name = match controller_of(&body) {
        Ok(name) => name,
        Err(resp) => return resp,
    };
    match state.pipeline.explain(&name, &finding_id) {
        Ok(id) => (StatusCode::ACCEPTED, Json(json!({"query_id": id}))).into_response(),
        Err(e) => error_response(&state, e),
    }
}
