// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Route table and the cross-cutting middleware: security headers on
//! every response, then the auth/CSRF guard in front of the API.

pub mod auth;
pub mod events;
pub mod pipeline;
pub mod queries;

use crate::security::{apply_security_headers, csrf_ok, csrf_rejection, session_token};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use fortify_engine::PipelineError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(auth::index))
        .route("/auth", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/pipeline/status", get(pipeline::status))
        .route("/pipeline/analyze", post(pipeline::analyze))
        .route("/pipeline/load-analysis", post(pipeline::load_analysis))
        .route("/pipeline/reset", post(pipeline::reset))
        .route("/pipeline/retry", post(pipeline::retry))
        .route("/pipeline/retry-tests", post(pipeline::retry_tests))
        .route("/pipeline/retry-ci", post(pipeline::retry_ci))
        .route("/pipeline/{name}/prompts/{phase}", get(pipeline::prompt))
        .route("/decisions", post(pipeline::decisions))
        .route("/ask", post(queries::ask))
        .route("/explain/{finding_id}", post(queries::explain))
        .route("/events", get(events::stream))
        .route("/shutdown", post(pipeline::shutdown))
        .layer(middleware::from_fn_with_state(state.clone(), guard))
        .layer(middleware::from_fn(headers))
        .with_state(state)
}

/// Security headers on every response, including errors.
async fn headers(request: Request<Body>, next: Next) -> Response<Body> {
    let mut response = next.run(request).await;
    apply_security_headers(&mut response);
    response
}

/// Auth + CSRF gate. `OPTIONS` always bypasses; with no passcode
/// configured the whole gate is off.
async fn guard(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    if !state.auth_enabled() || request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    if !csrf_ok(&request) {
        return csrf_rejection();
    }

    let path = request.uri().path();
    let public = path == "/" || path == "/auth";
    if !public {
        let authenticated = session_token(request.headers())
            .map(|token| state.sessions.is_authenticated(&token))
            .unwrap_or(false);
        if !authenticated {
            return unauthenticated();
        }
    }
    next.run(request).await
}

fn unauthenticated() -> Response<Body> {
    let mut response = Response::new(Body::from(r#"{"error":"authentication required"}"#));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Map engine errors onto the HTTP surface, scrubbing paths.
pub(crate) fn error_response(state: &AppState, err: PipelineError) -> axum::response::Response {
    let status = match &err {
        PipelineError::Guard(_) | PipelineError::MissingDecision(_) => StatusCode::CONFLICT,
        PipelineError::UnknownTarget(_) | PipelineError::UnknownFinding(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = state.sanitizer.scrub(&err.to_string());
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// 400 for missing or empty request fields.
pub(crate) fn bad_request(message: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Extract a non-empty `controller` field.
pub(crate) fn controller_of(body: &serde_json::Value) -> Result<String, axum::response::Response> {
    match body.get("controller").and_then(serde_json::Value::as_str) {
        Some(name) if !name.trim().is_empty() => Ok(name.to_string()),
        _ => Err(bad_request("controller is required")),
    }
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
