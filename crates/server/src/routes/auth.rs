// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login, logout, and the operator HTML shell.

use crate::security::{remote_ip, session_cookie, session_token};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use std::time::Instant;

/// 302 Found redirect (axum's `Redirect` emits 303/307 variants).
fn found(location: &'static str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    response.headers_mut().insert(header::LOCATION, HeaderValue::from_static(location));
    response
}

const APP_HTML: &str = include_str!("../../assets/index.html");
const LOGIN_HTML: &str = include_str!("../../assets/login.html");

/// `GET /` — the SPA, or the login page for unauthenticated operators.
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.auth_enabled() {
        let authenticated = session_token(&headers)
            .map(|token| state.sessions.is_authenticated(&token))
            .unwrap_or(false);
        if !authenticated {
            return Html(LOGIN_HTML).into_response();
        }
    }
    Html(APP_HTML).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuthForm {
    #[serde(default)]
    pub passcode: String,
}

/// `POST /auth` — validate the passcode, regenerate the session id, and
/// redirect home. Failures count against the per-IP rate limit.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AuthForm>,
) -> Response {
    let Some(expected) = state.passcode.as_ref() else {
        return found("/");
    };

    let ip = remote_ip(&headers, "local");
    let now = Instant::now();
    if !state.limiter.allowed(&ip, now) {
        tracing::warn!(%ip, "login rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({"error": "too many attempts; try again later"})),
        )
            .into_response();
    }

    if form.passcode != **expected {
        state.limiter.record_failure(&ip, now);
        tracing::warn!(%ip, "login failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "invalid passcode"})),
        )
            .into_response();
    }

    state.limiter.record_success(&ip);
    let old = session_token(&headers);
    let token = state.sessions.authenticate(old.as_deref());
    tracing::info!(%ip, "operator authenticated");

    let mut response = found("/");
    if let Ok(cookie) = header::HeaderValue::from_str(&session_cookie(&token)) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// `POST /auth/logout` — invalidate the session.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        state.sessions.invalidate(&token);
    }
    found("/")
}
