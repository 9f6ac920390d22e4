// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session management, login rate limiting, CSRF discipline, and the
//! security headers applied to every response.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Failed-login attempts allowed per IP per window.
pub const AUTH_MAX_ATTEMPTS: u32 = 5;

/// Rate-limit window for failed logins.
pub const AUTH_WINDOW: Duration = Duration::from_secs(900);

/// Cap on tracked client IPs; oldest windows pruned beyond this.
const MAX_TRACKED_IPS: usize = 1024;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "fortify_session";

/// Generate a 32-byte URL-safe random token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex digest; tokens are stored hashed.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Sign a session id with the server secret.
fn sign(secret: &str, id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(id.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct Session {
    authenticated: bool,
}

/// In-memory session store. Cookie tokens are `<id>.<signature>`;
/// the signature binds the id to `SESSION_SECRET`, and ids are stored
/// hashed so the table never holds usable tokens.
pub struct SessionStore {
    secret: String,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(secret: String) -> Self {
        Self { secret, sessions: Mutex::new(HashMap::new()) }
    }

    /// Issue an unauthenticated session; returns the cookie token.
    pub fn issue(&self) -> String {
        let id = generate_token();
        let token = format!("{id}.{}", sign(&self.secret, &id));
        self.sessions.lock().insert(hash_token(&id), Session { authenticated: false });
        token
    }

    fn verify(&self, token: &str) -> Option<String> {
        let (id, sig) = token.split_once('.')?;
        (sign(&self.secret, id) == sig).then(|| hash_token(id))
    }

    pub fn is_authenticated(&self, token: &str) -> bool {
        let Some(key) = self.verify(token) else {
            return false;
        };
        self.sessions.lock().get(&key).map(|s| s.authenticated).unwrap_or(false)
    }

    /// Successful login: drop the pre-auth session and issue a fresh
    /// authenticated one (fixation defense — the id always changes).
    pub fn authenticate(&self, old_token: Option<&str>) -> String {
        let mut sessions = self.sessions.lock();
        if let Some(key) = old_token.and_then(|t| self.verify(t)) {
            sessions.remove(&key);
        }
        let id = generate_token();
        let token = format!("{id}.{}", sign(&self.secret, &id));
        sessions.insert(hash_token(&id), Session { authenticated: true });
        token
    }

    pub fn invalidate(&self, token: &str) {
        if let Some(key) = self.verify(token) {
            self.sessions.lock().remove(&key);
        }
    }
}

struct AttemptWindow {
    count: u32,
    started: Instant,
}

/// Per-IP failed-login limiter with a capped map.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, AttemptWindow>>,
    max_attempts: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self { windows: Mutex::new(HashMap::new()), max_attempts, window }
    }

    /// Whether this IP may attempt a login right now.
    pub fn allowed(&self, ip: &str, now: Instant) -> bool {
        let windows = self.windows.lock();
        match windows.get(ip) {
            Some(w) if now.duration_since(w.started) < self.window => w.count < self.max_attempts,
            _ => true,
        }
    }

    pub fn record_failure(&self, ip: &str, now: Instant) {
        let mut windows = self.windows.lock();
        match windows.get_mut(ip) {
            Some(w) if now.duration_since(w.started) < self.window => w.count += 1,
            _ => {
                windows.insert(ip.to_string(), AttemptWindow { count: 1, started: now });
            }
        }
        if windows.len() > MAX_TRACKED_IPS {
            let oldest = windows
                .iter()
                .min_by_key(|(_, w)| w.started)
                .map(|(ip, _)| ip.clone());
            if let Some(oldest) = oldest {
                windows.remove(&oldest);
            }
        }
    }

    /// Successful auth resets the counter for that IP.
    pub fn record_success(&self, ip: &str) {
        self.windows.lock().remove(ip);
    }
}

/// Remote IP: rightmost `X-Forwarded-For` entry when present.
pub fn remote_ip(headers: &HeaderMap, peer: &str) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next_back())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| peer.to_string())
}

/// Session token from the cookie header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
}

/// Set-Cookie value for a session token.
pub fn session_cookie(token: &str) -> String {
    format!("{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/")
}

/// Apply the fixed security headers to a response.
pub fn apply_security_headers(response: &mut Response<Body>) {
    let headers = response.headers_mut();
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'none'; script-src 'self' 'unsafe-inline'; style-src 'self' \
             'unsafe-inline'; connect-src 'self'; img-src 'self'",
        ),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000"),
    );
}

/// CSRF discipline: with auth enabled, every state-changing request
/// except the login form must carry `X-Requested-With: XMLHttpRequest`.
/// Cross-origin pages cannot set that header without a CORS preflight.
pub fn csrf_ok(request: &Request<Body>) -> bool {
    if request.method() == Method::GET
        || request.method() == Method::HEAD
        || request.method() == Method::OPTIONS
    {
        return true;
    }
    if request.uri().path() == "/auth" {
        return true;
    }
    request
        .headers()
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "XMLHttpRequest")
        .unwrap_or(false)
}

/// 403 for a missing CSRF header.
pub fn csrf_rejection() -> Response<Body> {
    let mut response = Response::new(Body::from(r#"{"error":"missing CSRF header"}"#));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
#[path = "security_tests.rs"]
mod tests;
