// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared server state handed to every route handler.

use crate::security::{RateLimiter, SessionStore, AUTH_MAX_ATTEMPTS, AUTH_WINDOW};
use fortify_core::{Sanitizer, SystemClock};
use fortify_engine::Pipeline;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Concurrent SSE subscribers allowed; excess connections receive 429.
pub const SSE_MAX_CONNECTIONS: usize = 8;

/// Per-subscriber poll cadence.
pub const SSE_POLL: Duration = Duration::from_millis(500);

/// Snapshot serialization cache lifetime, amortizing concurrent
/// subscribers onto one serialization.
pub const SSE_CACHE: Duration = Duration::from_millis(100);

/// The server runs on the real clock.
pub type ServerPipeline = Pipeline<SystemClock>;

/// SSE bookkeeping: subscriber count and the shared serialized-snapshot
/// cache.
pub struct SseShared {
    pub connections: AtomicUsize,
    cache: Mutex<Option<(Instant, Arc<String>)>>,
}

impl SseShared {
    fn new() -> Self {
        Self { connections: AtomicUsize::new(0), cache: Mutex::new(None) }
    }

    /// Serialized, sanitized snapshot; cached for [`SSE_CACHE`].
    pub fn snapshot_json(&self, pipeline: &ServerPipeline, sanitizer: &Sanitizer) -> Arc<String> {
        let now = Instant::now();
        {
            let cache = self.cache.lock();
            if let Some((at, json)) = cache.as_ref() {
                if now.duration_since(*at) < SSE_CACHE {
                    return Arc::clone(json);
                }
            }
        }

        let snapshot = pipeline.snapshot();
        let raw = serde_json::to_string(&snapshot).unwrap_or_else(|e| {
            tracing::error!(error = %e, "snapshot serialization failed");
            "{}".to_string()
        });
        let json = Arc::new(sanitizer.scrub(&raw));
        *self.cache.lock() = Some((now, Arc::clone(&json)));
        json
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ServerPipeline>,
    pub sessions: Arc<SessionStore>,
    pub limiter: Arc<RateLimiter>,
    pub sanitizer: Arc<Sanitizer>,
    /// Operator passcode; `None` disables authentication.
    pub passcode: Option<Arc<String>>,
    pub sse: Arc<SseShared>,
    /// Flipped by `/shutdown` and signals; drains the HTTP server.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        pipeline: Arc<ServerPipeline>,
        passcode: Option<String>,
        session_secret: String,
        project_root: &Path,
    ) -> Self {
        Self {
            pipeline,
            sessions: Arc::new(SessionStore::new(session_secret)),
            limiter: Arc::new(RateLimiter::new(AUTH_MAX_ATTEMPTS, AUTH_WINDOW)),
            sanitizer: Arc::new(Sanitizer::new(project_root)),
            passcode: passcode.map(Arc::new),
            sse: Arc::new(SseShared::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.passcode.is_some()
    }
}
