// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the server crate.

use std::path::PathBuf;

/// Attempts past the preferred port before falling back to OS-assigned.
pub const MAX_PORT_RETRIES: u16 = 20;

/// Path to the target project (`PROJECT_ROOT`, default `.`).
pub fn project_root() -> PathBuf {
    std::env::var("PROJECT_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}

/// Preferred HTTP port (`PORT`, default 4567).
pub fn port() -> u16 {
    std::env::var("PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(4567)
}

/// Bind address (`BIND`, default loopback).
pub fn bind_addr() -> String {
    std::env::var("BIND").unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Operator passcode (`PASSCODE`). Absence disables auth on loopback.
pub fn passcode() -> Option<String> {
    std::env::var("PASSCODE").ok().filter(|s| !s.is_empty())
}

/// Session cookie integrity secret (`SESSION_SECRET`), auto-generated
/// when unset.
pub fn session_secret() -> Option<String> {
    std::env::var("SESSION_SECRET").ok().filter(|s| !s.is_empty())
}

/// Single permitted cross-origin (`CORS_ORIGIN`), unset = same-origin only.
pub fn cors_origin() -> Option<String> {
    std::env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty())
}

/// Credential for the tool vendor HTTP API (`API_KEY`).
pub fn api_key() -> Option<String> {
    std::env::var("API_KEY").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
