// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vendor HTTP API client for research queries.

use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("api call cancelled")]
    Cancelled,

    #[error("api request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("api returned {status}: {snippet}")]
    Status { status: u16, snippet: String },

    #[error("api key not configured")]
    NoApiKey,
}

/// Calls the tool vendor's messages endpoint with web-search enabled.
///
/// Concurrency is bounded by its own semaphore, separate from the tool
/// CLI slots.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    slots: Arc<Semaphore>,
}

impl ApiClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        max_tokens: u32,
        slots: Arc<Semaphore>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            max_tokens,
            slots,
        }
    }

    /// POST the prompt, returning the concatenated `text` content blocks.
    pub async fn call(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ApiError> {
        let api_key = self.api_key.as_deref().ok_or(ApiError::NoApiKey)?;

        let _permit = tokio::select! {
            permit = self.slots.acquire() => permit.map_err(|_| ApiError::Cancelled)?,
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
        };

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "tools": [{"type": "web_search_20250305", "name": "web_search"}],
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                snippet: payload.chars().take(200).collect(),
            });
        }

        let value: Value = serde_json::from_str(&payload).map_err(|_| ApiError::Status {
            status: status.as_u16(),
            snippet: payload.chars().take(200).collect(),
        })?;
        Ok(extract_text(&value))
    }
}

/// Concatenate `text`-typed content blocks with newlines; tool-use
/// blocks are discarded.
pub fn extract_text(response: &Value) -> String {
    let Some(blocks) = response.get("content").and_then(Value::as_array) else {
        return String::new();
    };
    let texts: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    texts.join("\n")
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
