// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External LLM tool client: slot-bounded invocation and response parsing.

use crate::supervisor::{self, RunSpec, SupervisorError};
use async_trait::async_trait;
use fortify_core::{PipelineConfig, ToolCommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Characters of raw output carried in a parse failure.
const PARSE_SNIPPET_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool call cancelled")]
    Cancelled,

    #[error("tool exited non-zero: {snippet}")]
    Failed { snippet: String },

    #[error("unparseable tool response: {snippet}")]
    Parse { snippet: String },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// Seam for invoking the external tool; production uses [`CliInvoker`],
/// tests script responses.
///
/// Cancellation is passed per call: the pipeline swaps in a fresh token
/// generation on reset, so invokers must not capture one.
#[async_trait]
pub trait ToolInvoker: Send + Sync + 'static {
    async fn invoke(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ToolError>;
}

/// Invokes the configured CLI through the supervisor. The prompt is
/// delivered on stdin so prompt size is not bounded by ARG_MAX.
pub struct CliInvoker {
    command: ToolCommand,
    timeout: Duration,
    working_dir: PathBuf,
}

impl CliInvoker {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            command: config.tool_command.clone(),
            timeout: config.tool_timeout,
            working_dir: config.project_root.clone(),
        }
    }
}

#[async_trait]
impl ToolInvoker for CliInvoker {
    async fn invoke(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ToolError> {
        let spec = RunSpec::new(
            &self.command.program,
            self.command.args.clone(),
            self.timeout,
            &self.working_dir,
        )
        .stdin(prompt)
        .description("tool call");

        let out = supervisor::run(spec, cancel).await.map_err(|e| match e {
            SupervisorError::Cancelled { .. } => ToolError::Cancelled,
            other => ToolError::Supervisor(other),
        })?;

        if !out.exit_ok {
            return Err(ToolError::Failed { snippet: snippet(&out.combined_output) });
        }
        Ok(out.combined_output)
    }
}

/// Slot-bounded front to a [`ToolInvoker`].
///
/// Holds the tool-concurrency semaphore; waiting for a slot races the
/// cancellation token so reset never strands a caller.
#[derive(Clone)]
pub struct ToolClient {
    invoker: Arc<dyn ToolInvoker>,
    slots: Arc<Semaphore>,
}

impl ToolClient {
    pub fn new(invoker: Arc<dyn ToolInvoker>, slots: Arc<Semaphore>) -> Self {
        Self { invoker, slots }
    }

    /// Shared tool-slot semaphore (the scheduler checks availability).
    pub fn slots(&self) -> Arc<Semaphore> {
        Arc::clone(&self.slots)
    }

    /// Invoke the tool with a prompt, holding one slot for the duration.
    pub async fn call(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, ToolError> {
        let permit = tokio::select! {
            permit = self.slots.acquire() => permit.map_err(|_| ToolError::Cancelled)?,
            _ = cancel.cancelled() => return Err(ToolError::Cancelled),
        };
        let result = self.invoker.invoke(prompt, cancel).await;
        drop(permit);
        result
    }

    /// Invoke and parse in one step.
    pub async fn call_json(&self, prompt: &str, cancel: &CancellationToken) -> Result<Value, ToolError> {
        let raw = self.call(prompt, cancel).await?;
        parse_response(&raw)
    }

    /// Invoke without acquiring a slot, for callers that already hold
    /// one (the scheduler holds a slot for each dispatched item).
    pub async fn call_unslotted(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        self.invoker.invoke(prompt, cancel).await
    }

    /// Unslotted invoke-and-parse.
    pub async fn call_json_unslotted(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let raw = self.call_unslotted(prompt, cancel).await?;
        parse_response(&raw)
    }
}

fn snippet(raw: &str) -> String {
    raw.chars().take(PARSE_SNIPPET_LEN).collect()
}

/// Parse a tool response that may be bare JSON, fenced JSON, or JSON
/// embedded in prose. Top-level arrays are rejected.
pub fn parse_response(raw: &str) -> Result<Value, ToolError> {
    let trimmed = raw.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return require_object(value, raw);
    }

    if let Some(fenced) = strip_fence(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.trim()) {
            return require_object(value, raw);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return require_object(value, raw);
            }
        }
    }

    Err(ToolError::Parse { snippet: snippet(raw) })
}

fn require_object(value: Value, raw: &str) -> Result<Value, ToolError> {
    if value.is_object() {
        Ok(value)
    } else {
        Err(ToolError::Parse { snippet: snippet(raw) })
    }
}

/// Contents of the first ```lang … ``` fence, if any.
fn strip_fence(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_tag = text[open + 3..].find('\n').map(|i| open + 3 + i + 1)?;
    let close = text[after_tag..].rfind("```")? + after_tag;
    (after_tag <= close).then(|| &text[after_tag..close])
}

/// Scripted invoker for tests: pops canned responses in order.
#[cfg(any(test, feature = "test-support"))]
pub struct ScriptedInvoker {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<String, String>>>,
    repeat: Option<String>,
    pub prompts: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-support"))]
impl ScriptedInvoker {
    pub fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses.into()),
            repeat: None,
            prompts: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Invoker that returns the same response forever.
    pub fn repeating(response: &str) -> Self {
        let mut s = Self::new(Vec::new());
        s.repeat = Some(response.to_string());
        s
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(&self, prompt: &str, _cancel: &CancellationToken) -> Result<String, ToolError> {
        self.prompts.lock().push(prompt.to_string());
        match self.responses.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(ToolError::Failed { snippet: msg }),
            None => match &self.repeat {
                Some(text) => Ok(text.clone()),
                None => Err(ToolError::Failed { snippet: "script exhausted".into() }),
            },
        }
    }
}

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;
