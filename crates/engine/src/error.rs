// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error kinds.

use fortify_exec::{SupervisorError, ToolError};
use fortify_store::{LockError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transition gate refused; maps to HTTP 409, no state mutated.
    #[error("{0}")]
    Guard(String),

    #[error("unknown controller: {0}")]
    UnknownTarget(String),

    #[error("unknown finding: {0}")]
    UnknownFinding(String),

    #[error("no decision recorded for {0}")]
    MissingDecision(String),

    #[error("workflow cancelled")]
    Cancelled,

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Whether this error is the gate refusing a transition.
    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Guard(_) | Self::UnknownTarget(_))
    }
}
