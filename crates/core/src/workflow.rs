// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow identity and state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Which status family a workflow traverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Hardening,
    Enhancing,
}

crate::simple_display! {
    Mode {
        Hardening => "hardening",
        Enhancing => "enhancing",
    }
}

impl Mode {
    /// Sidecar directory name for this mode.
    pub fn sidecar_dir(&self) -> &'static str {
        match self {
            Mode::Hardening => ".harden",
            Mode::Enhancing => ".enhance",
        }
    }
}

/// Status of a workflow's traversal.
///
/// One enum covers both mode families; the workflow's [`Mode`] selects
/// which transitions apply. Serialized snake_case so snapshots and the
/// UI share the same strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Discovered, nothing run yet
    #[default]
    Idle,
    /// Analysis tool call in flight
    Analyzing,
    /// Operator must submit decisions
    AwaitingDecisions,
    /// Apply tool call in flight
    Applying,
    /// Apply phase done, gate into testing
    Applied,
    /// Test runner in flight
    Testing,
    /// Tests passed, gate into lint
    Tested,
    /// Fix-loop tool call after a test failure
    FixingTests,
    /// Lint commands in flight
    LintChecking,
    /// Fix-loop tool call after a lint failure
    FixingLint,
    /// Lint passed, gate into verification
    LintPassed,
    /// Verification tool call in flight
    Verifying,
    /// Enhance mode: batch planning in flight
    PlanningBatches,
    /// Terminal: workflow finished
    Complete,
    /// Terminal: operator skipped the target
    Skipped,
    /// Terminal, retryable: fix attempts exhausted on tests
    TestsFailed,
    /// Terminal, retryable: fix attempts exhausted on lint
    LintFailed,
    /// Terminal, retryable: failure recorded in `error`
    Error,
}

crate::simple_display! {
    WorkflowStatus {
        Idle => "idle",
        Analyzing => "analyzing",
        AwaitingDecisions => "awaiting_decisions",
        Applying => "applying",
        Applied => "applied",
        Testing => "testing",
        Tested => "tested",
        FixingTests => "fixing_tests",
        LintChecking => "lint_checking",
        FixingLint => "fixing_lint",
        LintPassed => "lint_passed",
        Verifying => "verifying",
        PlanningBatches => "planning_batches",
        Complete => "complete",
        Skipped => "skipped",
        TestsFailed => "tests_failed",
        LintFailed => "lint_failed",
        Error => "error",
    }
}

/// Statuses representing asynchronous work in flight for either mode.
///
/// The transition gate refuses `NotActive`-guarded starts while a
/// workflow sits in any of these.
pub const ACTIVE_STATUSES: &[WorkflowStatus] = &[
    WorkflowStatus::Analyzing,
    WorkflowStatus::Applying,
    WorkflowStatus::Testing,
    WorkflowStatus::FixingTests,
    WorkflowStatus::LintChecking,
    WorkflowStatus::FixingLint,
    WorkflowStatus::Verifying,
    WorkflowStatus::PlanningBatches,
];

impl WorkflowStatus {
    /// Whether this status represents in-flight asynchronous work.
    pub fn is_active(&self) -> bool {
        ACTIVE_STATUSES.contains(self)
    }

    /// Whether this status is terminal (no further automatic transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Complete
                | WorkflowStatus::Skipped
                | WorkflowStatus::TestsFailed
                | WorkflowStatus::LintFailed
                | WorkflowStatus::Error
        )
    }
}

/// Status of a single research topic in enhance mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    #[default]
    Pending,
    Complete,
    Error,
}

/// An ordered research question resolved through the vendor API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTopic {
    pub prompt: String,
    #[serde(default)]
    pub status: ResearchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Mutable state for one target's traversal.
///
/// Owned exclusively by the pipeline; the server only ever sees deep
/// copies taken under the pipeline mutex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    // Identity (immutable after discovery)
    pub name: String,
    pub path: PathBuf,
    pub full_path: PathBuf,

    pub status: WorkflowStatus,
    #[serde(default)]
    pub mode: Mode,
    /// Active status at which the last failure occurred; drives retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_status: Option<WorkflowStatus>,

    // Per-phase structured payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_results: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Value>,

    // Enhance-mode variants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_analysis: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_possible_items: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_ready_items: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_audit: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_decisions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_batches: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_batch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub research_topics: Vec<ResearchTopic>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_source: Option<String>,
}

impl Workflow {
    /// Fresh workflow for a discovered target.
    pub fn new(name: impl Into<String>, path: PathBuf, full_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            full_path,
            status: WorkflowStatus::Idle,
            mode: Mode::default(),
            last_active_status: None,
            analysis: None,
            decision: None,
            applied: None,
            test_results: None,
            ci_results: None,
            verification: None,
            e_analysis: None,
            e_possible_items: None,
            e_ready_items: None,
            e_audit: None,
            e_decisions: None,
            e_batches: None,
            current_batch_id: None,
            research_topics: Vec::new(),
            error: None,
            started_at: None,
            completed_at: None,
            original_source: None,
        }
    }

    /// Reset phase state while keeping identity, for a `NotActive` restart.
    pub fn reset_for_restart(&mut self, mode: Mode) {
        let identity = (self.name.clone(), self.path.clone(), self.full_path.clone());
        *self = Workflow::new(identity.0, identity.1, identity.2);
        self.mode = mode;
    }

    /// Record a phase failure: terminal error plus where it happened.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_active() {
            self.last_active_status = Some(self.status);
        }
        self.status = WorkflowStatus::Error;
        self.error = Some(message.into());
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
