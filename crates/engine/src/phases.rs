// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Phase identities, prompt keys, and the shared write-phase plan.

use fortify_core::{Mode, Workflow};
use fortify_store::GrantId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scheduling class of a phase; lower base priority dispatches earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseClass {
    Apply,
    Extract,
    Analyze,
    Other,
}

impl PhaseClass {
    pub fn base_priority(&self) -> i64 {
        match self {
            PhaseClass::Apply => 0,
            PhaseClass::Extract => 1,
            PhaseClass::Analyze => 2,
            PhaseClass::Other => 3,
        }
    }
}

/// Keys under which prompts are stored and retrieved by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKey {
    Analyze,
    Apply,
    FixTests,
    FixLint,
    Verify,
    Extract,
    Synthesize,
    Audit,
    PlanBatches,
    Ask,
    Explain,
}

fortify_core::simple_display! {
    PhaseKey {
        Analyze => "analyze",
        Apply => "apply",
        FixTests => "fix_tests",
        FixLint => "fix_lint",
        Verify => "verify",
        Extract => "extract",
        Synthesize => "synthesize",
        Audit => "audit",
        PlanBatches => "plan_batches",
        Ask => "ask",
        Explain => "explain",
    }
}

/// Phases whose prompts the operator may retrieve.
pub const VALID_PROMPT_PHASES: &[PhaseKey] = &[
    PhaseKey::Analyze,
    PhaseKey::Apply,
    PhaseKey::FixTests,
    PhaseKey::FixLint,
    PhaseKey::Verify,
    PhaseKey::Extract,
    PhaseKey::Synthesize,
    PhaseKey::Audit,
    PhaseKey::PlanBatches,
];

impl PhaseKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyze" => Some(Self::Analyze),
            "apply" => Some(Self::Apply),
            "fix_tests" => Some(Self::FixTests),
            "fix_lint" => Some(Self::FixLint),
            "verify" => Some(Self::Verify),
            "extract" => Some(Self::Extract),
            "synthesize" => Some(Self::Synthesize),
            "audit" => Some(Self::Audit),
            "plan_batches" => Some(Self::PlanBatches),
            "ask" => Some(Self::Ask),
            "explain" => Some(Self::Explain),
            _ => None,
        }
    }

    pub fn class(&self) -> PhaseClass {
        match self {
            PhaseKey::Apply | PhaseKey::FixTests | PhaseKey::FixLint => PhaseClass::Apply,
            PhaseKey::Extract | PhaseKey::Synthesize => PhaseClass::Extract,
            PhaseKey::Analyze | PhaseKey::Audit => PhaseClass::Analyze,
            _ => PhaseClass::Other,
        }
    }
}

/// Parameters of the shared apply/test/lint/verify chain.
///
/// The hardening chain and each enhance batch differ only in sidecar
/// placement, artifact filenames, the prompt flavor, and whether writes
/// run under a lock grant; this captures those differences.
#[derive(Debug, Clone)]
pub struct WritePlan {
    pub mode: Mode,
    /// Sidecar file for the applied artifact.
    pub applied_filename: String,
    pub test_filename: String,
    pub ci_filename: String,
    pub verification_filename: String,
    /// Required for enhance-batch writes; absent for hardening.
    pub grant_id: Option<GrantId>,
    /// Batch being executed, if any.
    pub batch_id: Option<String>,
}

impl WritePlan {
    /// Plan for the hardening chain.
    pub fn hardening() -> Self {
        Self {
            mode: Mode::Hardening,
            applied_filename: "hardened.json".into(),
            test_filename: "test_results.json".into(),
            ci_filename: "ci_results.json".into(),
            verification_filename: "verification.json".into(),
            grant_id: None,
            batch_id: None,
        }
    }

    /// Plan for one enhance batch, scoped under `batches/<id>/`.
    pub fn enhance_batch(batch_id: &str, grant_id: GrantId) -> Self {
        Self {
            mode: Mode::Enhancing,
            applied_filename: format!("batches/{batch_id}/applied.json"),
            test_filename: format!("batches/{batch_id}/test_results.json"),
            ci_filename: format!("batches/{batch_id}/ci_results.json"),
            verification_filename: format!("batches/{batch_id}/verification.json"),
            grant_id: Some(grant_id),
            batch_id: Some(batch_id.to_string()),
        }
    }
}

// === Prompt builders ===
//
// Prompt wording is operator-tunable surface, not engine logic; these
// produce minimal structured prompts that embed the relevant artifacts.

pub fn analysis_prompt(workflow: &Workflow, source: &str) -> String {
    format!(
        "Analyze the following file for hardening opportunities and reply with a JSON object \
         {{\"findings\": [...]}}.\n\nFile: {}\n\n```\n{}\n```",
        workflow.path.display(),
        source,
    )
}

pub fn apply_prompt(
    workflow: &Workflow,
    decision: &Value,
    staging_dir: &str,
    test_path: Option<&std::path::Path>,
) -> String {
    let tests = match test_path {
        Some(path) => format!("\n\nThe covering test file is {}; update it as needed.", path.display()),
        None => String::new(),
    };
    format!(
        "Apply the approved changes for {} and write the updated files under {}. Reply with a \
         JSON object describing what was applied.{}\n\nAnalysis:\n{}\n\nDecision:\n{}",
        workflow.path.display(),
        staging_dir,
        tests,
        workflow.analysis.as_ref().unwrap_or(&Value::Null),
        decision,
    )
}

pub fn fix_tests_prompt(workflow: &Workflow, test_output: &str) -> String {
    format!(
        "Tests failed after changes to {}. Fix the code under the staging directory and reply \
         with a JSON object describing the fix.\n\nTest output:\n{}",
        workflow.path.display(),
        test_output,
    )
}

pub fn fix_lint_prompt(workflow: &Workflow, lint_output: &str) -> String {
    format!(
        "Lint failed after changes to {}. Fix the offenses and reply with a JSON object \
         describing the fix.\n\nLint output:\n{}",
        workflow.path.display(),
        lint_output,
    )
}

pub fn verify_prompt(workflow: &Workflow, applied: &Value) -> String {
    format!(
        "Verify that the applied changes for {} preserve behavior and actually harden the file. \
         Reply with a JSON object {{\"verified\": bool, \"notes\": [...]}}.\n\nApplied:\n{}",
        workflow.path.display(),
        applied,
    )
}

pub fn extract_prompt(workflow: &Workflow, source: &str) -> String {
    format!(
        "Extract enhancement candidates from {} and reply with a JSON object \
         {{\"possible_items\": [...]}}.\n\n```\n{}\n```",
        workflow.path.display(),
        source,
    )
}

pub fn plan_batches_prompt(workflow: &Workflow) -> String {
    format!(
        "Group the approved enhancement items for {} into independent batches and reply with a \
         JSON object {{\"batches\": [{{\"id\": ..., \"write_paths\": [...]}}]}}.\n\nItems:\n{}",
        workflow.path.display(),
        workflow.e_decisions.as_ref().unwrap_or(&Value::Null),
    )
}

pub fn ask_prompt(workflow: &Workflow, question: &str, source: &str) -> String {
    format!(
        "Answer the operator's question about {}.\n\nQuestion: {}\n\n```\n{}\n```",
        workflow.path.display(),
        question,
        source,
    )
}

pub fn explain_prompt(workflow: &Workflow, finding: &Value) -> String {
    format!(
        "Explain this analysis finding for {} in plain language, including risk and suggested \
         remediation.\n\nFinding:\n{}",
        workflow.path.display(),
        finding,
    )
}

#[cfg(test)]
#[path = "phases_tests.rs"]
mod tests;
