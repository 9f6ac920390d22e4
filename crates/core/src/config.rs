// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline configuration: external command lines, caps, and timeouts.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// An external command line: program plus fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Everything the pipeline needs to drive a target project.
///
/// Command lines are parameters, not code: the tool CLI, the test
/// runner, and the lint commands are all operator-supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the target project.
    pub project_root: PathBuf,
    /// Directory under the root scanned for targets.
    pub targets_dir: PathBuf,
    /// Filename suffix identifying a target (e.g. `_controller.rb`).
    pub target_suffix: String,
    /// Directories (relative to root) writable by the pipeline.
    pub allow_list: Vec<PathBuf>,

    /// External LLM CLI invocation; the prompt is written to its stdin.
    pub tool_command: ToolCommand,
    /// Test runner invocation.
    pub test_command: ToolCommand,
    /// Lint commands, run in order; all must pass.
    pub lint_commands: Vec<ToolCommand>,

    /// Timeout for one tool CLI call.
    #[serde(with = "duration_secs")]
    pub tool_timeout: Duration,
    /// Timeout for the test runner.
    #[serde(with = "duration_secs")]
    pub test_timeout: Duration,
    /// Timeout for each lint command.
    #[serde(with = "duration_secs")]
    pub lint_timeout: Duration,

    /// Concurrent tool CLI calls.
    pub max_tool_concurrency: usize,
    /// Concurrent vendor-API calls.
    pub max_api_concurrency: usize,
    /// Fix-loop retries after a test failure.
    pub max_fix_attempts: u32,
    /// Fix-loop retries after a lint failure.
    pub max_lint_fix_attempts: u32,

    /// Lease TTL for lock grants.
    #[serde(with = "duration_secs")]
    pub lock_ttl: Duration,

    /// Vendor API endpoint, model, and token cap (research topics).
    pub api_endpoint: String,
    pub api_model: String,
    pub api_max_tokens: u32,
}

impl PipelineConfig {
    /// Defaults for a project rooted at the given path.
    pub fn for_project(project_root: PathBuf) -> Self {
        Self {
            project_root,
            targets_dir: PathBuf::from("app/controllers"),
            target_suffix: "_controller.rb".to_string(),
            allow_list: vec![PathBuf::from("app"), PathBuf::from("test")],
            tool_command: ToolCommand::new("claude", &["-p", "--output-format", "text"]),
            test_command: ToolCommand::new("bin/rails", &["test"]),
            lint_commands: vec![ToolCommand::new("bin/rubocop", &["--force-exclusion"])],
            tool_timeout: Duration::from_secs(600),
            test_timeout: Duration::from_secs(300),
            lint_timeout: Duration::from_secs(120),
            max_tool_concurrency: 12,
            max_api_concurrency: 20,
            max_fix_attempts: 2,
            max_lint_fix_attempts: 2,
            lock_ttl: Duration::from_secs(30 * 60),
            api_endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            api_model: "claude-sonnet-4-5".to_string(),
            api_max_tokens: 4096,
        }
    }

    /// Absolute allow-listed directories.
    pub fn absolute_allow_list(&self) -> Vec<PathBuf> {
        self.allow_list.iter().map(|d| self.project_root.join(d)).collect()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
