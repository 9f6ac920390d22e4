// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for pipeline tests: a temp project, a scripted tool,
//! and a fake clock.

use crate::pipeline::Pipeline;
use async_trait::async_trait;
use fortify_core::{FakeClock, PipelineConfig, ToolCommand, Workflow, WorkflowStatus};
use fortify_exec::{ScriptedInvoker, ToolError, ToolInvoker};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Invoker that blocks until cancelled; for reset/cancellation tests.
pub struct HangingInvoker;

#[async_trait]
impl ToolInvoker for HangingInvoker {
    async fn invoke(&self, _prompt: &str, cancel: &CancellationToken) -> Result<String, ToolError> {
        cancel.cancelled().await;
        Err(ToolError::Cancelled)
    }
}

pub struct TestPipeline {
    pub tmp: TempDir,
    pub pipeline: Arc<Pipeline<FakeClock>>,
    pub invoker: Arc<ScriptedInvoker>,
    pub clock: FakeClock,
}

impl TestPipeline {
    /// Pipeline over a temp project with passing test/lint commands and
    /// an empty tool script.
    pub async fn new(targets: &[&str]) -> Self {
        Self::build(targets, Vec::new(), true, true).await
    }

    /// Full control over scripted tool responses and check outcomes.
    pub async fn build(
        targets: &[&str],
        responses: Vec<Result<String, String>>,
        tests_pass: bool,
        lint_passes: bool,
    ) -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("app/controllers")).unwrap();
        fs::create_dir_all(tmp.path().join("test/controllers")).unwrap();
        for name in targets {
            fs::write(
                tmp.path().join(format!("app/controllers/{name}.rb")),
                format!("class {name}; end\n"),
            )
            .unwrap();
        }

        fs::write(tmp.path().join("test_mode.txt"), if tests_pass { "0" } else { "1" }).unwrap();
        fs::write(tmp.path().join("lint_mode.txt"), if lint_passes { "0" } else { "1" }).unwrap();

        let mut config = PipelineConfig::for_project(tmp.path().to_path_buf());
        config.test_command = counting_command("test_runs.txt", "test_mode.txt");
        config.lint_commands = vec![counting_command("lint_runs.txt", "lint_mode.txt")];
        config.tool_timeout = Duration::from_secs(5);
        config.test_timeout = Duration::from_secs(5);
        config.lint_timeout = Duration::from_secs(5);

        let clock = FakeClock::new();
        let invoker = Arc::new(ScriptedInvoker::new(responses));
        let pipeline = Pipeline::new(
            config,
            Arc::clone(&invoker) as Arc<dyn ToolInvoker>,
            None,
            clock.clone(),
        );
        pipeline.discover_targets().unwrap();
        Self { tmp, pipeline, invoker, clock }
    }

    /// Same fixture but a tool that never returns until cancelled.
    pub async fn hanging(targets: &[&str]) -> Self {
        let mut fixture = Self::new(targets).await;
        let config = fixture.pipeline.config().clone();
        fixture.pipeline =
            Pipeline::new(config, Arc::new(HangingInvoker), None, fixture.clock.clone());
        fixture.pipeline.discover_targets().unwrap();
        fixture
    }

    pub fn status(&self, name: &str) -> WorkflowStatus {
        self.pipeline.workflow(name).unwrap().status
    }

    pub fn set_status(&self, name: &str, status: WorkflowStatus) {
        self.with_workflow(name, |wf| wf.status = status);
    }

    pub fn with_workflow(&self, name: &str, f: impl FnOnce(&mut Workflow)) {
        let mut state = self.pipeline.state.lock();
        let wf = state.workflows.get_mut(name).unwrap();
        f(wf);
    }

    /// Seed a workflow ready for decisions.
    pub fn seed_awaiting_decisions(&self, name: &str) {
        self.with_workflow(name, |wf| {
            wf.status = WorkflowStatus::AwaitingDecisions;
            wf.analysis = Some(serde_json::json!({
                "findings": [{"id": "f1", "scope": "action", "title": "raw SQL"}]
            }));
        });
    }

    /// Pre-write files the "tool" would stage during apply.
    pub fn stage_file(&self, target: &str, rel: &str, content: &str) {
        let staging = self
            .tmp
            .path()
            .join(format!("app/controllers/.harden/{target}/staging"));
        let path = staging.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    /// Poll until the workflow reaches a terminal status.
    pub async fn wait_terminal(&self, name: &str) -> WorkflowStatus {
        self.wait_until(name, |s| s.is_terminal()).await
    }

    pub async fn wait_until(
        &self,
        name: &str,
        pred: impl Fn(WorkflowStatus) -> bool,
    ) -> WorkflowStatus {
        for _ in 0..500 {
            let status = self.status(name);
            if pred(status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow {name} never settled; last status {}", self.status(name));
    }

    /// Flip the fake test runner to passing.
    pub fn make_tests_pass(&self) {
        fs::write(self.tmp.path().join("test_mode.txt"), "0").unwrap();
    }

    /// Count lines in a run-recorder file produced by the fake checks.
    pub fn run_count(&self, file: &str) -> usize {
        fs::read_to_string(self.tmp.path().join(file))
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    pub fn sidecar_path(&self, target: &str, file: &str) -> PathBuf {
        self.tmp.path().join(format!("app/controllers/.harden/{target}/{file}"))
    }
}

/// A check command that appends one line per run and exits with the
/// code currently stored in `mode_file` (flippable mid-test).
fn counting_command(file: &str, mode_file: &str) -> ToolCommand {
    ToolCommand::new(
        "sh",
        &["-c", &format!("echo run >> {file}; exit $(cat {mode_file})")],
    )
}
