// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The hardening phase chain: analyze, decide, then the shared
//! apply → test → lint → verify write loop.
//!
//! Within one workflow the chain runs sequentially on a single worker
//! task; gate statuses mark each hand-off. Fix loops re-invoke the tool
//! a bounded number of times before parking the workflow in a
//! retryable terminal status.

use super::{Decision, DecisionAction, Guard, Pipeline};
use crate::error::PipelineError;
use crate::phases::{self, PhaseKey, WritePlan};
use fortify_core::{Clock, Mode, ToolCommand, WorkflowStatus};
use fortify_exec::supervisor::{self, RunSpec};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

impl<C: Clock> Pipeline<C> {
    /// Operator entry point: start analysis (hardening) or extraction
    /// (enhance) for a target. Guarded by `NotActive`.
    pub fn start_analysis(self: &Arc<Self>, name: &str, mode: Mode) -> Result<(), PipelineError> {
        self.try_transition(name, Guard::NotActive(mode), WorkflowStatus::Analyzing)?;

        let pipeline = Arc::clone(self);
        let workflow = name.to_string();
        self.spawn_worker(name, async move {
            match mode {
                Mode::Hardening => pipeline.run_analysis(&workflow).await,
                Mode::Enhancing => pipeline.run_extract(&workflow).await,
            }
        });
        Ok(())
    }

    /// Load a previously written analysis sidecar instead of re-running
    /// the tool. Leaves the workflow awaiting decisions.
    pub fn load_analysis(&self, name: &str) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        let value = self
            .store
            .read_sidecar(&wf.full_path, Mode::Hardening, "analysis.json")?
            .ok_or_else(|| {
                PipelineError::Guard(format!("{name}: no analysis sidecar on disk"))
            })?;

        self.transition_and(
            name,
            Guard::NotActive(Mode::Hardening),
            WorkflowStatus::AwaitingDecisions,
            |wf| wf.analysis = Some(value),
        )
    }

    /// Operator decisions over a finished analysis.
    pub fn submit_decisions(
        self: &Arc<Self>,
        name: &str,
        decision: Decision,
        raw: Value,
    ) -> Result<(), PipelineError> {
        let mode = self.workflow(name)?.mode;

        match (decision.action, mode) {
            (DecisionAction::Skip, _) => self.transition_and(
                name,
                Guard::From(WorkflowStatus::AwaitingDecisions),
                WorkflowStatus::Skipped,
                |wf| wf.decision = Some(raw),
            ),
            (_, Mode::Hardening) => {
                self.transition_and(
                    name,
                    Guard::From(WorkflowStatus::AwaitingDecisions),
                    WorkflowStatus::Applying,
                    |wf| wf.decision = Some(raw),
                )?;
                let pipeline = Arc::clone(self);
                let workflow = name.to_string();
                self.spawn_worker(name, async move {
                    pipeline.run_chain(workflow, WritePlan::hardening()).await
                });
                Ok(())
            }
            (_, Mode::Enhancing) => {
                self.transition_and(
                    name,
                    Guard::From(WorkflowStatus::AwaitingDecisions),
                    WorkflowStatus::PlanningBatches,
                    |wf| {
                        wf.e_decisions = Some(raw);
                        wf.research_topics = decision
                            .research
                            .iter()
                            .map(|prompt| fortify_core::ResearchTopic {
                                prompt: prompt.clone(),
                                status: fortify_core::ResearchStatus::Pending,
                                result: None,
                            })
                            .collect();
                    },
                )?;
                let pipeline = Arc::clone(self);
                let workflow = name.to_string();
                self.spawn_worker(name, async move { pipeline.run_plan_batches(&workflow).await });
                Ok(())
            }
        }
    }

    /// Retry a workflow out of `error`, resuming where it failed.
    pub fn retry(self: &Arc<Self>, name: &str) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        if wf.status != WorkflowStatus::Error {
            return Err(PipelineError::Guard(format!(
                "{name}: retry requires status error, found {}",
                wf.status
            )));
        }

        match wf.last_active_status {
            Some(WorkflowStatus::Analyzing) | None => {
                self.try_transition(name, Guard::From(WorkflowStatus::Error), WorkflowStatus::Analyzing)?;
                let pipeline = Arc::clone(self);
                let workflow = name.to_string();
                let mode = wf.mode;
                self.spawn_worker(name, async move {
                    match mode {
                        Mode::Hardening => pipeline.run_analysis(&workflow).await,
                        Mode::Enhancing => pipeline.run_extract(&workflow).await,
                    }
                });
                Ok(())
            }
            Some(WorkflowStatus::PlanningBatches) => {
                self.try_transition(
                    name,
                    Guard::From(WorkflowStatus::Error),
                    WorkflowStatus::PlanningBatches,
                )?;
                let pipeline = Arc::clone(self);
                let workflow = name.to_string();
                self.spawn_worker(name, async move { pipeline.run_plan_batches(&workflow).await });
                Ok(())
            }
            Some(_) => self.reenter_write_chain(name, Guard::From(WorkflowStatus::Error)),
        }
    }

    /// Retry out of `tests_failed`, re-entering the apply phase.
    pub fn retry_tests(self: &Arc<Self>, name: &str) -> Result<(), PipelineError> {
        self.reenter_write_chain(name, Guard::From(WorkflowStatus::TestsFailed))
    }

    /// Retry out of `lint_failed`, re-entering the apply phase.
    pub fn retry_lint(self: &Arc<Self>, name: &str) -> Result<(), PipelineError> {
        self.reenter_write_chain(name, Guard::From(WorkflowStatus::LintFailed))
    }

    /// Re-enter the write chain for the same batch (enhance) or the
    /// whole target (hardening).
    fn reenter_write_chain(self: &Arc<Self>, name: &str, guard: Guard) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        match wf.mode {
            Mode::Hardening => {
                if wf.decision.is_none() {
                    return Err(PipelineError::MissingDecision(name.to_string()));
                }
                self.try_transition(name, guard, WorkflowStatus::Applying)?;
                let pipeline = Arc::clone(self);
                let workflow = name.to_string();
                self.spawn_worker(name, async move {
                    pipeline.run_chain(workflow, WritePlan::hardening()).await
                });
                Ok(())
            }
            Mode::Enhancing => {
                // Back to the between-batches state, then re-dispatch the
                // current batch through the scheduler under a fresh grant.
                self.try_transition(name, guard, WorkflowStatus::PlanningBatches)?;
                self.requeue_current_batch(name)
            }
        }
    }

    /// Analysis phase: one tool call, one sidecar, then operator input.
    pub(crate) async fn run_analysis(&self, name: &str) -> Result<(), PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;

        let source = std::fs::read_to_string(&wf.full_path)
            .map_err(|e| PipelineError::io(format!("read {}", wf.full_path.display()), e))?;
        let prompt = phases::analysis_prompt(&wf, &source);
        self.store_prompt(name, PhaseKey::Analyze, &prompt);

        let value = self.tool.call_json(&prompt, &cancel).await?;
        self.store.write_sidecar(&wf.full_path, Mode::Hardening, "analysis.json", &value)?;

        self.transition_and(
            name,
            Guard::From(WorkflowStatus::Analyzing),
            WorkflowStatus::AwaitingDecisions,
            |wf| wf.analysis = Some(value),
        )
    }

    /// The shared write chain. Entry pre-condition: status `Applying`.
    ///
    /// When running under a grant, the lease is heartbeat-renewed
    /// between phases so long chains outlive the TTL.
    pub(crate) async fn run_chain(
        self: Arc<Self>,
        name: String,
        plan: WritePlan,
    ) -> Result<(), PipelineError> {
        self.run_apply(&name, &plan).await?;
        self.check_cancelled()?;
        self.renew_grant(&plan);
        self.try_transition(&name, Guard::From(WorkflowStatus::Applied), WorkflowStatus::Testing)?;
        if !self.run_test_loop(&name, &plan).await? {
            return Ok(()); // parked in tests_failed; lint never runs
        }
        self.check_cancelled()?;
        self.renew_grant(&plan);
        self.try_transition(&name, Guard::From(WorkflowStatus::Tested), WorkflowStatus::LintChecking)?;
        if !self.run_lint_loop(&name, &plan).await? {
            return Ok(()); // parked in lint_failed
        }
        self.check_cancelled()?;
        self.renew_grant(&plan);
        self.try_transition(&name, Guard::From(WorkflowStatus::LintPassed), WorkflowStatus::Verifying)?;
        self.run_verify(&name, &plan).await
    }

    fn renew_grant(&self, plan: &WritePlan) {
        if let Some(grant_id) = plan.grant_id {
            if !self.locks.renew(grant_id) {
                tracing::warn!(grant_id = %grant_id, "grant renewal failed");
            }
        }
    }

    /// Apply phase: the tool writes changed files into the staging tree;
    /// we import them through `safe_write` and record the artifact.
    async fn run_apply(&self, name: &str, plan: &WritePlan) -> Result<(), PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;
        let decision = match plan.mode {
            Mode::Hardening => wf.decision.clone(),
            Mode::Enhancing => wf.e_decisions.clone(),
        }
        .ok_or_else(|| PipelineError::MissingDecision(name.to_string()))?;

        let staging = self.store.sidecar_dir(&wf.full_path, plan.mode).join("staging");
        std::fs::create_dir_all(&staging)
            .map_err(|e| PipelineError::io(format!("create {}", staging.display()), e))?;

        // Keep the pre-apply source so verification and the operator can
        // diff against what the tool started from.
        let original = std::fs::read_to_string(&wf.full_path).ok();

        let test_path = self.store.derive_test_path(&wf.full_path);
        let prompt = phases::apply_prompt(
            &wf,
            &decision,
            &staging.display().to_string(),
            test_path.as_deref(),
        );
        self.store_prompt(name, PhaseKey::Apply, &prompt);

        let value = self.plan_tool_json(&prompt, plan, &cancel).await?;
        self.import_staging(&staging, plan)?;
        self.store.write_sidecar(&wf.full_path, plan.mode, &plan.applied_filename, &value)?;

        let batch_id = plan.batch_id.clone();
        self.transition_and(
            name,
            Guard::From(WorkflowStatus::Applying),
            WorkflowStatus::Applied,
            |wf| {
                wf.applied = Some(value);
                wf.current_batch_id = batch_id;
                if wf.original_source.is_none() {
                    wf.original_source = original;
                }
            },
        )
    }

    /// Test phase with fix loop. Returns `Ok(true)` when tests pass,
    /// `Ok(false)` when attempts are exhausted (status `tests_failed`).
    async fn run_test_loop(&self, name: &str, plan: &WritePlan) -> Result<bool, PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;
        let max_attempts = self.config.max_fix_attempts;
        let mut fixes_used = 0u32;

        loop {
            let output = self
                .run_checked_command(&self.config.test_command, self.config.test_timeout, "test run", &cancel)
                .await?;

            let results = json!({
                "passed": output.exit_ok,
                "fix_attempts": fixes_used,
                "output": output.combined_output,
            });
            self.store.write_sidecar(&wf.full_path, plan.mode, &plan.test_filename, &results)?;
            {
                let mut state = self.state.lock();
                if let Some(wf) = state.workflows.get_mut(name) {
                    wf.test_results = Some(results.clone());
                }
            }

            if output.exit_ok {
                self.try_transition(name, Guard::From(WorkflowStatus::Testing), WorkflowStatus::Tested)?;
                return Ok(true);
            }
            if fixes_used >= max_attempts {
                self.try_transition(
                    name,
                    Guard::From(WorkflowStatus::Testing),
                    WorkflowStatus::TestsFailed,
                )?;
                tracing::warn!(workflow = %name, attempts = fixes_used, "test fix attempts exhausted");
                return Ok(false);
            }

            fixes_used += 1;
            self.try_transition(name, Guard::From(WorkflowStatus::Testing), WorkflowStatus::FixingTests)?;
            self.run_fix(name, plan, PhaseKey::FixTests, &output.combined_output, &cancel)
                .await?;
            self.try_transition(name, Guard::From(WorkflowStatus::FixingTests), WorkflowStatus::Testing)?;
        }
    }

    /// Lint phase with fix loop, mirroring the test loop.
    async fn run_lint_loop(&self, name: &str, plan: &WritePlan) -> Result<bool, PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;
        let max_attempts = self.config.max_lint_fix_attempts;
        let mut fixes_used = 0u32;

        loop {
            let mut passed = true;
            let mut outputs = Vec::new();
            for command in &self.config.lint_commands {
                let output = self
                    .run_checked_command(command, self.config.lint_timeout, "lint run", &cancel)
                    .await?;
                if !output.exit_ok {
                    passed = false;
                }
                outputs.push(json!({
                    "command": command.program,
                    "passed": output.exit_ok,
                    "output": output.combined_output,
                }));
                if !passed {
                    break;
                }
            }

            let results = json!({ "passed": passed, "fix_attempts": fixes_used, "runs": outputs });
            self.store.write_sidecar(&wf.full_path, plan.mode, &plan.ci_filename, &results)?;
            let combined = results["runs"]
                .as_array()
                .map(|runs| {
                    runs.iter()
                        .filter_map(|r| r["output"].as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            {
                let mut state = self.state.lock();
                if let Some(wf) = state.workflows.get_mut(name) {
                    wf.ci_results = Some(results.clone());
                }
            }

            if passed {
                self.try_transition(
                    name,
                    Guard::From(WorkflowStatus::LintChecking),
                    WorkflowStatus::LintPassed,
                )?;
                return Ok(true);
            }
            if fixes_used >= max_attempts {
                self.try_transition(
                    name,
                    Guard::From(WorkflowStatus::LintChecking),
                    WorkflowStatus::LintFailed,
                )?;
                tracing::warn!(workflow = %name, attempts = fixes_used, "lint fix attempts exhausted");
                return Ok(false);
            }

            fixes_used += 1;
            self.try_transition(
                name,
                Guard::From(WorkflowStatus::LintChecking),
                WorkflowStatus::FixingLint,
            )?;
            self.run_fix(name, plan, PhaseKey::FixLint, &combined, &cancel).await?;
            self.try_transition(
                name,
                Guard::From(WorkflowStatus::FixingLint),
                WorkflowStatus::LintChecking,
            )?;
        }
    }

    /// Verification phase; the chain's final step.
    async fn run_verify(self: &Arc<Self>, name: &str, plan: &WritePlan) -> Result<(), PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;
        let applied = wf.applied.clone().unwrap_or(Value::Null);

        let prompt = phases::verify_prompt(&wf, &applied);
        self.store_prompt(name, PhaseKey::Verify, &prompt);

        let value = self.plan_tool_json(&prompt, plan, &cancel).await?;
        self.store
            .write_sidecar(&wf.full_path, plan.mode, &plan.verification_filename, &value)?;

        let done = self.finish_status(name, plan)?;
        self.transition_and(name, Guard::From(WorkflowStatus::Verifying), done, |wf| {
            wf.verification = Some(value);
            if done == WorkflowStatus::Complete {
                wf.current_batch_id = None;
            }
        })?;

        if done == WorkflowStatus::PlanningBatches {
            self.advance_to_next_batch(name)?;
        }
        Ok(())
    }

    /// Run one tool fix iteration: prompt, staged rewrite, import.
    async fn run_fix(
        &self,
        name: &str,
        plan: &WritePlan,
        key: PhaseKey,
        failure_output: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        let staging = self.store.sidecar_dir(&wf.full_path, plan.mode).join("staging");
        let prompt = match key {
            PhaseKey::FixTests => phases::fix_tests_prompt(&wf, failure_output),
            _ => phases::fix_lint_prompt(&wf, failure_output),
        };
        self.store_prompt(name, key, &prompt);

        self.plan_tool_json(&prompt, plan, cancel).await?;
        self.import_staging(&staging, plan)?;
        Ok(())
    }

    /// Copy staged files into the project, under the plan's grant.
    fn import_staging(&self, staging: &std::path::Path, plan: &WritePlan) -> Result<(), PipelineError> {
        if staging.exists() {
            self.store.copy_from_staging(staging, plan.grant_id)?;
        }
        Ok(())
    }

    /// Tool call that respects the plan's slot discipline: scheduler
    /// work already holds a slot, direct chains acquire one.
    pub(crate) async fn plan_tool_json(
        &self,
        prompt: &str,
        plan: &WritePlan,
        cancel: &CancellationToken,
    ) -> Result<Value, PipelineError> {
        let value = if plan.grant_id.is_some() {
            self.tool.call_json_unslotted(prompt, cancel).await?
        } else {
            self.tool.call_json(prompt, cancel).await?
        };
        Ok(value)
    }

    /// Run an external check command (tests, lint) under the supervisor.
    async fn run_checked_command(
        &self,
        command: &ToolCommand,
        timeout: std::time::Duration,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<supervisor::RunOutput, PipelineError> {
        let spec = RunSpec::new(
            &command.program,
            command.args.clone(),
            timeout,
            &self.config.project_root,
        )
        .description(description);
        Ok(supervisor::run(spec, cancel).await?)
    }

    /// What verify should leave behind: `Complete`, or the
    /// between-batches state when enhance batches remain.
    fn finish_status(&self, name: &str, plan: &WritePlan) -> Result<WorkflowStatus, PipelineError> {
        let Some(batch_id) = &plan.batch_id else {
            return Ok(WorkflowStatus::Complete);
        };
        let wf = self.workflow(name)?;
        let batches = Self::parse_batches(&wf);
        let is_last = batches.last().map(|b| &b.id == batch_id).unwrap_or(true);
        Ok(if is_last { WorkflowStatus::Complete } else { WorkflowStatus::PlanningBatches })
    }

}
