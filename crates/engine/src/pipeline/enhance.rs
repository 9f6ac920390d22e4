// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enhance mode: extraction, research, batch planning, and the
//! scheduler-driven batch cycles.
//!
//! Each batch is one apply → test → lint → verify cycle under its own
//! lock grant. Between batches the grant is released and re-acquired,
//! so other workflows can interleave on contended files.

use super::{Guard, Pipeline};
use crate::error::PipelineError;
use crate::phases::{self, PhaseClass, PhaseKey, WritePlan};
use fortify_core::{Clock, Mode, ResearchStatus, Workflow, WorkflowStatus};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// One planned batch of enhancement work.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSpec {
    pub id: String,
    pub write_paths: Vec<PathBuf>,
}

impl<C: Clock> Pipeline<C> {
    /// Extraction chain: extract candidates, synthesize ready items,
    /// audit them, then wait for operator decisions. Three tool calls
    /// on one worker task, each persisting its sidecar.
    pub(crate) async fn run_extract(&self, name: &str) -> Result<(), PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;

        let source = std::fs::read_to_string(&wf.full_path)
            .map_err(|e| PipelineError::io(format!("read {}", wf.full_path.display()), e))?;

        let extract_prompt = phases::extract_prompt(&wf, &source);
        self.store_prompt(name, PhaseKey::Extract, &extract_prompt);
        let extracted = self.tool.call_json(&extract_prompt, &cancel).await?;
        self.store.write_sidecar(&wf.full_path, Mode::Enhancing, "extract.json", &extracted)?;
        {
            let mut state = self.state.lock();
            if let Some(wf) = state.workflows.get_mut(name) {
                wf.e_analysis = Some(extracted.clone());
                wf.e_possible_items = extracted.get("possible_items").cloned();
            }
        }
        self.check_cancelled()?;

        let synth_prompt = format!(
            "From these candidate enhancements, select the ones ready to implement and reply \
             with a JSON object {{\"ready_items\": [...]}}.\n\n{extracted}"
        );
        self.store_prompt(name, PhaseKey::Synthesize, &synth_prompt);
        let synthesized = self.tool.call_json(&synth_prompt, &cancel).await?;
        self.store
            .write_sidecar(&wf.full_path, Mode::Enhancing, "synthesize.json", &synthesized)?;
        {
            let mut state = self.state.lock();
            if let Some(wf) = state.workflows.get_mut(name) {
                wf.e_ready_items = synthesized.get("ready_items").cloned();
            }
        }
        self.check_cancelled()?;

        let audit_prompt = format!(
            "Audit the selected enhancements for risk and conflicts; reply with a JSON object \
             {{\"audit\": [...]}}.\n\n{synthesized}"
        );
        self.store_prompt(name, PhaseKey::Audit, &audit_prompt);
        let audited = self.tool.call_json(&audit_prompt, &cancel).await?;
        self.store.write_sidecar(&wf.full_path, Mode::Enhancing, "audit.json", &audited)?;

        self.transition_and(
            name,
            Guard::From(WorkflowStatus::Analyzing),
            WorkflowStatus::AwaitingDecisions,
            |wf| wf.e_audit = Some(audited),
        )
    }

    /// Planning phase: resolve research topics through the vendor API,
    /// then ask the tool to group approved items into batches and
    /// enqueue the first batch.
    pub(crate) async fn run_plan_batches(self: &Arc<Self>, name: &str) -> Result<(), PipelineError> {
        let cancel = self.cancel_token();
        self.run_research(name).await?;

        let wf = self.workflow(name)?;
        let prompt = phases::plan_batches_prompt(&wf);
        self.store_prompt(name, PhaseKey::PlanBatches, &prompt);

        let value = self.tool.call_json(&prompt, &cancel).await?;
        self.store.write_sidecar(&wf.full_path, Mode::Enhancing, "batches.json", &value)?;
        self.store.write_sidecar(
            &wf.full_path,
            Mode::Enhancing,
            "decisions.json",
            wf.e_decisions.as_ref().unwrap_or(&Value::Null),
        )?;

        {
            let mut state = self.state.lock();
            if let Some(wf) = state.workflows.get_mut(name) {
                wf.e_batches = Some(value.clone());
            }
        }

        let wf = self.workflow(name)?;
        let batches = Self::parse_batches(&wf);
        if batches.is_empty() {
            return self.try_transition(
                name,
                Guard::From(WorkflowStatus::PlanningBatches),
                WorkflowStatus::Complete,
            );
        }
        self.enqueue_batch(name, 0)
    }

    /// Resolve pending research topics via the vendor API, writing each
    /// result to a `research/<slug>.md` sidecar.
    async fn run_research(&self, name: &str) -> Result<(), PipelineError> {
        let cancel = self.cancel_token();
        let wf = self.workflow(name)?;

        for (index, topic) in wf.research_topics.iter().enumerate() {
            if topic.status != ResearchStatus::Pending {
                continue;
            }
            self.check_cancelled()?;

            let outcome = self.api.call(&topic.prompt, &cancel).await;
            let (status, result) = match outcome {
                Ok(text) => {
                    let slug = slugify(&topic.prompt);
                    let dir = self.store.sidecar_dir(&wf.full_path, Mode::Enhancing).join("research");
                    std::fs::create_dir_all(&dir)
                        .map_err(|e| PipelineError::io(format!("create {}", dir.display()), e))?;
                    std::fs::write(dir.join(format!("{slug}.md")), &text)
                        .map_err(|e| PipelineError::io("write research result", e))?;
                    (ResearchStatus::Complete, Some(text))
                }
                Err(e) => {
                    tracing::warn!(workflow = %name, error = %e, "research topic failed");
                    (ResearchStatus::Error, Some(e.to_string()))
                }
            };

            let mut state = self.state.lock();
            if let Some(wf) = state.workflows.get_mut(name) {
                if let Some(topic) = wf.research_topics.get_mut(index) {
                    topic.status = status;
                    topic.result = result;
                }
            }
        }
        Ok(())
    }

    /// Batches as planned by the tool, in execution order.
    pub(crate) fn parse_batches(wf: &Workflow) -> Vec<BatchSpec> {
        let Some(batches) = wf.e_batches.as_ref().and_then(|v| v.get("batches")).and_then(Value::as_array)
        else {
            return Vec::new();
        };
        batches
            .iter()
            .filter_map(|b| {
                let id = b.get("id")?.as_str()?.to_string();
                let write_paths = b
                    .get("write_paths")?
                    .as_array()?
                    .iter()
                    .filter_map(Value::as_str)
                    .map(PathBuf::from)
                    .collect();
                Some(BatchSpec { id, write_paths })
            })
            .collect()
    }

    /// Enqueue batch `index` on the scheduler. The callback runs the
    /// write chain under the scheduler's slot and the batch's grant.
    pub(crate) fn enqueue_batch(self: &Arc<Self>, name: &str, index: usize) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        let batches = Self::parse_batches(&wf);
        let Some(batch) = batches.get(index).cloned() else {
            return self.try_transition(
                name,
                Guard::From(WorkflowStatus::PlanningBatches),
                WorkflowStatus::Complete,
            );
        };

        let write_paths: Vec<PathBuf> = batch
            .write_paths
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    self.config.project_root.join(p)
                }
            })
            .collect();

        let pipeline = Arc::clone(self);
        let workflow = name.to_string();
        let batch_id = batch.id.clone();
        self.scheduler.enqueue(
            name,
            PhaseClass::Apply,
            write_paths,
            Box::new(move |grant| {
                Box::pin(async move {
                    let Some(grant_id) = grant else {
                        pipeline.fail_workflow(&workflow, "batch dispatched without a grant");
                        return;
                    };
                    let plan = WritePlan::enhance_batch(&batch_id, grant_id);
                    let entered = pipeline.transition_and(
                        &workflow,
                        Guard::From(WorkflowStatus::PlanningBatches),
                        WorkflowStatus::Applying,
                        |wf| wf.current_batch_id = Some(batch_id.clone()),
                    );
                    let result = match entered {
                        Ok(()) => Arc::clone(&pipeline).run_chain(workflow.clone(), plan).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = result {
                        pipeline.fail_workflow(&workflow, &e.to_string());
                    }
                })
            }),
        )?;
        self.scheduler.start();
        Ok(())
    }

    /// Verify for a non-final batch parked the workflow back in
    /// `planning_batches`; queue the next batch.
    pub(crate) fn advance_to_next_batch(self: &Arc<Self>, name: &str) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        let batches = Self::parse_batches(&wf);
        let next = match &wf.current_batch_id {
            Some(current) => batches.iter().position(|b| &b.id == current).map(|i| i + 1),
            None => Some(0),
        };
        match next {
            Some(index) => self.enqueue_batch(name, index),
            None => self.try_transition(
                name,
                Guard::From(WorkflowStatus::PlanningBatches),
                WorkflowStatus::Complete,
            ),
        }
    }

    /// Retry path: put the current (or first) batch back on the queue.
    pub(crate) fn requeue_current_batch(self: &Arc<Self>, name: &str) -> Result<(), PipelineError> {
        let wf = self.workflow(name)?;
        let batches = Self::parse_batches(&wf);
        let index = match &wf.current_batch_id {
            Some(current) => batches.iter().position(|b| &b.id == current).unwrap_or(0),
            None => 0,
        };
        self.enqueue_batch(name, index)
    }
}

fn slugify(text: &str) -> String {
    let slug: String = text
        .chars()
        .take(48)
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    slug.trim_matches('-').to_string()
}
