// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The atomic transition gate.
//!
//! Every status change goes through [`Pipeline::try_transition`] (or
//! its closure-carrying sibling), which checks the guard and writes the
//! new status under one mutex hold. This is the sole mechanism keeping
//! concurrent requests from double-starting a workflow.

use super::Pipeline;
use crate::error::PipelineError;
use fortify_core::{Clock, Mode, Workflow, WorkflowStatus};

/// Transition pre-condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Succeeds iff the workflow does not exist or is not in an active
    /// status. On success the workflow is created or reset with the
    /// given mode.
    NotActive(Mode),
    /// Succeeds iff the workflow exists and its status is exactly this.
    From(WorkflowStatus),
}

impl<C: Clock> Pipeline<C> {
    /// Atomically check the guard and move to `to`.
    pub fn try_transition(
        &self,
        name: &str,
        guard: Guard,
        to: WorkflowStatus,
    ) -> Result<(), PipelineError> {
        self.transition_and(name, guard, to, |_| {})
    }

    /// Like [`Self::try_transition`], also applying `update` to the
    /// workflow inside the same mutex hold so payload writes cannot be
    /// observed separately from the status change.
    pub(crate) fn transition_and<F>(
        &self,
        name: &str,
        guard: Guard,
        to: WorkflowStatus,
        update: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce(&mut Workflow),
    {
        let epoch_ms = self.clock.epoch_ms();
        let mut state = self.state.lock();

        match guard {
            Guard::NotActive(mode) => {
                if let Some(wf) = state.workflows.get_mut(name) {
                    if wf.status.is_active() {
                        return Err(PipelineError::Guard(format!(
                            "{name} is already active ({})",
                            wf.status
                        )));
                    }
                    wf.reset_for_restart(mode);
                    wf.status = to;
                    wf.started_at = Some(epoch_ms);
                    update(wf);
                } else {
                    let target = state
                        .targets
                        .get(name)
                        .cloned()
                        .ok_or_else(|| PipelineError::UnknownTarget(name.to_string()))?;
                    let mut wf = Workflow::new(&target.name, target.path, target.full_path);
                    wf.mode = mode;
                    wf.status = to;
                    wf.started_at = Some(epoch_ms);
                    update(&mut wf);
                    state.workflows.insert(name.to_string(), wf);
                }
                state.phase = "running".into();
                Ok(())
            }
            Guard::From(expected) => {
                let wf = state
                    .workflows
                    .get_mut(name)
                    .ok_or_else(|| PipelineError::UnknownTarget(name.to_string()))?;
                if wf.status != expected {
                    return Err(PipelineError::Guard(format!(
                        "{name}: expected status {expected}, found {}",
                        wf.status
                    )));
                }
                wf.status = to;
                wf.error = None;
                if to == WorkflowStatus::Complete {
                    wf.completed_at = Some(epoch_ms);
                }
                update(wf);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
