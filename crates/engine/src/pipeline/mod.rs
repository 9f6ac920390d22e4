// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-target workflow state machines and their orchestration.
//!
//! One `Pipeline` object owns every workflow, the lock manager, the
//! scheduler, and both concurrency semaphores. All mutable state sits
//! behind one mutex that is never held across `.await`; long work
//! (tool calls, subprocesses, file I/O) runs outside it and re-enters
//! only to update fields.
//!
//! Lock order: pipeline state mutex → scheduler mutex → lock-manager
//! mutex. No method takes them nested in any other order.

mod chain;
mod enhance;
mod gate;
mod queries;

pub use enhance::BatchSpec;
pub use gate::Guard;

use crate::error::PipelineError;
use crate::phases::PhaseKey;
use crate::scheduler::{Scheduler, WorkItemInfo};
use fortify_core::{
    Clock, ErrorEntry, ErrorLog, PipelineConfig, Query, Workflow, WorkflowStatus,
};
use fortify_exec::{ApiClient, ToolClient, ToolInvoker};
use fortify_store::{LockManager, ProjectLayout, SidecarStore};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long reset waits for each worker before aborting it.
pub const RESET_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A discovered file in the target project.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    pub name: String,
    pub path: PathBuf,
    pub full_path: PathBuf,
}

/// Operator decision over an analysis.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub selected: Option<Vec<String>>,
    /// Enhance mode: research prompts to resolve before planning.
    #[serde(default)]
    pub research: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Skip,
    /// Approve-with-notes; the notes ride along on the apply prompt.
    Selective,
    /// Approve-with-notes; the notes ride along on the apply prompt.
    Modify,
}

pub(crate) struct PipelineState {
    pub phase: String,
    pub targets: IndexMap<String, Target>,
    pub workflows: IndexMap<String, Workflow>,
    pub errors: ErrorLog,
    pub queries: Vec<Query>,
    pub prompts: HashMap<String, String>,
}

impl PipelineState {
    fn new() -> Self {
        Self {
            phase: "idle".into(),
            targets: IndexMap::new(),
            workflows: IndexMap::new(),
            errors: ErrorLog::default(),
            queries: Vec::new(),
            prompts: HashMap::new(),
        }
    }
}

struct WorkerHandle {
    workflow: String,
    /// Hard-kill handle for the phase future itself.
    inner: tokio::task::AbortHandle,
    /// Watcher that records panics/errors against the workflow.
    watcher: JoinHandle<()>,
}

/// Serializable view of an active lock grant.
#[derive(Debug, Clone, Serialize)]
pub struct GrantView {
    pub id: uuid::Uuid,
    pub holder: String,
    pub write_paths: Vec<PathBuf>,
}

/// Deep-copied, mutex-consistent view of pipeline state.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub phase: String,
    pub workflows: IndexMap<String, Workflow>,
    pub errors: Vec<ErrorEntry>,
    pub queries: Vec<Query>,
    pub active_grants: Vec<GrantView>,
    pub queue_depth: usize,
    pub active_items: Vec<WorkItemInfo>,
}

/// The singleton orchestrator. Reset clears state in place; the object
/// itself is never replaced, so concurrent requests always observe the
/// same identity.
pub struct Pipeline<C: Clock> {
    pub(crate) config: PipelineConfig,
    pub(crate) state: Mutex<PipelineState>,
    pub(crate) store: SidecarStore<C>,
    pub(crate) locks: Arc<LockManager<C>>,
    pub(crate) scheduler: Scheduler<C>,
    pub(crate) tool: ToolClient,
    pub(crate) api: ApiClient,
    /// Current cancellation generation; replaced (not un-cancelled) on reset.
    cancel: Mutex<CancellationToken>,
    registry: Mutex<Vec<WorkerHandle>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    pub(crate) clock: C,
}

impl<C: Clock> Pipeline<C> {
    pub fn new(
        config: PipelineConfig,
        invoker: Arc<dyn ToolInvoker>,
        api_key: Option<String>,
        clock: C,
    ) -> Arc<Self> {
        let locks = Arc::new(LockManager::new(config.lock_ttl, clock.clone()));
        let tool_slots = Arc::new(Semaphore::new(config.max_tool_concurrency));
        let api_slots = Arc::new(Semaphore::new(config.max_api_concurrency));
        let tool = ToolClient::new(invoker, Arc::clone(&tool_slots));
        let api = ApiClient::new(
            &config.api_endpoint,
            api_key,
            &config.api_model,
            config.api_max_tokens,
            api_slots,
        );
        let scheduler = Scheduler::new(Arc::clone(&locks), tool_slots, clock.clone());
        let layout = ProjectLayout::new(config.project_root.clone(), config.absolute_allow_list());
        let store = SidecarStore::new(layout, Arc::clone(&locks));

        Arc::new(Self {
            config,
            state: Mutex::new(PipelineState::new()),
            store,
            locks,
            scheduler,
            tool,
            api,
            cancel: Mutex::new(CancellationToken::new()),
            registry: Mutex::new(Vec::new()),
            reaper: Mutex::new(None),
            clock,
        })
    }

    /// Start background machinery: scheduler dispatch loop and lock reaper.
    pub fn start(self: &Arc<Self>) {
        self.scheduler.start();
        let handle = self.locks.spawn_reaper(self.cancel_token());
        *self.reaper.lock() = Some(handle);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The current cancellation generation's token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), PipelineError> {
        if self.cancel_token().is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Walk the targets directory and seed Idle workflows. Sidecar
    /// directories are skipped. Safe to call repeatedly.
    pub fn discover_targets(&self) -> Result<usize, PipelineError> {
        let root = self.config.project_root.join(&self.config.targets_dir);
        let mut found = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(PipelineError::io(format!("scan {}", dir.display()), e)),
            };
            for entry in entries {
                let entry = entry.map_err(|e| PipelineError::io("scan targets", e))?;
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if path.is_dir() {
                    if name != ".harden" && name != ".enhance" {
                        pending.push(path);
                    }
                    continue;
                }
                if name.ends_with(&self.config.target_suffix) {
                    found.push(path);
                }
            }
        }

        let mut state = self.state.lock();
        let mut added = 0;
        for full_path in found {
            let name = full_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rel = full_path
                .strip_prefix(&self.config.project_root)
                .unwrap_or(&full_path)
                .to_path_buf();
            if !state.targets.contains_key(&name) {
                added += 1;
            }
            state.targets.insert(
                name.clone(),
                Target { name: name.clone(), path: rel.clone(), full_path: full_path.clone() },
            );
            state
                .workflows
                .entry(name.clone())
                .or_insert_with(|| Workflow::new(name, rel, full_path));
        }
        tracing::info!(targets = state.targets.len(), added, "target discovery complete");
        Ok(added)
    }

    /// Deep copy of a workflow.
    pub fn workflow(&self, name: &str) -> Result<Workflow, PipelineError> {
        self.state
            .lock()
            .workflows
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownTarget(name.to_string()))
    }

    /// Mutex-consistent snapshot for the server. The three lock holders
    /// are visited sequentially, never nested.
    pub fn snapshot(&self) -> StateSnapshot {
        let (phase, workflows, errors, queries) = {
            let state = self.state.lock();
            (
                state.phase.clone(),
                state.workflows.clone(),
                state.errors.entries().to_vec(),
                state.queries.clone(),
            )
        };
        let queue_depth = self.scheduler.queue_depth();
        let active_items = self.scheduler.active_items();
        let active_grants = self
            .locks
            .active_grants()
            .into_iter()
            .map(|g| GrantView {
                id: g.id,
                holder: g.holder,
                write_paths: g.write_paths.into_iter().collect(),
            })
            .collect();

        StateSnapshot { phase, workflows, errors, queries, active_grants, queue_depth, active_items }
    }

    /// Store the last prompt for `(workflow, phase)`.
    pub(crate) fn store_prompt(&self, name: &str, key: PhaseKey, prompt: &str) {
        self.state.lock().prompts.insert(format!("{name}/{key}"), prompt.to_string());
    }

    /// Retrieve a stored prompt.
    pub fn prompt(&self, name: &str, key: PhaseKey) -> Option<String> {
        self.state.lock().prompts.get(&format!("{name}/{key}")).cloned()
    }

    /// Record a failure on the workflow and the errors list. The first
    /// failure wins; later reports only land in the errors list.
    pub(crate) fn fail_workflow(&self, name: &str, message: &str) {
        let epoch_ms = self.clock.epoch_ms();
        let mut state = self.state.lock();
        if let Some(wf) = state.workflows.get_mut(name) {
            if wf.status != WorkflowStatus::Error {
                wf.fail(message);
            }
        }
        state.errors.push(message, name, epoch_ms);
        tracing::error!(workflow = %name, error = %message, "workflow failed");
    }

    /// Spawn a phase worker wrapped with the error backstop, and track
    /// it in the registry. Dead handles are swept on each spawn.
    pub(crate) fn spawn_worker<F>(self: &Arc<Self>, workflow: &str, fut: F)
    where
        F: Future<Output = Result<(), PipelineError>> + Send + 'static,
    {
        let pipeline = Arc::clone(self);
        let name = workflow.to_string();
        let inner = tokio::spawn(fut);
        let abort = inner.abort_handle();
        let watcher_name = name.clone();
        let watcher = tokio::spawn(async move {
            match inner.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => pipeline.fail_workflow(&watcher_name, &e.to_string()),
                Err(join) if join.is_cancelled() => {
                    pipeline.fail_workflow(&watcher_name, "workflow cancelled")
                }
                Err(join) => {
                    pipeline.fail_workflow(&watcher_name, &format!("worker panicked: {join}"))
                }
            }
        });

        let mut registry = self.registry.lock();
        registry.retain(|h| !h.watcher.is_finished());
        registry.push(WorkerHandle { workflow: name, inner: abort, watcher });
    }

    /// Worker count still tracked (observability and tests).
    pub fn live_workers(&self) -> usize {
        let mut registry = self.registry.lock();
        registry.retain(|h| !h.watcher.is_finished());
        registry.len()
    }

    /// Cancel everything, join workers, and clear state in place.
    ///
    /// The registry is snapshotted after the cancellation flag is set
    /// and cleared only after the join, so a worker spawned during the
    /// race window still observes the cancelled token.
    pub async fn reset(&self) {
        let fresh = CancellationToken::new();
        let old = {
            let mut cancel = self.cancel.lock();
            std::mem::replace(&mut *cancel, fresh.clone())
        };
        old.cancel();

        let workers: Vec<WorkerHandle> = self.registry.lock().drain(..).collect();
        for worker in workers {
            let mut watcher = worker.watcher;
            if tokio::time::timeout(RESET_JOIN_TIMEOUT, &mut watcher).await.is_err() {
                tracing::warn!(workflow = %worker.workflow, "worker did not stop in time; aborting");
                worker.inner.abort();
                watcher.abort();
            }
        }

        self.scheduler.stop().await;
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }

        {
            let mut state = self.state.lock();
            state.phase = "idle".into();
            state.workflows.clear();
            state.errors.clear();
            state.queries.clear();
            state.prompts.clear();
        }
        self.locks.release_all();

        tracing::info!("pipeline reset");
    }

    /// Graceful shutdown: cancel cooperative loops, drain the
    /// scheduler, and drop every lease. State is left as-is for a final
    /// snapshot; the process is expected to exit afterwards.
    pub async fn shutdown(&self) {
        self.cancel_token().cancel();
        self.scheduler.stop().await;
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        self.locks.release_all();
        tracing::info!("pipeline shut down");
    }

    /// Restart background machinery after a reset.
    pub fn restart(self: &Arc<Self>) {
        self.scheduler.start();
        let handle = self.locks.spawn_reaper(self.cancel_token());
        *self.reaper.lock() = Some(handle);
    }
}

#[cfg(test)]
#[path = "../pipeline_tests/mod.rs"]
mod tests;
