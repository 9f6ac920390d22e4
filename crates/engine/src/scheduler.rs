// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work-item scheduling: priority ordering, starvation escape, and
//! slot/lock-gated dispatch.
//!
//! Items dispatch only when a tool slot is free and their write paths
//! can be leased as one grant. Within a tick, items are scanned in
//! (effective priority, queued_at) order; a lock conflict skips the
//! item, an empty slot pool ends the scan.

use crate::phases::PhaseClass;
use fortify_core::Clock;
use fortify_store::{GrantId, LockError, LockManager};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Dispatch loop cadence.
pub const DISPATCH_TICK: Duration = Duration::from_millis(250);

/// Queue age past which an item beats every base priority.
pub const STARVATION_AFTER: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Queued,
    Dispatched,
    Complete,
}

/// Observable slice of a work item.
#[derive(Debug, Clone, Serialize)]
pub struct WorkItemInfo {
    pub id: Uuid,
    pub workflow: String,
    pub phase: PhaseClass,
    pub write_paths: Vec<PathBuf>,
    pub queued_at_ms: u64,
    pub status: WorkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_id: Option<GrantId>,
}

pub type WorkFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type WorkCallback = Box<dyn FnOnce(Option<GrantId>) -> WorkFuture + Send>;

struct QueuedItem {
    info: WorkItemInfo,
    queued_at: Instant,
    callback: WorkCallback,
}

struct SchedulerInner<C: Clock> {
    queue: Mutex<Vec<QueuedItem>>,
    active: Mutex<Vec<WorkItemInfo>>,
    locks: Arc<LockManager<C>>,
    slots: Arc<Semaphore>,
    clock: C,
    tracker: TaskTracker,
    /// Current run's stop signal; replaced on restart after a stop.
    stop: Mutex<CancellationToken>,
    running: std::sync::atomic::AtomicBool,
}

/// Priority queue plus dispatch loop over the shared tool slots.
pub struct Scheduler<C: Clock> {
    inner: Arc<SchedulerInner<C>>,
}

impl<C: Clock> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> Scheduler<C> {
    pub fn new(locks: Arc<LockManager<C>>, slots: Arc<Semaphore>, clock: C) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                queue: Mutex::new(Vec::new()),
                active: Mutex::new(Vec::new()),
                locks,
                slots,
                clock,
                tracker: TaskTracker::new(),
                stop: Mutex::new(CancellationToken::new()),
                running: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    /// Append a work item. Directory write paths are rejected here so a
    /// bad submission is never silently skipped at dispatch time.
    pub fn enqueue(
        &self,
        workflow: impl Into<String>,
        phase: PhaseClass,
        write_paths: Vec<PathBuf>,
        callback: WorkCallback,
    ) -> Result<WorkItemInfo, LockError> {
        for path in &write_paths {
            if path.is_dir() {
                return Err(LockError::OverLock { path: path.display().to_string() });
            }
        }
        let info = WorkItemInfo {
            id: Uuid::new_v4(),
            workflow: workflow.into(),
            phase,
            write_paths,
            queued_at_ms: self.inner.clock.epoch_ms(),
            status: WorkStatus::Queued,
            grant_id: None,
        };
        self.inner.queue.lock().push(QueuedItem {
            info: info.clone(),
            queued_at: self.inner.clock.now(),
            callback,
        });
        tracing::debug!(workflow = %info.workflow, phase = ?phase, "work item queued");
        Ok(info)
    }

    /// Start the dispatch loop. Idempotent while running, restartable
    /// after [`Self::stop`].
    pub fn start(&self) {
        if self.inner.running.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        let run = {
            let mut stop = self.inner.stop.lock();
            if stop.is_cancelled() {
                *stop = CancellationToken::new();
                self.inner.tracker.reopen();
            }
            stop.clone()
        };
        let scheduler = self.clone();
        self.inner.tracker.spawn(async move {
            let mut tick = tokio::time::interval(DISPATCH_TICK);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => scheduler.dispatch_pending(),
                    _ = run.cancelled() => break,
                }
            }
        });
    }

    /// Stop dispatching and wait for in-flight callbacks to finish.
    /// Queued items stay queued; they dispatch again after a restart.
    pub async fn stop(&self) {
        self.inner.stop.lock().cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn active_items(&self) -> Vec<WorkItemInfo> {
        self.inner.active.lock().clone()
    }

    /// One dispatch scan. Public so tests and shutdown paths can tick
    /// the queue without the background loop.
    ///
    /// Each dispatched item consumes one tool slot for the whole
    /// callback; work running under the scheduler must therefore use
    /// the unslotted tool path.
    pub fn dispatch_pending(&self) {
        if self.inner.stop.lock().is_cancelled() {
            return;
        }
        let now = self.inner.clock.now();

        loop {
            // No free slot ends the scan for this tick.
            let Ok(permit) = Arc::clone(&self.inner.slots).try_acquire_owned() else {
                return;
            };

            let item = {
                let mut queue = self.inner.queue.lock();
                let mut order: Vec<usize> = (0..queue.len()).collect();
                order.sort_by_key(|&i| {
                    (effective_priority(&queue[i], now), queue[i].queued_at)
                });

                let mut chosen = None;
                for idx in order {
                    let candidate = &queue[idx];
                    if candidate.info.write_paths.is_empty() {
                        chosen = Some((idx, None));
                        break;
                    }
                    match self
                        .inner
                        .locks
                        .try_acquire(&candidate.info.workflow, &candidate.info.write_paths)
                    {
                        Ok(Some(grant)) => {
                            chosen = Some((idx, Some(grant.id)));
                            break;
                        }
                        // Conflict: skip this item, try the next.
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(workflow = %candidate.info.workflow, error = %e, "lock rejected at dispatch");
                            continue;
                        }
                    }
                }
                // Dropping the unused permit returns the slot.
                let Some((idx, grant_id)) = chosen else { return };
                let mut item = queue.remove(idx);
                item.info.status = WorkStatus::Dispatched;
                item.info.grant_id = grant_id;
                item
            };

            self.spawn_item(item, permit);
        }
    }

    fn spawn_item(&self, item: QueuedItem, permit: tokio::sync::OwnedSemaphorePermit) {
        let inner = Arc::clone(&self.inner);
        let info = item.info.clone();
        self.inner.active.lock().push(info.clone());
        tracing::info!(workflow = %info.workflow, phase = ?info.phase, "work item dispatched");

        let callback = item.callback;
        self.inner.tracker.spawn(async move {
            (callback)(info.grant_id).await;
            drop(permit);
            if let Some(grant_id) = info.grant_id {
                inner.locks.release(grant_id);
            }
            inner.active.lock().retain(|i| i.id != info.id);
        });
    }
}

fn effective_priority(item: &QueuedItem, now: Instant) -> i64 {
    if now.duration_since(item.queued_at) > STARVATION_AFTER {
        -1
    } else {
        item.info.phase.base_priority()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
