// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler ordering specs: priority and starvation escape through
//! the public scheduler API.

use crate::prelude::*;
use fortify_core::FakeClock;
use fortify_engine::{PhaseClass, STARVATION_AFTER};
use fortify_store::{LockManager, DEFAULT_TTL};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

fn scheduler(slots: usize) -> (Scheduler<FakeClock>, FakeClock) {
    let clock = FakeClock::new();
    let locks = Arc::new(LockManager::new(DEFAULT_TTL, clock.clone()));
    (Scheduler::new(locks, Arc::new(Semaphore::new(slots)), clock.clone()), clock)
}

fn record(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> fortify_engine::WorkCallback {
    let log = Arc::clone(log);
    Box::new(move |_| {
        Box::pin(async move {
            log.lock().push(tag);
        })
    })
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn aged_analyze_item_beats_fresh_apply() {
    let (scheduler, clock) = scheduler(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    scheduler
        .enqueue("old", PhaseClass::Analyze, vec![], record(&log, "analyze"))
        .unwrap();
    // Age the analyze item past the starvation threshold, then add a
    // fresh apply item that would otherwise win on base priority.
    clock.advance(STARVATION_AFTER + Duration::from_secs(100));
    scheduler
        .enqueue("fresh", PhaseClass::Apply, vec![], record(&log, "apply"))
        .unwrap();

    scheduler.dispatch_pending();
    settle().await;
    assert_eq!(log.lock().first().copied(), Some("analyze"));
}

#[tokio::test]
async fn without_aging_apply_wins_the_single_slot() {
    let (scheduler, _clock) = scheduler(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    scheduler
        .enqueue("a", PhaseClass::Analyze, vec![], record(&log, "analyze"))
        .unwrap();
    scheduler
        .enqueue("b", PhaseClass::Apply, vec![], record(&log, "apply"))
        .unwrap();

    scheduler.dispatch_pending();
    settle().await;
    assert_eq!(log.lock().first().copied(), Some("apply"));
}
