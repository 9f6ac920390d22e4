// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease exclusivity and the all-or-nothing acquisition rule.

use crate::prelude::*;
use fortify_core::FakeClock;
use fortify_store::{LockManager, DEFAULT_TTL};
use std::path::PathBuf;

fn manager() -> LockManager<FakeClock> {
    LockManager::new(DEFAULT_TTL, FakeClock::new())
}

fn p(name: &str) -> PathBuf {
    PathBuf::from(format!("/proj/app/{name}"))
}

#[test]
fn partial_conflict_locks_nothing() {
    let m = manager();
    let _g1 = m.try_acquire("workflow-a", &[p("a.rb")]).unwrap().unwrap();

    // a.rb is held: the {a, b} request must fail...
    assert!(m.try_acquire("workflow-b", &[p("a.rb"), p("b.rb")]).unwrap().is_none());
    // ...without locking b.rb as a side effect.
    assert!(m.try_acquire("workflow-c", &[p("b.rb")]).unwrap().is_some());
}

#[test]
fn active_grants_never_overlap() {
    let m = manager();
    let mut granted = Vec::new();
    // Request overlapping sets; only compatible ones may be granted.
    let requests: Vec<Vec<PathBuf>> = vec![
        vec![p("a.rb"), p("b.rb")],
        vec![p("b.rb"), p("c.rb")],
        vec![p("c.rb"), p("d.rb")],
        vec![p("e.rb")],
    ];
    for (i, paths) in requests.iter().enumerate() {
        if let Some(grant) = m.try_acquire(&format!("w{i}"), paths).unwrap() {
            granted.push(grant);
        }
    }

    for (i, g1) in granted.iter().enumerate() {
        for g2 in granted.iter().skip(i + 1) {
            assert!(
                g1.write_paths.is_disjoint(&g2.write_paths),
                "grants {} and {} overlap",
                g1.id,
                g2.id
            );
        }
    }
}

#[test]
fn double_release_is_harmless() {
    let m = manager();
    let g = m.try_acquire("w", &[p("a.rb")]).unwrap().unwrap();
    assert!(m.release(g.id));
    let after_first = m.active_grants().len();
    assert!(m.release(g.id));
    assert_eq!(m.active_grants().len(), after_first);
}
