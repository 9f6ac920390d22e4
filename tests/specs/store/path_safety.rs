// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Path-safety specs: traversal and grant enforcement on project writes.

use crate::prelude::*;
use fortify_core::FakeClock;
use fortify_store::{LockManager, ProjectLayout, SidecarStore, StoreError, DEFAULT_TTL};

struct StoreFixture {
    tmp: TempDir,
    store: SidecarStore<FakeClock>,
    locks: Arc<LockManager<FakeClock>>,
}

fn fixture() -> StoreFixture {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join("app/controllers")).unwrap();
    std::fs::create_dir_all(tmp.path().join("test")).unwrap();
    let locks = Arc::new(LockManager::new(DEFAULT_TTL, FakeClock::new()));
    let layout = ProjectLayout::new(
        tmp.path().to_path_buf(),
        vec![tmp.path().join("app"), tmp.path().join("test")],
    );
    let store = SidecarStore::new(layout, Arc::clone(&locks));
    StoreFixture { tmp, store, locks }
}

#[test]
fn traversal_write_fails_and_creates_nothing() {
    let f = fixture();
    let evil = f.tmp.path().join("app/controllers/../../../etc/passwd");

    let err = f.store.safe_write(&evil, "pwned", None).unwrap_err();
    assert!(matches!(err, StoreError::PathEscape { .. }));
}

#[test]
fn grant_scoped_write_rejects_paths_outside_the_grant() {
    let f = fixture();
    let inside = f.tmp.path().join("app/controllers/a_controller.rb");
    let outside = f.tmp.path().join("app/controllers/b_controller.rb");
    std::fs::write(&inside, "a\n").unwrap();
    std::fs::write(&outside, "b\n").unwrap();

    let grant = f.locks.try_acquire("batch", &[inside.clone()]).unwrap().unwrap();

    f.store.safe_write(&inside, "patched\n", Some(grant.id)).unwrap();
    assert_eq!(std::fs::read_to_string(&inside).unwrap(), "patched\n");

    let err = f.store.safe_write(&outside, "nope\n", Some(grant.id)).unwrap_err();
    assert!(matches!(err, StoreError::LockViolation { .. }));
    assert_eq!(std::fs::read_to_string(&outside).unwrap(), "b\n");
}

#[test]
fn released_grant_no_longer_authorizes_writes() {
    let f = fixture();
    let path = f.tmp.path().join("app/controllers/a_controller.rb");
    std::fs::write(&path, "a\n").unwrap();

    let grant = f.locks.try_acquire("batch", &[path.clone()]).unwrap().unwrap();
    f.locks.release(grant.id);

    let err = f.store.safe_write(&path, "late\n", Some(grant.id)).unwrap_err();
    assert!(matches!(err, StoreError::LockViolation { .. }));
}
