// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::locks::DEFAULT_TTL;
use fortify_core::FakeClock;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    tmp: TempDir,
    store: SidecarStore<FakeClock>,
    locks: Arc<LockManager<FakeClock>>,
    clock: FakeClock,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("app/controllers/foo")).unwrap();
    fs::create_dir_all(tmp.path().join("test/controllers/foo")).unwrap();
    let clock = FakeClock::new();
    let locks = Arc::new(LockManager::new(DEFAULT_TTL, clock.clone()));
    let layout = ProjectLayout::new(tmp.path().to_path_buf(), vec!["app".into(), "test".into()]);
    let store = SidecarStore::new(layout, Arc::clone(&locks));
    Fixture { tmp, store, locks, clock }
}

fn target(f: &Fixture) -> PathBuf {
    let path = f.tmp.path().join("app/controllers/foo/bar_controller.rb");
    fs::write(&path, "class BarController; end\n").unwrap();
    path
}

#[test]
fn sidecar_dir_sits_next_to_target() {
    let f = fixture();
    let target = target(&f);
    let dir = f.store.sidecar_dir(&target, Mode::Hardening);
    assert!(dir.ends_with("app/controllers/foo/.harden/bar_controller"));
    let dir = f.store.sidecar_dir(&target, Mode::Enhancing);
    assert!(dir.ends_with("app/controllers/foo/.enhance/bar_controller"));
}

#[test]
fn write_and_read_sidecar_roundtrip() {
    let f = fixture();
    let target = target(&f);
    let content = json!({"findings": [{"id": "f1", "scope": "action"}]});

    let path = f
        .store
        .write_sidecar(&target, Mode::Hardening, "analysis.json", &content)
        .unwrap();
    assert!(path.ends_with(".harden/bar_controller/analysis.json"));

    // Pretty-printed on disk
    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains('\n'));

    let back = f
        .store
        .read_sidecar(&target, Mode::Hardening, "analysis.json")
        .unwrap()
        .unwrap();
    assert_eq!(back, content);
}

#[test]
fn read_missing_sidecar_is_none() {
    let f = fixture();
    let target = target(&f);
    assert!(f
        .store
        .read_sidecar(&target, Mode::Hardening, "analysis.json")
        .unwrap()
        .is_none());
}

#[test]
fn ensure_sidecar_dir_is_idempotent() {
    let f = fixture();
    let target = target(&f);
    let a = f.store.ensure_sidecar_dir(&target, Mode::Hardening).unwrap();
    let b = f.store.ensure_sidecar_dir(&target, Mode::Hardening).unwrap();
    assert_eq!(a, b);
    assert!(a.is_dir());
}

#[test]
fn safe_write_rejects_traversal_and_creates_nothing() {
    let f = fixture();
    let evil = f.tmp.path().join("app/controllers/../../../etc/passwd");
    let err = f.store.safe_write(&evil, "pwned", None).unwrap_err();
    assert!(matches!(err, StoreError::PathEscape { .. }));
    assert!(!f.tmp.path().join("../../etc/passwd").exists());
}

#[test]
fn safe_write_without_grant_respects_allow_list() {
    let f = fixture();
    let ok = f.tmp.path().join("app/controllers/foo/new_controller.rb");
    f.store.safe_write(&ok, "class NewController; end\n", None).unwrap();
    assert!(ok.exists());

    let denied = f.tmp.path().join("config/routes.rb");
    assert!(matches!(
        f.store.safe_write(&denied, "x", None),
        Err(StoreError::PathEscape { .. })
    ));
}

#[test]
fn safe_write_with_grant_requires_exact_membership() {
    let f = fixture();
    let target = target(&f);
    let other = f.tmp.path().join("app/controllers/foo/other_controller.rb");

    let grant = f
        .locks
        .try_acquire("batch-1", &[target.clone()])
        .unwrap()
        .unwrap();

    f.store.safe_write(&target, "patched\n", Some(grant.id)).unwrap();

    let err = f.store.safe_write(&other, "x", Some(grant.id)).unwrap_err();
    assert!(matches!(err, StoreError::LockViolation { .. }));
}

#[test]
fn safe_write_with_expired_grant_is_a_lock_violation() {
    let f = fixture();
    let target = target(&f);
    let grant = f.locks.try_acquire("batch-1", &[target.clone()]).unwrap().unwrap();

    f.clock.advance(DEFAULT_TTL + std::time::Duration::from_secs(1));
    let err = f.store.safe_write(&target, "late\n", Some(grant.id)).unwrap_err();
    assert!(matches!(err, StoreError::LockViolation { .. }));
}

#[test]
fn derive_test_path_mirrors_app_to_test() {
    let f = fixture();
    let target = target(&f);
    let test_file = f.tmp.path().join("test/controllers/foo/bar_controller_test.rb");
    fs::write(&test_file, "class BarControllerTest; end\n").unwrap();

    let derived = f.store.derive_test_path(&target).unwrap();
    assert_eq!(derived, test_file);
}

#[test]
fn derive_test_path_is_none_when_test_file_missing() {
    let f = fixture();
    let target = target(&f);
    assert!(f.store.derive_test_path(&target).is_none());
}

#[test]
fn copy_from_staging_mirrors_tree_through_safe_write() {
    let f = fixture();
    let staging = TempDir::new().unwrap();
    fs::create_dir_all(staging.path().join("app/controllers/foo")).unwrap();
    fs::write(
        staging.path().join("app/controllers/foo/bar_controller.rb"),
        "hardened\n",
    )
    .unwrap();
    fs::create_dir_all(staging.path().join("test/controllers/foo")).unwrap();
    fs::write(
        staging.path().join("test/controllers/foo/bar_controller_test.rb"),
        "test body\n",
    )
    .unwrap();

    let written = f.store.copy_from_staging(staging.path(), None).unwrap();
    assert_eq!(written.len(), 2);
    assert_eq!(
        fs::read_to_string(f.tmp.path().join("app/controllers/foo/bar_controller.rb")).unwrap(),
        "hardened\n"
    );
    assert_eq!(
        fs::read_to_string(f.tmp.path().join("test/controllers/foo/bar_controller_test.rb"))
            .unwrap(),
        "test body\n"
    );
}

#[test]
fn copy_from_staging_rejects_files_outside_allow_list() {
    let f = fixture();
    let staging = TempDir::new().unwrap();
    fs::create_dir_all(staging.path().join("config")).unwrap();
    fs::write(staging.path().join("config/secrets.yml"), "k: v\n").unwrap();

    let err = f.store.copy_from_staging(staging.path(), None).unwrap_err();
    assert!(matches!(err, StoreError::PathEscape { .. }));
    assert!(!f.tmp.path().join("config/secrets.yml").exists());
}
