// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn port_defaults_and_parses() {
    std::env::remove_var("PORT");
    assert_eq!(port(), 4567);
    std::env::set_var("PORT", "9000");
    assert_eq!(port(), 9000);
    std::env::set_var("PORT", "junk");
    assert_eq!(port(), 4567);
    std::env::remove_var("PORT");
}

#[test]
#[serial]
fn empty_passcode_disables_auth() {
    std::env::set_var("PASSCODE", "");
    assert!(passcode().is_none());
    std::env::set_var("PASSCODE", "hunter2");
    assert_eq!(passcode().as_deref(), Some("hunter2"));
    std::env::remove_var("PASSCODE");
}

#[test]
#[serial]
fn project_root_defaults_to_cwd() {
    std::env::remove_var("PROJECT_ROOT");
    assert_eq!(project_root(), std::path::PathBuf::from("."));
    std::env::set_var("PROJECT_ROOT", "/srv/app");
    assert_eq!(project_root(), std::path::PathBuf::from("/srv/app"));
    std::env::remove_var("PROJECT_ROOT");
}
