// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn defaults_match_documented_caps() {
    let cfg = PipelineConfig::for_project(PathBuf::from("/proj"));
    assert_eq!(cfg.max_tool_concurrency, 12);
    assert_eq!(cfg.max_api_concurrency, 20);
    assert_eq!(cfg.max_fix_attempts, 2);
    assert_eq!(cfg.max_lint_fix_attempts, 2);
    assert_eq!(cfg.lock_ttl, Duration::from_secs(1800));
}

#[test]
fn absolute_allow_list_joins_root() {
    let cfg = PipelineConfig::for_project(PathBuf::from("/proj"));
    assert_eq!(
        cfg.absolute_allow_list(),
        vec![PathBuf::from("/proj/app"), PathBuf::from("/proj/test")]
    );
}

#[test]
fn config_roundtrips_durations_as_seconds() {
    let cfg = PipelineConfig::for_project(PathBuf::from("/proj"));
    let json = serde_json::to_value(&cfg).unwrap();
    assert_eq!(json["lock_ttl"], 1800);
    let back: PipelineConfig = serde_json::from_value(json).unwrap();
    assert_eq!(back.lock_ttl, cfg.lock_ttl);
}
