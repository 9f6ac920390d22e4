// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::path::PathBuf;
use yare::parameterized;

#[parameterized(
    apply = { PhaseClass::Apply, 0 },
    extract = { PhaseClass::Extract, 1 },
    analyze = { PhaseClass::Analyze, 2 },
    other = { PhaseClass::Other, 3 },
)]
fn base_priorities(class: PhaseClass, expected: i64) {
    assert_eq!(class.base_priority(), expected);
}

#[test]
fn phase_key_parse_roundtrips_display() {
    for key in VALID_PROMPT_PHASES {
        assert_eq!(PhaseKey::parse(&key.to_string()), Some(*key));
    }
    assert_eq!(PhaseKey::parse("nonsense"), None);
}

#[parameterized(
    apply = { PhaseKey::Apply, PhaseClass::Apply },
    fix_tests = { PhaseKey::FixTests, PhaseClass::Apply },
    extract = { PhaseKey::Extract, PhaseClass::Extract },
    analyze = { PhaseKey::Analyze, PhaseClass::Analyze },
    ask = { PhaseKey::Ask, PhaseClass::Other },
)]
fn phase_keys_map_to_classes(key: PhaseKey, class: PhaseClass) {
    assert_eq!(key.class(), class);
}

#[test]
fn enhance_batch_plan_scopes_filenames_under_batch_dir() {
    let grant = uuid::Uuid::new_v4();
    let plan = WritePlan::enhance_batch("b1", grant);
    assert_eq!(plan.applied_filename, "batches/b1/applied.json");
    assert_eq!(plan.ci_filename, "batches/b1/ci_results.json");
    assert_eq!(plan.grant_id, Some(grant));
    assert_eq!(plan.mode, Mode::Enhancing);
}

#[test]
fn hardening_plan_uses_flat_filenames() {
    let plan = WritePlan::hardening();
    assert_eq!(plan.applied_filename, "hardened.json");
    assert!(plan.grant_id.is_none());
    assert!(plan.batch_id.is_none());
}

#[test]
fn prompts_embed_target_path() {
    let wf = Workflow::new(
        "bar_controller",
        PathBuf::from("app/controllers/bar_controller.rb"),
        PathBuf::from("/proj/app/controllers/bar_controller.rb"),
    );
    let prompt = analysis_prompt(&wf, "class Bar; end");
    assert!(prompt.contains("app/controllers/bar_controller.rb"));
    assert!(prompt.contains("class Bar; end"));
}

#[test]
fn apply_prompt_mentions_the_test_file_when_one_exists() {
    let wf = Workflow::new(
        "bar_controller",
        PathBuf::from("app/controllers/bar_controller.rb"),
        PathBuf::from("/proj/app/controllers/bar_controller.rb"),
    );
    let decision = serde_json::json!({"action": "approve"});
    let test_path = PathBuf::from("/proj/test/controllers/bar_controller_test.rb");

    let with = apply_prompt(&wf, &decision, "/staging", Some(&test_path));
    assert!(with.contains("bar_controller_test.rb"));

    let without = apply_prompt(&wf, &decision, "/staging", None);
    assert!(!without.contains("covering test file"));
}
