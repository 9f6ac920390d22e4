// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Enhance-mode specs: extraction chain, batch planning, batch cycles.

use super::harness::TestPipeline;
use crate::pipeline::{BatchSpec, Decision, DecisionAction, Pipeline};
use fortify_core::{Mode, WorkflowStatus};
use serde_json::json;

fn approve_with_research(research: Vec<String>) -> (Decision, serde_json::Value) {
    let raw = json!({"action": "approve", "research": research.clone()});
    (
        Decision {
            action: DecisionAction::Approve,
            notes: None,
            selected: None,
            research,
        },
        raw,
    )
}

#[tokio::test]
async fn extract_chain_writes_three_sidecars_and_awaits_decisions() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            Ok(json!({"possible_items": [{"id": "e1"}]}).to_string()),
            Ok(json!({"ready_items": [{"id": "e1"}]}).to_string()),
            Ok(json!({"audit": [{"id": "e1", "risk": "low"}]}).to_string()),
        ],
        true,
        true,
    )
    .await;

    h.pipeline.start_analysis("bar_controller", Mode::Enhancing).unwrap();
    h.wait_until("bar_controller", |s| s == WorkflowStatus::AwaitingDecisions).await;

    let wf = h.pipeline.workflow("bar_controller").unwrap();
    assert_eq!(wf.mode, Mode::Enhancing);
    assert_eq!(wf.e_possible_items.unwrap()[0]["id"], "e1");
    assert_eq!(wf.e_ready_items.unwrap()[0]["id"], "e1");
    assert_eq!(wf.e_audit.unwrap()["audit"][0]["risk"], "low");

    let base = h.tmp.path().join("app/controllers/.enhance/bar_controller");
    for file in ["extract.json", "synthesize.json", "audit.json"] {
        assert!(base.join(file).exists(), "missing {file}");
    }
}

#[tokio::test]
async fn parse_batches_reads_planned_batches_in_order() {
    let h = TestPipeline::new(&["bar_controller"]).await;
    h.with_workflow("bar_controller", |wf| {
        wf.e_batches = Some(json!({
            "batches": [
                {"id": "b1", "write_paths": ["app/controllers/bar_controller.rb"]},
                {"id": "b2", "write_paths": ["test/controllers/bar_controller_test.rb"]},
            ]
        }));
    });

    let wf = h.pipeline.workflow("bar_controller").unwrap();
    let batches = Pipeline::<fortify_core::FakeClock>::parse_batches(&wf);
    assert_eq!(
        batches,
        vec![
            BatchSpec {
                id: "b1".into(),
                write_paths: vec!["app/controllers/bar_controller.rb".into()],
            },
            BatchSpec {
                id: "b2".into(),
                write_paths: vec!["test/controllers/bar_controller_test.rb".into()],
            },
        ]
    );
}

#[tokio::test]
async fn enhance_decisions_plan_and_run_batches_to_completion() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![
            // plan_batches
            Ok(json!({
                "batches": [
                    {"id": "b1", "write_paths": ["app/controllers/bar_controller.rb"]},
                    {"id": "b2", "write_paths": ["app/controllers/bar_controller.rb"]},
                ]
            })
            .to_string()),
            // batch b1: apply + verify
            Ok(json!({"applied": ["b1"]}).to_string()),
            Ok(json!({"verified": true}).to_string()),
            // batch b2: apply + verify
            Ok(json!({"applied": ["b2"]}).to_string()),
            Ok(json!({"verified": true}).to_string()),
        ],
        true,
        true,
    )
    .await;

    h.with_workflow("bar_controller", |wf| {
        wf.mode = Mode::Enhancing;
        wf.status = WorkflowStatus::AwaitingDecisions;
        wf.e_audit = Some(json!({"audit": []}));
    });

    let (decision, raw) = approve_with_research(Vec::new());
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();

    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Complete);

    let wf = h.pipeline.workflow("bar_controller").unwrap();
    assert!(wf.current_batch_id.is_none());

    // Per-batch sidecars landed under batches/<id>/.
    let base = h.tmp.path().join("app/controllers/.enhance/bar_controller/batches");
    assert!(base.join("b1/applied.json").exists());
    assert!(base.join("b2/verification.json").exists());

    // Both batches ran the checks.
    assert_eq!(h.run_count("test_runs.txt"), 2);
    assert_eq!(h.run_count("lint_runs.txt"), 2);

    // Grants were released as each batch finished.
    assert!(h.pipeline.snapshot().active_grants.is_empty());
}

#[tokio::test]
async fn empty_batch_plan_completes_immediately() {
    let h = TestPipeline::build(
        &["bar_controller"],
        vec![Ok(json!({"batches": []}).to_string())],
        true,
        true,
    )
    .await;

    h.with_workflow("bar_controller", |wf| {
        wf.mode = Mode::Enhancing;
        wf.status = WorkflowStatus::AwaitingDecisions;
    });

    let (decision, raw) = approve_with_research(Vec::new());
    h.pipeline.submit_decisions("bar_controller", decision, raw).unwrap();

    assert_eq!(h.wait_terminal("bar_controller").await, WorkflowStatus::Complete);
    assert_eq!(h.run_count("test_runs.txt"), 0);
}
