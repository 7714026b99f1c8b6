// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Case lifecycle tests: create, activate, complete, terminate, suspend.

mod common;

use std::collections::HashMap;

use common::*;

use caseflow_core::execution::CaseExecutionState;

#[tokio::test]
async fn test_single_task_case_completes_and_closes() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "loan.case.json",
        &case_json("loan", r#"{"id": "approve", "type": "humanTask"}"#),
    )
    .await;

    // 1. Create the case instance: root and task become ACTIVE
    let case = ctx
        .engine
        .create_case_instance_by_key("loan", HashMap::new())
        .await
        .unwrap();
    assert_eq!(case.state, CaseExecutionState::Active);
    assert_eq!(case.activity_id.as_deref(), Some("casePlanModel"));

    let task = ctx.engine.case_execution(&case.id, "approve").await.unwrap();
    assert_eq!(task.state, CaseExecutionState::Active);
    assert_eq!(task.parent_id.as_deref(), Some(case.id.as_str()));

    // 2. Complete the task: the plan model completes, the case instance
    //    closes and the whole tree is removed
    ctx.engine.complete(&case.id, "approve").await.unwrap();

    assert!(ctx.engine.case_execution(&case.id, "approve").await.is_none());
    assert!(
        ctx.engine.case_instance(&case.id).await.is_none(),
        "closed case instance must not be queryable"
    );
    assert!(ctx.engine.case_executions(&case.id).await.is_empty());
}

#[tokio::test]
async fn test_manual_activation_waits_enabled() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "m.case.json",
        &case_json(
            "manual",
            r#"{"id": "review", "type": "humanTask", "manual_activation": true}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("manual", HashMap::new())
        .await
        .unwrap();

    let review = ctx.engine.case_execution(&case.id, "review").await.unwrap();
    assert_eq!(review.state, CaseExecutionState::Enabled);

    ctx.engine.manual_start(&case.id, "review").await.unwrap();
    let review = ctx.engine.case_execution(&case.id, "review").await.unwrap();
    assert_eq!(review.state, CaseExecutionState::Active);

    ctx.engine.complete(&case.id, "review").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_disable_reenable_cycle() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "d.case.json",
        &case_json(
            "disabling",
            r#"{"id": "optional", "type": "humanTask", "manual_activation": true},
               {"id": "main", "type": "humanTask"}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("disabling", HashMap::new())
        .await
        .unwrap();

    ctx.engine.disable(&case.id, "optional").await.unwrap();
    let optional = ctx.engine.case_execution(&case.id, "optional").await.unwrap();
    assert_eq!(optional.state, CaseExecutionState::Disabled);

    // the main task keeps the case alive
    assert!(ctx.engine.case_instance(&case.id).await.is_some());

    ctx.engine.reenable(&case.id, "optional").await.unwrap();
    let optional = ctx.engine.case_execution(&case.id, "optional").await.unwrap();
    assert_eq!(optional.state, CaseExecutionState::Enabled);

    ctx.engine.manual_start(&case.id, "optional").await.unwrap();
    ctx.engine.complete(&case.id, "optional").await.unwrap();
    ctx.engine.complete(&case.id, "main").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_disabling_last_open_task_completes_case() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "d2.case.json",
        &case_json(
            "lone",
            r#"{"id": "only", "type": "humanTask", "manual_activation": true}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("lone", HashMap::new())
        .await
        .unwrap();

    // disabling the only task settles every child, so the case completes
    ctx.engine.disable(&case.id, "only").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_nested_stage_completion_bubbles_up() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "n.case.json",
        &case_json(
            "nested",
            r#"{"id": "review", "type": "stage", "items": [
                {"id": "check", "type": "humanTask"}
            ]}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("nested", HashMap::new())
        .await
        .unwrap();

    let stage = ctx.engine.case_execution(&case.id, "review").await.unwrap();
    assert_eq!(stage.state, CaseExecutionState::Active);
    let check = ctx.engine.case_execution(&case.id, "check").await.unwrap();
    assert_eq!(check.state, CaseExecutionState::Active);
    assert_eq!(check.parent_id.as_deref(), Some(stage.id.as_str()));

    // completing the inner task completes the stage, then the case
    ctx.engine.complete(&case.id, "check").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_available_milestone_blocks_strict_completion() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "ms.case.json",
        &case_json(
            "milestoned",
            r#"{"id": "work", "type": "humanTask"},
               {"id": "done", "type": "milestone"}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("milestoned", HashMap::new())
        .await
        .unwrap();

    let done = ctx.engine.case_execution(&case.id, "done").await.unwrap();
    assert_eq!(done.state, CaseExecutionState::Available);

    // without auto-complete, the AVAILABLE milestone keeps the case open
    ctx.engine.complete(&case.id, "work").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_some());

    ctx.engine.occur(&case.id, "done").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_auto_complete_cleans_waiting_children() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "ac.case.json",
        &auto_complete_case_json(
            "auto",
            r#"{"id": "must", "type": "humanTask", "required": true},
               {"id": "maybe", "type": "milestone"}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("auto", HashMap::new())
        .await
        .unwrap();

    // only the required child gates completion; the waiting milestone is
    // cleaned up through the simplified terminal path
    ctx.engine.complete(&case.id, "must").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_required_child_blocks_auto_completion() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "rq.case.json",
        &auto_complete_case_json(
            "required",
            r#"{"id": "a", "type": "humanTask", "required": true},
               {"id": "b", "type": "humanTask"}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("required", HashMap::new())
        .await
        .unwrap();

    ctx.engine.complete(&case.id, "b").await.unwrap();
    assert!(
        ctx.engine.case_instance(&case.id).await.is_some(),
        "required child still active, case must stay open"
    );

    ctx.engine.complete(&case.id, "a").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_terminate_sweeps_children_before_committing() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "t.case.json",
        &case_json(
            "terminating",
            r#"{"id": "a", "type": "humanTask"},
               {"id": "b", "type": "humanTask"},
               {"id": "m", "type": "milestone"}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("terminating", HashMap::new())
        .await
        .unwrap();

    ctx.engine.terminate(&case.id, "casePlanModel").await.unwrap();

    // the root commits TERMINATED only after all children are swept out;
    // it stays queryable until the instance is closed
    let root = ctx.engine.case_instance(&case.id).await.unwrap();
    assert_eq!(root.state, CaseExecutionState::Terminated);
    assert!(ctx.engine.case_execution(&case.id, "a").await.is_none());
    assert!(ctx.engine.case_execution(&case.id, "b").await.is_none());
    assert!(ctx.engine.case_execution(&case.id, "m").await.is_none());

    ctx.engine.close(&case.id).await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_terminated_task_notifies_parent() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "tt.case.json",
        &case_json("task-term", r#"{"id": "only", "type": "humanTask"}"#),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("task-term", HashMap::new())
        .await
        .unwrap();

    // terminating the only task settles all children and the case
    // completes itself
    ctx.engine.terminate(&case.id, "only").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_suspend_resume_restores_previous_states() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "s.case.json",
        &case_json(
            "suspending",
            r#"{"id": "running", "type": "humanTask"},
               {"id": "waiting", "type": "humanTask", "manual_activation": true}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("suspending", HashMap::new())
        .await
        .unwrap();

    ctx.engine.suspend(&case.id, "casePlanModel").await.unwrap();

    let root = ctx.engine.case_instance(&case.id).await.unwrap();
    assert_eq!(root.state, CaseExecutionState::Suspended);
    let running = ctx.engine.case_execution(&case.id, "running").await.unwrap();
    assert_eq!(running.state, CaseExecutionState::Suspended);
    let waiting = ctx.engine.case_execution(&case.id, "waiting").await.unwrap();
    assert_eq!(waiting.state, CaseExecutionState::Suspended);

    ctx.engine.resume(&case.id, "casePlanModel").await.unwrap();

    let root = ctx.engine.case_instance(&case.id).await.unwrap();
    assert_eq!(root.state, CaseExecutionState::Active);
    let running = ctx.engine.case_execution(&case.id, "running").await.unwrap();
    assert_eq!(running.state, CaseExecutionState::Active);
    // previous state restored, not blindly ACTIVE
    let waiting = ctx.engine.case_execution(&case.id, "waiting").await.unwrap();
    assert_eq!(waiting.state, CaseExecutionState::Enabled);
}

#[tokio::test]
async fn test_fault_and_reactivate() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "f.case.json",
        &case_json("faulty", r#"{"id": "shaky", "type": "humanTask"}"#),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("faulty", HashMap::new())
        .await
        .unwrap();

    ctx.engine.fault(&case.id, "shaky").await.unwrap();
    let shaky = ctx.engine.case_execution(&case.id, "shaky").await.unwrap();
    assert_eq!(shaky.state, CaseExecutionState::Failed);

    ctx.engine.reactivate(&case.id, "shaky").await.unwrap();
    let shaky = ctx.engine.case_execution(&case.id, "shaky").await.unwrap();
    assert_eq!(shaky.state, CaseExecutionState::Active);

    ctx.engine.complete(&case.id, "shaky").await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_repetition_reinstantiates_sibling() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "r.case.json",
        &case_json(
            "repeating",
            r#"{"id": "daily", "type": "humanTask", "repetition": true},
               {"id": "gate", "type": "humanTask"}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("repeating", HashMap::new())
        .await
        .unwrap();

    let first = ctx.engine.case_execution(&case.id, "daily").await.unwrap();
    ctx.engine.complete(&case.id, "daily").await.unwrap();

    // a fresh instance of the repeatable item exists and is active again
    let second = ctx.engine.case_execution(&case.id, "daily").await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.state, CaseExecutionState::Active);

    ctx.engine.terminate(&case.id, "casePlanModel").await.unwrap();
    ctx.engine.close(&case.id).await.unwrap();
    assert!(ctx.engine.case_instance(&case.id).await.is_none());
}

#[tokio::test]
async fn test_invalid_transition_is_rejected() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "iv.case.json",
        &case_json(
            "invalid",
            r#"{"id": "gated", "type": "humanTask", "manual_activation": true}"#,
        ),
    )
    .await;

    let case = ctx
        .engine
        .create_case_instance_by_key("invalid", HashMap::new())
        .await
        .unwrap();

    // completing an ENABLED task is not a legal transition
    let err = ctx.engine.complete(&case.id, "gated").await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TRANSITION");
    assert!(err.to_string().contains("enabled"));

    // nothing changed
    let gated = ctx.engine.case_execution(&case.id, "gated").await.unwrap();
    assert_eq!(gated.state, CaseExecutionState::Enabled);
}

#[tokio::test]
async fn test_variables_flow_into_case_instance() {
    let ctx = TestContext::new();
    ctx.deploy_case(
        "v.case.json",
        &case_json("vars", r#"{"id": "work", "type": "humanTask"}"#),
    )
    .await;

    let mut variables = HashMap::new();
    variables.insert("amount".to_string(), serde_json::json!(250));

    let case = ctx
        .engine
        .create_case_instance_by_key("vars", variables)
        .await
        .unwrap();

    // visible from the child through the parent chain
    let value = ctx.engine.variable(&case.id, "work", "amount").await;
    assert_eq!(value, Some(serde_json::json!(250)));
}
