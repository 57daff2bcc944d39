// ==========================================
// 阶段流程集成测试
// ==========================================
// 测试范围:
// 1. 初始化 → 录入 → 自动审批推进 → 全部完成的完整链路
// 2. 单订单最多一个进行中阶段
// 3. 拒绝路径无副作用 (跳过/推进/取消)
// 4. 事务失败整体回滚
// 5. 基于文件库的重新打开后数据一致
// ==========================================


use chrono::Duration;
use roll_stage_workflow::domain::outcome::OutcomeKind;
use roll_stage_workflow::domain::stage::{CuttingResult, MeasuredDimensions};
use roll_stage_workflow::domain::types::{StageStatus, TransitionAction};
use roll_stage_workflow::engine::{AuditAction, SortingInput, WorkflowRepositories};
use roll_stage_workflow::engine::{ORDER_LABEL_CANCELLED, ORDER_LABEL_COMPLETED};
use std::sync::{Arc, Mutex};
use test_helpers::TestEnv;

fn statuses(env: &TestEnv, order_id: &str) -> Vec<StageStatus> {
    env.repos
        .instance_repo
        .find_by_order(order_id)
        .unwrap()
        .iter()
        .map(|i| i.status)
        .collect()
}

fn cutting_rolls(count: usize) -> Vec<CuttingResult> {
    (0..count)
        .map(|i| CuttingResult {
            roll_label: format!("R{}", i + 1),
            target_length: 1500.0,
            actual_length: 1500.0,
        })
        .collect()
}

// ==========================================
// 完整链路
// ==========================================

#[test]
fn test_full_lifecycle_with_auto_approval() {
    let env = TestEnv::new();
    env.order_with_stages("O1");

    // 仓库: 入库 1000, 移交 999, 差额 -1
    let warehouse_id = env.warehouse_ready("O1", 1000.0, 999.0);
    env.clock.advance(Duration::minutes(40));
    let outcome = env.workflow.advance_with_auto_approval("O1", "op1");
    assert!(outcome.success, "{}", outcome.message);
    let result = outcome.data.unwrap();
    assert!(result.decision.approved);
    assert_eq!(result.advance.unwrap().started.unwrap().stage_id, "sorting");

    let warehouse = env.instance("O1", "warehouse");
    assert_eq!(warehouse.instance_id, warehouse_id);
    assert!(warehouse.approval.transfer_approved);
    assert_eq!(warehouse.status, StageStatus::Completed);
    assert_eq!(warehouse.actual_duration_minutes, Some(40));

    // 分拣: 入料重量沿用仓库移交重量 999
    let sorting_id = env.instance("O1", "sorting").instance_id;
    let sorted = env.workflow.record_sorting_results(
        &sorting_id,
        "op2",
        SortingInput {
            roll1_weight: 500.0,
            roll2_weight: 449.0,
            waste_weight: 50.0,
            weight_received: None,
        },
    );
    assert!(sorted.success, "{}", sorted.message);
    assert_eq!(sorted.data.unwrap().warehouse.weight_received, Some(999.0));

    env.clock.advance(Duration::minutes(60));
    let outcome = env.workflow.advance_with_auto_approval("O1", "op2");
    assert!(outcome.success, "{}", outcome.message);
    assert!(env.instance("O1", "sorting").approval.sorting_approved);

    // 裁切
    let cutting_id = env.instance("O1", "cutting").instance_id;
    let measured = MeasuredDimensions {
        length_m: Some(3000.0),
        width_mm: Some(1200.0),
        ..Default::default()
    };
    let cut = env
        .workflow
        .record_cutting_results(&cutting_id, "op3", cutting_rolls(2), measured);
    assert!(cut.success, "{}", cut.message);
    env.clock.advance(Duration::minutes(100));
    let outcome = env.workflow.advance_with_auto_approval("O1", "op3");
    assert!(outcome.success, "{}", outcome.message);
    assert!(env.instance("O1", "cutting").approval.cutting_approved);

    // 包装: 不支持自动审批, 人工推进完成
    assert_eq!(env.order_label("O1").as_deref(), Some("包装"));
    let denied = env.workflow.advance_with_auto_approval("O1", "op4");
    assert!(denied.is_rejected());
    assert_eq!(env.instance("O1", "packing").status, StageStatus::InProgress);

    let last = env.workflow.advance("O1", "op4").data.unwrap();
    assert!(last.order_completed);
    assert_eq!(env.order_label("O1").as_deref(), Some(ORDER_LABEL_COMPLETED));
    assert!(statuses(&env, "O1").iter().all(|s| *s == StageStatus::Completed));

    let history = env.history("O1");
    assert_eq!(
        history
            .iter()
            .filter(|a| **a == TransitionAction::AutoApproved)
            .count(),
        3
    );
    assert_eq!(
        history.iter().filter(|a| **a == TransitionAction::Start).count(),
        4
    );
    assert_eq!(env.sink.events_with(AuditAction::ApprovalDenied).len(), 1);

    // 订单历史投影与底层记录一致
    let projection = env.workflow.order_history("O1").data.unwrap();
    assert_eq!(projection.instances.len(), 4);
    assert_eq!(projection.transitions.len(), history.len());
}

#[test]
fn test_at_most_one_in_progress_through_skips_and_advances() {
    let env = TestEnv::new();
    env.order_with_stages("O1");

    let check = |env: &TestEnv| {
        let in_progress = statuses(env, "O1")
            .iter()
            .filter(|s| **s == StageStatus::InProgress)
            .count();
        assert!(in_progress <= 1);
    };

    env.workflow.advance("O1", "op1");
    check(&env);
    assert!(env.workflow.skip("O1", "sorting", "op1", "客户不需要分拣").success);
    check(&env);
    env.workflow.advance("O1", "op1");
    check(&env);
    assert_eq!(env.instance("O1", "cutting").status, StageStatus::InProgress);
    assert!(env.workflow.skip("O1", "packing", "op1", "散装交付").success);
    let done = env.workflow.advance("O1", "op1").data.unwrap();
    check(&env);
    assert!(done.order_completed);
    assert_eq!(
        statuses(&env, "O1"),
        vec![
            StageStatus::Completed,
            StageStatus::Skipped,
            StageStatus::Completed,
            StageStatus::Skipped
        ]
    );
}

// ==========================================
// 拒绝路径
// ==========================================

#[test]
fn test_skip_non_skippable_stage_writes_no_history() {
    let env = TestEnv::new();
    env.order_with_stages("O1");

    let outcome = env.workflow.skip("O1", "warehouse", "op1", "不需要入库");
    assert!(!outcome.success);
    assert_eq!(outcome.kind, OutcomeKind::Rejected);
    assert!(env.history("O1").is_empty());
    assert!(env.sink.events().is_empty());
}

#[test]
fn test_advance_after_completion_is_business_rejection() {
    let env = TestEnv::new();
    env.order_with_stages("O1");
    for _ in 0..5 {
        env.workflow.advance("O1", "op1");
    }
    assert_eq!(env.order_label("O1").as_deref(), Some(ORDER_LABEL_COMPLETED));

    let history_len = env.history("O1").len();
    let audit_len = env.sink.events().len();
    let outcome = env.workflow.advance("O1", "op1");
    assert_eq!(outcome.kind, OutcomeKind::Rejected);
    assert_eq!(env.history("O1").len(), history_len);
    assert_eq!(env.sink.events().len(), audit_len);
}

#[test]
fn test_advance_uninitialized_order_is_rejected() {
    let env = TestEnv::new();
    test_helpers::OrderBuilder::new("O1").insert(&env.repos);
    assert!(env.workflow.advance("O1", "op1").is_rejected());
    assert_eq!(
        env.workflow.advance("missing", "op1").kind,
        OutcomeKind::IntegrityFailure
    );
}

#[test]
fn test_cancelled_order_blocks_further_work() {
    let env = TestEnv::new();
    env.order_with_stages("O1");
    env.workflow.advance("O1", "op1");

    assert!(env.workflow.cancel("O1", "manager", "客户撤单").success);
    assert_eq!(env.order_label("O1").as_deref(), Some(ORDER_LABEL_CANCELLED));
    assert!(statuses(&env, "O1")
        .iter()
        .all(|s| *s == StageStatus::Cancelled));

    let warehouse = env.instance("O1", "warehouse").instance_id;
    assert!(env
        .workflow
        .approve_weight_received(&warehouse, "op1", 1000.0, None)
        .is_rejected());
    assert!(env.approval_gate.auto_approve_if_eligible(&warehouse, "op1").is_rejected());
    assert!(env.workflow.advance("O1", "op1").is_rejected());
}

// ==========================================
// 事务与持久化
// ==========================================

#[test]
fn test_failed_history_write_rolls_back_advance() {
    let env = TestEnv::new();
    env.order_with_stages("O1");

    {
        let conn = env.repos.connection();
        let guard = conn.lock().unwrap();
        guard.execute_batch("DROP TABLE stage_transition;").unwrap();
    }

    let outcome = env.workflow.advance("O1", "op1");
    assert!(!outcome.success);
    assert_eq!(outcome.kind, OutcomeKind::Unexpected);

    // 实例与订单标签均未改变
    assert!(statuses(&env, "O1").iter().all(|s| *s == StageStatus::Pending));
    assert_eq!(env.order_label("O1"), None);
    assert!(env.sink.events().is_empty());
}

#[test]
fn test_state_survives_reopening_database() {
    let env = TestEnv::new();
    env.order_with_stages("O1");
    env.warehouse_ready("O1", 1000.0, 999.0);
    env.workflow.advance("O1", "op1");

    let conn = test_helpers::open_test_connection(&env.db_path).unwrap();
    let reopened = WorkflowRepositories::new(Arc::new(Mutex::new(conn)));
    let instances = reopened.instance_repo.find_by_order("O1").unwrap();
    let warehouse = instances.iter().find(|i| i.stage_id == "warehouse").unwrap();
    assert_eq!(warehouse.status, StageStatus::Completed);
    assert_eq!(warehouse.warehouse.weight_balance, Some(-1.0));
    assert_eq!(
        warehouse.warehouse.transfer_destination.as_deref(),
        Some("分拣线A")
    );
    let sorting = instances.iter().find(|i| i.stage_id == "sorting").unwrap();
    assert_eq!(sorting.status, StageStatus::InProgress);
    assert_eq!(
        reopened.transition_repo.find_by_order("O1").unwrap().len(),
        env.history("O1").len()
    );
}
