use super::*;
use crate::domain::order::DeliverySpec;
use crate::domain::outcome::OutcomeKind;
use crate::domain::stage::{QualityRecord, SortingResults, StageDefinition};
use crate::domain::types::{OrderPriority, StageStatus};
use crate::engine::audit::MemoryAuditSink;
use crate::engine::clock::FixedClock;
use crate::engine::collaborators::AllocationOutcome;
use chrono::NaiveDate;
use std::error::Error;
use std::sync::Mutex;

fn ts(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn catalog() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("warehouse", "仓库入库", 1, Some(60), false),
        StageDefinition::new("sorting", "分拣", 2, Some(90), true),
        StageDefinition::new("cutting", "裁切", 3, Some(120), false),
        StageDefinition::new("packing", "包装", 4, Some(30), true),
    ]
}

struct Fixture {
    repos: WorkflowRepositories,
    sink: Arc<MemoryAuditSink>,
    gate: ApprovalGate,
}

fn fixture() -> Fixture {
    let conn = Arc::new(Mutex::new(crate::db::open_in_memory().unwrap()));
    let repos = WorkflowRepositories::new(conn);
    for def in catalog() {
        repos.stage_repo.upsert(&def).unwrap();
    }
    let sink = Arc::new(MemoryAuditSink::new());
    let clock = Arc::new(FixedClock::new(ts(2, 8, 30)));
    let gate = ApprovalGate::new(repos.clone(), clock, sink.clone(), GateThresholds::default());
    Fixture { repos, sink, gate }
}

fn insert_order(repos: &WorkflowRepositories, order_id: &str, priority: OrderPriority) -> Order {
    let mut order = Order::new(order_id.into(), format!("NO-{}", order_id), priority, ts(1, 8, 0));
    order.spec = DeliverySpec {
        width_mm: Some(1200.0),
        length_m: Some(3000.0),
        ..Default::default()
    };
    repos.order_repo.insert(&order).unwrap();
    order
}

/// 插入订单的全部阶段实例 (待处理)
fn insert_instances(repos: &WorkflowRepositories, order_id: &str) {
    let instances: Vec<ProcessingInstance> = catalog()
        .iter()
        .map(|def| {
            ProcessingInstance::pending(format!("{}-{}", order_id, def.stage_id), order_id, def, ts(1, 8, 0))
        })
        .collect();
    repos
        .transaction(|tx| ProcessingInstanceRepository::insert_batch_in_tx(tx, &instances))
        .unwrap();
}

fn load(repos: &WorkflowRepositories, instance_id: &str) -> ProcessingInstance {
    repos.instance_repo.find_by_id(instance_id).unwrap().unwrap()
}

fn save(repos: &WorkflowRepositories, inst: &ProcessingInstance) {
    repos
        .transaction(|tx| ProcessingInstanceRepository::update_in_tx(tx, inst))
        .unwrap();
}

/// 进行中的仓库阶段, 重量平衡且已设置移交去向
fn ready_warehouse(repos: &WorkflowRepositories, order_id: &str) -> String {
    let id = format!("{}-warehouse", order_id);
    let mut inst = load(repos, &id);
    inst.status = StageStatus::InProgress;
    inst.started_at = Some(ts(2, 8, 0));
    inst.warehouse.weight_received = Some(1000.0);
    inst.warehouse.weight_transferred = Some(999.5);
    inst.warehouse.weight_balance = Some(-0.5);
    inst.warehouse.transfer_destination = Some("分拣线A".into());
    save(repos, &inst);
    id
}

fn transition_count(repos: &WorkflowRepositories, order_id: &str) -> usize {
    repos.transition_repo.find_by_order(order_id).unwrap().len()
}

struct StubAllocator(Result<AllocationOutcome, String>);

impl MaterialAllocator for StubAllocator {
    fn allocate(
        &self,
        _spec: &DeliverySpec,
        _required_weight: f64,
    ) -> Result<AllocationOutcome, Box<dyn Error + Send + Sync>> {
        self.0.clone().map_err(|e| e.into())
    }
}

// ==========================================
// 评估
// ==========================================

#[test]
fn test_evaluate_does_not_write() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");

    let outcome = f.gate.evaluate(&id);
    assert!(outcome.success);
    let decision = outcome.data.unwrap();
    assert!(decision.eligible());
    assert!(!decision.approved);

    assert!(!load(&f.repos, &id).is_approved());
    assert_eq!(transition_count(&f.repos, "O1"), 0);
    assert!(f.sink.events().is_empty());
}

#[test]
fn test_evaluate_missing_instance_is_integrity_failure() {
    let f = fixture();
    let outcome = f.gate.evaluate("nope");
    assert!(!outcome.success);
    assert_eq!(outcome.kind, OutcomeKind::IntegrityFailure);
}

// ==========================================
// 自动审批
// ==========================================

#[test]
fn test_auto_approve_grants_and_records_history() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");

    let outcome = f.gate.auto_approve_if_eligible(&id, "system");
    assert!(outcome.success, "{}", outcome.message);
    assert!(outcome.data.unwrap().approved);

    let inst = load(&f.repos, &id);
    assert!(inst.approval.transfer_approved);
    assert!(!inst.approval.sorting_approved);
    assert_eq!(inst.approval.approved_by.as_deref(), Some("system"));
    assert_eq!(inst.approval.approved_at, Some(ts(2, 8, 30)));

    let history = f.repos.transition_repo.find_by_instance(&id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, TransitionAction::AutoApproved);
    assert!(history[0].payload_json.is_some());

    let events = f
        .sink
        .events_with(AuditAction::Transition(TransitionAction::AutoApproved));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].instance_id.as_deref(), Some(id.as_str()));
}

#[test]
fn test_auto_approve_rejects_unbalanced_weight() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");

    let mut inst = load(&f.repos, &id);
    inst.warehouse.weight_transferred = Some(995.0);
    inst.warehouse.weight_balance = Some(-5.0);
    save(&f.repos, &inst);

    let outcome = f.gate.auto_approve_if_eligible(&id, "system");
    assert!(outcome.is_rejected());
    let decision = outcome.data.unwrap();
    assert!(!decision.approved);
    assert!(!decision.smart_validation.weight_balance.passed);

    assert!(!load(&f.repos, &id).is_approved());
    assert_eq!(transition_count(&f.repos, "O1"), 0);
    assert_eq!(f.sink.events_with(AuditAction::ApprovalDenied).len(), 1);
}

#[test]
fn test_auto_approve_twice_is_rejected() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");

    assert!(f.gate.auto_approve_if_eligible(&id, "system").success);
    let again = f.gate.auto_approve_if_eligible(&id, "system");
    assert!(again.is_rejected());
    assert!(again.message.contains("已审批"));
    assert_eq!(transition_count(&f.repos, "O1"), 1);
}

#[test]
fn test_other_stage_kind_never_auto_approved() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");

    let outcome = f.gate.auto_approve_if_eligible("O1-packing", "system");
    assert!(outcome.is_rejected());
    let decision = outcome.data.unwrap();
    assert!(!decision.routine.passed);
    assert!(!load(&f.repos, "O1-packing").is_approved());
}

#[test]
fn test_skipped_stage_cannot_be_approved() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let mut inst = load(&f.repos, "O1-sorting");
    inst.status = StageStatus::Skipped;
    save(&f.repos, &inst);

    let outcome = f.gate.auto_approve_if_eligible("O1-sorting", "system");
    assert!(outcome.is_rejected());
    assert!(outcome.data.is_none());
}

#[test]
fn test_completed_stage_cannot_be_approved() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");
    let mut inst = load(&f.repos, &id);
    inst.status = StageStatus::Completed;
    inst.completed_at = Some(ts(2, 8, 20));
    save(&f.repos, &inst);
    let revision = load(&f.repos, &id).revision;

    let outcome = f.gate.auto_approve_if_eligible(&id, "system");
    assert!(outcome.is_rejected());
    assert!(outcome.data.is_none());
    assert!(f.gate.smart_approve(&id, "system").is_rejected());

    let stored = load(&f.repos, &id);
    assert!(!stored.is_approved());
    assert_eq!(stored.revision, revision);
    assert_eq!(transition_count(&f.repos, "O1"), 0);
    assert!(f.sink.events().is_empty());
}

#[test]
fn test_failed_history_write_rolls_back_grant() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");
    let revision = load(&f.repos, &id).revision;

    {
        let conn = f.repos.connection();
        let guard = conn.lock().unwrap();
        guard.execute_batch("DROP TABLE stage_transition;").unwrap();
    }

    let outcome = f.gate.auto_approve_if_eligible(&id, "system");
    assert!(!outcome.success);
    assert_eq!(outcome.kind, OutcomeKind::Unexpected);

    // 审批标记与版本号均未改变
    let stored = load(&f.repos, &id);
    assert!(!stored.is_approved());
    assert!(stored.approval.approved_by.is_none());
    assert_eq!(stored.revision, revision);
    assert!(f.sink.events().is_empty());
}

#[test]
fn test_sorting_waste_over_routine_threshold_rejected() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let mut inst = load(&f.repos, "O1-sorting");
    inst.status = StageStatus::InProgress;
    inst.started_at = Some(ts(2, 8, 0));
    inst.warehouse.weight_received = Some(1000.0);
    inst.sorting = Some(SortingResults {
        roll1_weight: 450.0,
        roll2_weight: 430.0,
        waste_weight: 120.0,
        recorded_at: ts(2, 8, 20),
    });
    save(&f.repos, &inst);

    let outcome = f.gate.auto_approve_if_eligible("O1-sorting", "system");
    assert!(outcome.is_rejected());
    let decision = outcome.data.unwrap();
    assert!(!decision.routine.passed);
    // 12% 仍低于质量阈值 15%
    assert!(decision.smart_validation.quality_standards.passed);
}

// ==========================================
// 成本效率 / 选料服务
// ==========================================

#[test]
fn test_allocator_failure_fails_cost_check() {
    let f = fixture();
    let mut order = insert_order(&f.repos, "O1", OrderPriority::Normal);
    order.pricing.final_price = Some(10_000.0);
    let gate = ApprovalGate::new(
        f.repos.clone(),
        Arc::new(FixedClock::new(ts(2, 8, 30))),
        f.sink.clone(),
        GateThresholds::default(),
    )
    .with_allocator(Arc::new(StubAllocator(Ok(AllocationOutcome {
        passed: false,
        estimated_cost: None,
        reason: Some("库存不足".into()),
    }))));

    insert_instances(&f.repos, "O1");
    let inst = load(&f.repos, "O1-warehouse");
    let report = gate.smart_validation(&inst, &order, ts(2, 8, 30));
    assert!(!report.cost_efficiency.passed);
    assert!(report.cost_efficiency.reasons[0].contains("库存不足"));
}

#[test]
fn test_allocator_cost_used_when_order_has_none() {
    let f = fixture();
    let mut order = insert_order(&f.repos, "O1", OrderPriority::Normal);
    order.pricing.final_price = Some(1_000.0);
    let gate = ApprovalGate::new(
        f.repos.clone(),
        Arc::new(FixedClock::new(ts(2, 8, 30))),
        f.sink.clone(),
        GateThresholds::default(),
    )
    .with_allocator(Arc::new(StubAllocator(Ok(AllocationOutcome {
        passed: true,
        estimated_cost: Some(2_000.0),
        reason: None,
    }))));

    insert_instances(&f.repos, "O1");
    let mut inst = load(&f.repos, "O1-sorting");
    inst.warehouse.weight_received = Some(1000.0);
    inst.estimated_duration_minutes = Some(60);
    inst.sorting = Some(SortingResults {
        roll1_weight: 450.0,
        roll2_weight: 430.0,
        waste_weight: 120.0,
        recorded_at: ts(2, 8, 20),
    });

    // 废料成本 0.12 × 2000 = 240 > 报价 5% (50)
    let report = gate.smart_validation(&inst, &order, ts(2, 8, 30));
    assert!(!report.cost_efficiency.passed);
    assert!(report.cost_efficiency.reasons[0].contains("废料成本"));

    let errored = ApprovalGate::new(
        f.repos.clone(),
        Arc::new(FixedClock::new(ts(2, 8, 30))),
        f.sink.clone(),
        GateThresholds::default(),
    )
    .with_allocator(Arc::new(StubAllocator(Err("timeout".into()))));
    let report = errored.smart_validation(&inst, &order, ts(2, 8, 30));
    assert!(report.cost_efficiency.reasons[0].contains("timeout"));
}

// ==========================================
// 智能审批
// ==========================================

#[test]
fn test_smart_approve_grants_when_all_criteria_pass() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");

    let outcome = f.gate.smart_approve(&id, "system");
    assert!(outcome.success, "{}", outcome.message);
    let decision = outcome.data.unwrap();
    assert!(decision.approved);
    assert!(decision.advanced_criteria.unwrap().passed);
}

#[test]
fn test_smart_approve_rejects_high_priority() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::High);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");

    // 普通自动审批不看优先级
    assert!(f.gate.evaluate(&id).data.unwrap().eligible());

    let outcome = f.gate.smart_approve(&id, "system");
    assert!(outcome.is_rejected());
    assert!(outcome.message.contains("加急"));
    assert!(!load(&f.repos, &id).is_approved());
}

#[test]
fn test_smart_approve_rejects_pending_human_review() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");
    f.repos
        .instance_repo
        .update_quality(
            &id,
            &QualityRecord {
                quality_score: Some(70.0),
                quality_checked_at: Some(ts(2, 8, 10)),
                requires_human_review: true,
                quality_result: None,
            },
        )
        .unwrap();

    let outcome = f.gate.smart_approve(&id, "system");
    assert!(outcome.is_rejected());
    assert!(outcome.message.contains("人工复核"));
}

#[test]
fn test_smart_approve_rejects_cancelled_history() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");
    let mut packing = load(&f.repos, "O1-packing");
    packing.status = StageStatus::Cancelled;
    save(&f.repos, &packing);

    let outcome = f.gate.smart_approve(&id, "system");
    assert!(outcome.is_rejected());
    assert!(outcome.message.contains("已取消"));
}

#[test]
fn test_smart_approve_checks_assignee_completion_rate() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_order(&f.repos, "O2", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    insert_instances(&f.repos, "O2");

    let id = ready_warehouse(&f.repos, "O1");
    let mut inst = load(&f.repos, &id);
    inst.assigned_to = Some("op1".into());
    save(&f.repos, &inst);

    // op1 在 O2 上: 1 完成, 2 跳过 → 33%
    for (stage, status) in [
        ("warehouse", StageStatus::Completed),
        ("sorting", StageStatus::Skipped),
        ("packing", StageStatus::Skipped),
    ] {
        let mut other = load(&f.repos, &format!("O2-{}", stage));
        other.status = status;
        other.assigned_to = Some("op1".into());
        other.started_at = Some(ts(1, 9, 0));
        save(&f.repos, &other);
    }

    let outcome = f.gate.smart_approve(&id, "system");
    assert!(outcome.is_rejected());
    assert!(outcome.message.contains("完成率"));

    // 自身进行中的实例不计入完成率
    let criteria = f
        .gate
        .advanced_criteria(&load(&f.repos, &id), &find_order(&f.repos, "O1"), ts(2, 8, 30))
        .unwrap();
    assert_eq!(criteria.reasons.len(), 1);
}

#[test]
fn test_new_assignee_passes_completion_rate() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");
    let mut inst = load(&f.repos, &id);
    inst.assigned_to = Some("newbie".into());
    save(&f.repos, &inst);

    let criteria = f
        .gate
        .advanced_criteria(&load(&f.repos, &id), &find_order(&f.repos, "O1"), ts(2, 8, 30))
        .unwrap();
    assert!(criteria.passed);
}

#[test]
fn test_oversized_completion_window_falls_back_to_default() {
    let f = fixture();
    insert_order(&f.repos, "O1", OrderPriority::Normal);
    insert_instances(&f.repos, "O1");
    let id = ready_warehouse(&f.repos, "O1");
    let mut inst = load(&f.repos, &id);
    inst.assigned_to = Some("op1".into());
    save(&f.repos, &inst);

    let thresholds = GateThresholds {
        completion_window_days: 100_000_000,
        ..Default::default()
    };
    let gate = ApprovalGate::new(
        f.repos.clone(),
        Arc::new(FixedClock::new(ts(2, 8, 30))),
        f.sink.clone(),
        thresholds,
    );

    let outcome = gate.smart_approve(&id, "system");
    assert!(outcome.success, "{}", outcome.message);
    assert!(load(&f.repos, &id).approval.transfer_approved);
}

fn find_order(repos: &WorkflowRepositories, order_id: &str) -> Order {
    repos.order_repo.find_by_id(order_id).unwrap().unwrap()
}
