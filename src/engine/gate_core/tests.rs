use super::*;
use crate::domain::order::DeliverySpec;
use crate::domain::stage::{CuttingResult, SortingResults, StageDefinition};
use chrono::{Duration, NaiveDate};

fn ts(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 1)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn order() -> Order {
    let mut order = Order::new("O1".into(), "NO-001".into(), OrderPriority::Normal, ts(7, 0));
    order.spec = DeliverySpec {
        width_mm: Some(1200.0),
        length_m: Some(3000.0),
        thickness_mm: Some(0.2),
        material_type: Some("kraft".into()),
        required_quality_grade: Some(3),
        ..Default::default()
    };
    order
}

fn instance(stage_id: &str) -> ProcessingInstance {
    let def = StageDefinition::new(stage_id, stage_id, 1, Some(60), false);
    let mut inst = ProcessingInstance::pending("I1".into(), "O1", &def, ts(7, 0));
    inst.started_at = Some(ts(8, 0));
    inst
}

fn warehouse(received: f64, transferred: f64) -> ProcessingInstance {
    let mut inst = instance("warehouse");
    inst.warehouse.weight_received = Some(received);
    inst.warehouse.weight_transferred = Some(transferred);
    inst.warehouse.weight_balance = Some(transferred - received);
    inst.warehouse.transfer_destination = Some("分拣线A".into());
    inst
}

fn sorting(received: f64, roll1: f64, roll2: f64, waste: f64) -> ProcessingInstance {
    let mut inst = instance("sorting");
    inst.warehouse.weight_received = Some(received);
    inst.sorting = Some(SortingResults {
        roll1_weight: roll1,
        roll2_weight: roll2,
        waste_weight: waste,
        recorded_at: ts(8, 30),
    });
    inst
}

fn cutting(results: &[(f64, f64)]) -> ProcessingInstance {
    let mut inst = instance("cutting");
    inst.cutting_results = results
        .iter()
        .enumerate()
        .map(|(i, (target, actual))| CuttingResult {
            roll_label: format!("R{}", i + 1),
            target_length: *target,
            actual_length: *actual,
        })
        .collect();
    inst
}

// ==========================================
// 重量平衡
// ==========================================

#[test]
fn test_warehouse_balance_boundary() {
    let t = GateThresholds::default();
    // 差额恰好 0.1%
    assert!(GateCore::warehouse_balance(&warehouse(1000.0, 999.0), &t).passed);
    // 差额 0.1001%
    assert!(!GateCore::warehouse_balance(&warehouse(1000.0, 998.999), &t).passed);
    assert!(GateCore::warehouse_balance(&warehouse(5000.0, 4995.0), &t).passed);
}

#[test]
fn test_warehouse_balance_rejects_over_transfer() {
    let t = GateThresholds::default();
    let result = GateCore::warehouse_balance(&warehouse(1000.0, 1000.5), &t);
    assert!(!result.passed);
    assert!(result.reasons.iter().any(|r| r.contains("移交重量大于入库重量")));
}

#[test]
fn test_warehouse_balance_requires_measurements() {
    let t = GateThresholds::default();
    let inst = instance("warehouse");
    assert!(!GateCore::warehouse_balance(&inst, &t).passed);
}

#[test]
fn test_sorting_balance() {
    let t = GateThresholds::default();
    assert!(GateCore::sorting_balance(&sorting(1000.0, 500.0, 400.0, 100.0), &t).passed);
    assert!(GateCore::sorting_balance(&sorting(1000.0, 500.0, 399.0, 100.0), &t).passed);
    assert!(!GateCore::sorting_balance(&sorting(1000.0, 500.0, 398.0, 100.0), &t).passed);
}

#[test]
fn test_weight_balance_dispatch_by_kind() {
    let t = GateThresholds::default();
    assert!(GateCore::weight_balance(&cutting(&[]), &t).passed);
    assert!(GateCore::weight_balance(&instance("packing"), &t).passed);
    assert!(!GateCore::weight_balance(&instance("warehouse"), &t).passed);
}

// ==========================================
// 常规审批分类
// ==========================================

#[test]
fn test_routine_warehouse() {
    let t = GateThresholds::default();
    let o = order();
    assert!(GateCore::routine_check(&warehouse(1000.0, 999.0), &o, &t).passed);
    assert!(GateCore::routine_check(&warehouse(5000.0, 5000.0), &o, &t).passed);
    assert!(!GateCore::routine_check(&warehouse(5000.5, 5000.5), &o, &t).passed);

    let mut low_balance = warehouse(1000.0, 989.0);
    assert!(!GateCore::routine_check(&low_balance, &o, &t).passed);
    low_balance.warehouse.weight_balance = Some(-10.0);
    assert!(GateCore::routine_check(&low_balance, &o, &t).passed);

    let mut no_destination = warehouse(1000.0, 999.0);
    no_destination.warehouse.transfer_destination = Some("  ".into());
    let result = GateCore::routine_check(&no_destination, &o, &t);
    assert_eq!(result.reasons, vec!["未设置移交去向".to_string()]);
}

#[test]
fn test_routine_sorting_waste_boundary() {
    let t = GateThresholds::default();
    let o = order();
    // 废料恰好 10%
    assert!(GateCore::routine_check(&sorting(1000.0, 500.0, 400.0, 100.0), &o, &t).passed);
    // 废料 10.01%
    let result = GateCore::routine_check(&sorting(1000.0, 500.0, 399.9, 100.1), &o, &t);
    assert!(!result.passed);
    assert!(result.reasons.iter().any(|r| r.contains("废料比例超出常规阈值")));
}

#[test]
fn test_routine_sorting_requires_output_roll() {
    let t = GateThresholds::default();
    let result = GateCore::routine_check(&sorting(100.0, 0.0, 0.0, 100.0), &order(), &t);
    assert!(result.reasons.iter().any(|r| r.contains("无有效产出卷")));
}

#[test]
fn test_routine_cutting_and_other() {
    let t = GateThresholds::default();
    let o = order();
    assert!(GateCore::routine_check(&cutting(&[(100.0, 100.0)]), &o, &t).passed);
    assert!(!GateCore::routine_check(&cutting(&[]), &o, &t).passed);

    let mut bad_spec = order();
    bad_spec.spec.width_mm = None;
    assert!(!GateCore::routine_check(&cutting(&[(100.0, 100.0)]), &bad_spec, &t).passed);

    let other = GateCore::routine_check(&instance("packing"), &o, &t);
    assert!(!other.passed);
    assert!(other.reasons[0].contains("packing"));
}

// ==========================================
// 智能校验
// ==========================================

#[test]
fn test_quality_standards_sorting_waste_boundary() {
    let t = GateThresholds::default();
    let o = order();
    assert!(GateCore::quality_standards(&sorting(1000.0, 500.0, 351.0, 149.0), &o, &t).passed);
    // 废料恰好 15% 不通过
    let result = GateCore::quality_standards(&sorting(1000.0, 500.0, 350.0, 150.0), &o, &t);
    assert!(!result.passed);
    assert!(result.reasons[0].contains("废料比例达到质量阈值"));
}

#[test]
fn test_quality_standards_requires_stage_results() {
    let t = GateThresholds::default();
    let o = order();
    assert!(!GateCore::quality_standards(&instance("sorting"), &o, &t).passed);
    assert!(!GateCore::quality_standards(&cutting(&[]), &o, &t).passed);
    assert!(GateCore::quality_standards(&warehouse(1000.0, 999.0), &o, &t).passed);
}

#[test]
fn test_timeline_overrun() {
    let t = GateThresholds::default();
    let o = order();
    let inst = warehouse(1000.0, 999.0); // 预计 60 分钟, 08:00 开始
    assert!(GateCore::timeline(&inst, &o, ts(9, 12), &t).passed);
    assert!(!GateCore::timeline(&inst, &o, ts(9, 13), &t).passed);
}

#[test]
fn test_timeline_deadline_buffer() {
    let t = GateThresholds::default();
    let mut o = order();
    let inst = warehouse(1000.0, 999.0);
    let now = ts(8, 30);
    // 需要 1h (阶段) + 2h (缓冲)
    o.delivery_deadline = Some(now + Duration::hours(3));
    assert!(GateCore::timeline(&inst, &o, now, &t).passed);
    o.delivery_deadline = Some(now + Duration::minutes(179));
    let result = GateCore::timeline(&inst, &o, now, &t);
    assert!(!result.passed);
    assert!(result.reasons[0].contains("距交付期限不足"));
}

#[test]
fn test_cost_efficiency() {
    let t = GateThresholds::default();
    let now = ts(8, 30);
    let inst = sorting(1000.0, 500.0, 400.0, 100.0); // 废料 10%, 预计 1h → 人工 50

    // 无报价跳过
    assert!(GateCore::cost_efficiency(&inst, None, Some(1_000_000.0), now, &t).passed);

    // 废料成本 0.1 × 10000 = 1000 ≤ 5% × 20000
    assert!(GateCore::cost_efficiency(&inst, Some(20_000.0), Some(10_000.0), now, &t).passed);
    let waste = GateCore::cost_efficiency(&inst, Some(19_000.0), Some(10_000.0), now, &t);
    assert!(!waste.passed);
    assert!(waste.reasons[0].contains("废料成本过高"));

    // 人工成本 50 > 30% × 100
    let labor = GateCore::cost_efficiency(&inst, Some(100.0), None, now, &t);
    assert!(!labor.passed);
    assert!(labor.reasons[0].contains("人工成本过高"));
}

#[test]
fn test_labor_hours_fallback_to_elapsed() {
    let mut inst = warehouse(1000.0, 999.0);
    assert_eq!(GateCore::labor_hours(&inst, ts(9, 0)), 1.0);
    inst.estimated_duration_minutes = None;
    assert_eq!(GateCore::labor_hours(&inst, ts(10, 30)), 2.5);
    inst.started_at = None;
    assert_eq!(GateCore::labor_hours(&inst, ts(10, 30)), 0.0);
}

// ==========================================
// 质检规则
// ==========================================

#[test]
fn test_dimensions_tolerances() {
    let t = GateThresholds::default();
    let o = order();
    let mut inst = cutting(&[(100.0, 100.0)]);
    assert!(GateCore::dimensions(&inst, &o, &t).passed);

    inst.measured.width_mm = Some(1224.0); // 2%
    inst.measured.thickness_mm = Some(0.21); // 5%
    assert!(GateCore::dimensions(&inst, &o, &t).passed);

    inst.measured.length_m = Some(3061.0); // > 2%
    let result = GateCore::dimensions(&inst, &o, &t);
    assert_eq!(result.reasons.len(), 1);
    assert!(result.reasons[0].contains("长度"));
}

#[test]
fn test_cutting_precision() {
    let t = GateThresholds::default();
    assert_eq!(GateCore::cutting_precision(&cutting(&[]), &t), 0.0);

    let mut rolls = vec![(100.0, 101.0); 9];
    rolls.push((100.0, 110.0));
    assert_eq!(GateCore::cutting_precision(&cutting(&rolls), &t), 0.9);

    let mut rolls = vec![(100.0, 102.0); 89];
    rolls.extend(vec![(100.0, 97.9); 11]);
    let precision = GateCore::cutting_precision(&cutting(&rolls), &t);
    assert!((precision - 0.89).abs() < 1e-12);
}

#[test]
fn test_visual_analysis() {
    let t = GateThresholds::default();
    let ok = GateCore::visual_analysis(&sorting(1000.0, 500.0, 350.0, 150.0), &t);
    assert!(ok.passed());

    let heavy = GateCore::visual_analysis(&sorting(1000.0, 500.0, 349.0, 151.0), &t);
    assert_eq!(heavy.issues.len(), 1);
    assert!((heavy.defect_rate - 0.1).abs() < 1e-12);

    assert_eq!(GateCore::visual_analysis(&instance("sorting"), &t).issues.len(), 1);
    assert_eq!(GateCore::visual_analysis(&cutting(&[]), &t).issues.len(), 1);

    let imprecise = cutting(&[(100.0, 100.0), (100.0, 90.0)]);
    let visual = GateCore::visual_analysis(&imprecise, &t);
    assert!(visual.issues[0].contains("裁切精度偏低"));
    assert!(GateCore::visual_analysis(&warehouse(1.0, 1.0), &t).passed());
}

#[test]
fn test_specifications() {
    let o = order();
    let mut inst = cutting(&[(100.0, 100.0)]);
    assert!(GateCore::specifications(&inst, &o).passed);

    inst.measured.material_type = Some(" KRAFT ".into());
    inst.measured.quality_grade = Some(3);
    assert!(GateCore::specifications(&inst, &o).passed);

    inst.measured.material_type = Some("coated".into());
    inst.measured.quality_grade = Some(2);
    assert_eq!(GateCore::specifications(&inst, &o).reasons.len(), 2);
}

#[test]
fn test_quality_score_and_grade() {
    let pass = VisualAnalysis {
        issues: vec![],
        defect_rate: 0.0,
    };
    let score = GateCore::quality_score(true, true, &pass, false);
    assert_eq!(score, 75.0);
    assert_eq!(GateCore::quality_grade(score), 3);

    let failing = VisualAnalysis {
        issues: vec!["a".into(), "b".into()],
        defect_rate: 0.2,
    };
    assert!((GateCore::quality_score(true, true, &failing, true) - 95.0).abs() < 1e-9);
    assert_eq!(GateCore::quality_score(true, true, &pass, true), 100.0);
    assert_eq!(GateCore::quality_score(false, false, &pass, false), 25.0);

    assert_eq!(GateCore::quality_grade(90.0), 5);
    assert_eq!(GateCore::quality_grade(89.9), 4);
    assert_eq!(GateCore::quality_grade(80.0), 4);
    assert_eq!(GateCore::quality_grade(60.0), 2);
    assert_eq!(GateCore::quality_grade(59.9), 1);
}

#[test]
fn test_review_reasons() {
    let t = GateThresholds::default();
    let pass = VisualAnalysis {
        issues: vec![],
        defect_rate: 0.0,
    };

    // 75 分需复核
    let reasons = GateCore::review_reasons(75.0, OrderPriority::Normal, &pass, &StageKind::Warehouse, 0.0, &t);
    assert_eq!(reasons.len(), 1);

    assert!(GateCore::review_reasons(100.0, OrderPriority::Normal, &pass, &StageKind::Cutting, 0.9, &t).is_empty());
    assert_eq!(
        GateCore::review_reasons(100.0, OrderPriority::Normal, &pass, &StageKind::Cutting, 0.89, &t).len(),
        1
    );
    assert_eq!(
        GateCore::review_reasons(100.0, OrderPriority::High, &pass, &StageKind::Sorting, 0.0, &t).len(),
        1
    );

    let many = VisualAnalysis {
        issues: vec!["a".into(), "b".into(), "c".into()],
        defect_rate: 0.3,
    };
    assert_eq!(
        GateCore::review_reasons(100.0, OrderPriority::Normal, &many, &StageKind::Sorting, 0.0, &t).len(),
        1
    );
}
