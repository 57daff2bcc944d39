// ==========================================
// 纸卷加工阶段流程系统 - 闸门规则纯函数库
// ==========================================
// 职责: 重量平衡、废料比例、时效、成本、质检评分等判定规则
// 红线: 无状态、无副作用、无 I/O 操作
// 红线: 所有判定必须输出 reason
// 口径: 浮点比较统一使用 EPSILON 容差, 边界值 (恰好等于阈值) 按规则方向判定
// ==========================================

use crate::config::GateThresholds;
use crate::domain::gate::{CheckResult, VisualAnalysis};
use crate::domain::order::Order;
use crate::domain::stage::ProcessingInstance;
use crate::domain::types::{OrderPriority, StageKind};
use crate::engine::spec_validator::validate_delivery_spec;
use chrono::NaiveDateTime;

/// 浮点比较容差
pub const EPSILON: f64 = 1e-9;

// ==========================================
// GateCore - 纯函数工具类
// ==========================================
pub struct GateCore;

impl GateCore {
    // ==========================================
    // 重量平衡
    // ==========================================

    /// 仓库重量平衡
    ///
    /// # 规则
    /// - |weight_balance| ≤ 容差 × weight_received
    /// - weight_transferred ≤ weight_received
    pub fn warehouse_balance(inst: &ProcessingInstance, t: &GateThresholds) -> CheckResult {
        let w = &inst.warehouse;
        let received = match w.weight_received {
            Some(r) if r > 0.0 => r,
            _ => return CheckResult::from_reasons(vec!["未录入有效的入库重量".to_string()]),
        };

        let mut reasons = Vec::new();
        match w.weight_balance {
            None => reasons.push("未录入重量差额".to_string()),
            Some(balance) => {
                let limit = t.balance_tolerance_ratio * received;
                if balance.abs() > limit + EPSILON {
                    reasons.push(format!(
                        "重量差额超出容差: |{:.3}| > {:.3}",
                        balance, limit
                    ));
                }
            }
        }
        match w.weight_transferred {
            None => reasons.push("未录入移交重量".to_string()),
            Some(transferred) if transferred > received + EPSILON => reasons.push(format!(
                "移交重量大于入库重量: {:.3} > {:.3}",
                transferred, received
            )),
            Some(_) => {}
        }
        CheckResult::from_reasons(reasons)
    }

    /// 分拣重量平衡
    ///
    /// # 规则
    /// |weight_received − (roll1 + roll2 + waste)| ≤ 容差 × weight_received
    pub fn sorting_balance(inst: &ProcessingInstance, t: &GateThresholds) -> CheckResult {
        let received = match inst.warehouse.weight_received {
            Some(r) if r > 0.0 => r,
            _ => return CheckResult::from_reasons(vec!["未录入有效的分拣入料重量".to_string()]),
        };
        let sorting = match &inst.sorting {
            Some(s) => s,
            None => return CheckResult::from_reasons(vec!["未录入分拣结果".to_string()]),
        };

        let diff = (received - sorting.accounted_weight()).abs();
        let limit = t.balance_tolerance_ratio * received;
        if diff > limit + EPSILON {
            CheckResult::from_reasons(vec![format!(
                "分拣重量不平衡: 差异 {:.3} > {:.3}",
                diff, limit
            )])
        } else {
            CheckResult::pass()
        }
    }

    /// 按阶段类型的重量平衡检查 (裁切及其他阶段不适用, 直接通过)
    pub fn weight_balance(inst: &ProcessingInstance, t: &GateThresholds) -> CheckResult {
        match &inst.stage_kind {
            StageKind::Warehouse => Self::warehouse_balance(inst, t),
            StageKind::Sorting => Self::sorting_balance(inst, t),
            StageKind::Cutting | StageKind::Other(_) => CheckResult::pass(),
        }
    }

    // ==========================================
    // 常规审批分类
    // ==========================================

    /// 常规操作判定
    pub fn routine_check(inst: &ProcessingInstance, order: &Order, t: &GateThresholds) -> CheckResult {
        let mut reasons = Vec::new();

        match &inst.stage_kind {
            StageKind::Warehouse => {
                let w = &inst.warehouse;
                match w.weight_received {
                    Some(r) if r > 0.0 && r <= t.warehouse_max_weight + EPSILON => {}
                    Some(r) => reasons.push(format!(
                        "入库重量超出常规范围 (0, {}]: {}",
                        t.warehouse_max_weight, r
                    )),
                    None => reasons.push("未录入入库重量".to_string()),
                }
                if w
                    .transfer_destination
                    .as_deref()
                    .map_or(true, |d| d.trim().is_empty())
                {
                    reasons.push("未设置移交去向".to_string());
                }
                match w.weight_balance {
                    Some(b) if b >= t.warehouse_min_balance - EPSILON => {}
                    Some(b) => reasons.push(format!(
                        "重量差额低于下限 {}: {}",
                        t.warehouse_min_balance, b
                    )),
                    None => reasons.push("未录入重量差额".to_string()),
                }
            }
            StageKind::Sorting => {
                let received = inst.warehouse.weight_received.filter(|r| *r > 0.0);
                if received.is_none() {
                    reasons.push("未录入有效的分拣入料重量".to_string());
                }
                reasons.extend(Self::sorting_balance(inst, t).reasons);
                match (&inst.sorting, received) {
                    (Some(sorting), Some(received)) => {
                        if !sorting.has_output_roll() {
                            reasons.push("分拣无有效产出卷".to_string());
                        }
                        let limit = t.routine_waste_ratio * received;
                        if sorting.waste_weight > limit + EPSILON {
                            reasons.push(format!(
                                "废料比例超出常规阈值 {:.1}%: {:.2}%",
                                t.routine_waste_ratio * 100.0,
                                sorting.waste_weight / received * 100.0
                            ));
                        }
                    }
                    (Some(sorting), None) => {
                        if !sorting.has_output_roll() {
                            reasons.push("分拣无有效产出卷".to_string());
                        }
                    }
                    // 未录入分拣结果已由平衡检查给出原因
                    (None, _) => {}
                }
            }
            StageKind::Cutting => {
                if inst.cutting_results.is_empty() {
                    reasons.push("未录入裁切结果".to_string());
                }
                reasons.extend(validate_delivery_spec(&order.spec));
            }
            StageKind::Other(name) => {
                reasons.push(format!("阶段类型 {} 不支持自动审批", name));
            }
        }

        CheckResult::from_reasons(reasons)
    }

    // ==========================================
    // 智能校验
    // ==========================================

    /// 质量标准
    ///
    /// # 规则
    /// - 交付规格校验无错误
    /// - 分拣: 必须有分拣结果, 废料严格低于质量阈值 (恰好等于阈值不通过)
    /// - 裁切: 必须有裁切结果
    pub fn quality_standards(inst: &ProcessingInstance, order: &Order, t: &GateThresholds) -> CheckResult {
        let mut reasons = validate_delivery_spec(&order.spec);

        match &inst.stage_kind {
            StageKind::Sorting => match &inst.sorting {
                None => reasons.push("未录入分拣结果".to_string()),
                Some(sorting) => match inst.warehouse.weight_received.filter(|r| *r > 0.0) {
                    None => reasons.push("未录入有效的分拣入料重量".to_string()),
                    Some(received) => {
                        let limit = t.quality_waste_ratio * received;
                        if sorting.waste_weight >= limit - EPSILON {
                            reasons.push(format!(
                                "废料比例达到质量阈值 {:.1}%: {:.2}%",
                                t.quality_waste_ratio * 100.0,
                                sorting.waste_weight / received * 100.0
                            ));
                        }
                    }
                },
            },
            StageKind::Cutting => {
                if inst.cutting_results.is_empty() {
                    reasons.push("未录入裁切结果".to_string());
                }
            }
            StageKind::Warehouse | StageKind::Other(_) => {}
        }

        CheckResult::from_reasons(reasons)
    }

    /// 时效合规
    ///
    /// # 规则
    /// - 有预计时长且已开始: 已用时长 > 预计 × 超时比例 → 不通过
    /// - 有交付期限: 剩余小时 < 阶段预计小时 + 缓冲小时 → 不通过
    pub fn timeline(
        inst: &ProcessingInstance,
        order: &Order,
        now: NaiveDateTime,
        t: &GateThresholds,
    ) -> CheckResult {
        let mut reasons = Vec::new();
        let estimated_minutes = inst.estimated_duration_minutes.filter(|m| *m > 0);

        if let (Some(estimated), Some(elapsed)) = (estimated_minutes, inst.elapsed_minutes(now)) {
            let allowed = estimated as f64 * t.timeline_overrun_ratio;
            if elapsed > allowed + EPSILON {
                reasons.push(format!(
                    "阶段耗时超出预计: 已用 {:.0} 分钟 > 允许 {:.0} 分钟",
                    elapsed, allowed
                ));
            }
        }

        if let Some(deadline) = order.delivery_deadline {
            let remaining_hours = (deadline - now).num_seconds() as f64 / 3600.0;
            let stage_hours = estimated_minutes.map_or(0.0, |m| m as f64 / 60.0);
            let required = stage_hours + t.deadline_buffer_hours;
            if remaining_hours < required - EPSILON {
                reasons.push(format!(
                    "距交付期限不足: 剩余 {:.1} 小时 < 需要 {:.1} 小时",
                    remaining_hours, required
                ));
            }
        }

        CheckResult::from_reasons(reasons)
    }

    /// 人工工时 (小时): 优先预计时长, 否则按已用时长
    pub fn labor_hours(inst: &ProcessingInstance, now: NaiveDateTime) -> f64 {
        match inst.estimated_duration_minutes.filter(|m| *m > 0) {
            Some(minutes) => minutes as f64 / 60.0,
            None => inst
                .elapsed_minutes(now)
                .map_or(0.0, |m| m.max(0.0) / 60.0),
        }
    }

    /// 成本效率
    ///
    /// # 规则
    /// - 无最终报价 → 跳过 (通过)
    /// - 废料成本 (废料比例 × 预估材料成本) > 报价 × 废料成本比例 → 不通过
    /// - 人工成本 (工时 × 小时费率) > 报价 × 人工成本比例 → 不通过
    ///
    /// # 参数
    /// - material_cost: 已解析的预估材料成本 (由调用方按报价快照/选料/分配服务依次解析)
    pub fn cost_efficiency(
        inst: &ProcessingInstance,
        final_price: Option<f64>,
        material_cost: Option<f64>,
        now: NaiveDateTime,
        t: &GateThresholds,
    ) -> CheckResult {
        let price = match final_price {
            Some(p) if p > 0.0 => p,
            _ => return CheckResult::pass(),
        };

        let mut reasons = Vec::new();

        if let (Some(ratio), Some(cost)) = (inst.waste_ratio(), material_cost) {
            let waste_cost = ratio * cost;
            let limit = t.waste_cost_ratio * price;
            if waste_cost > limit + EPSILON {
                reasons.push(format!(
                    "废料成本过高: {:.2} > 报价的 {:.0}% ({:.2})",
                    waste_cost,
                    t.waste_cost_ratio * 100.0,
                    limit
                ));
            }
        }

        let labor_cost = Self::labor_hours(inst, now) * t.labor_hourly_rate;
        let limit = t.labor_cost_ratio * price;
        if labor_cost > limit + EPSILON {
            reasons.push(format!(
                "人工成本过高: {:.2} > 报价的 {:.0}% ({:.2})",
                labor_cost,
                t.labor_cost_ratio * 100.0,
                limit
            ));
        }

        CheckResult::from_reasons(reasons)
    }

    // ==========================================
    // 质检规则
    // ==========================================

    /// 尺寸检查 (规格或实测缺失的维度跳过)
    pub fn dimensions(inst: &ProcessingInstance, order: &Order, t: &GateThresholds) -> CheckResult {
        let spec = &order.spec;
        let measured = &inst.measured;
        let mut reasons = Vec::new();

        let checks = [
            ("长度", measured.length_m, spec.length_m, t.length_tolerance_ratio),
            ("宽度", measured.width_mm, spec.width_mm, t.width_tolerance_ratio),
            ("厚度", measured.thickness_mm, spec.thickness_mm, t.thickness_tolerance_ratio),
        ];
        for (name, actual, expected, tolerance) in checks {
            if let (Some(actual), Some(expected)) = (actual, expected) {
                let limit = tolerance * expected.abs();
                if (actual - expected).abs() > limit + EPSILON {
                    reasons.push(format!(
                        "{}偏差超出 {:.0}%: 实测 {} / 规格 {}",
                        name,
                        tolerance * 100.0,
                        actual,
                        expected
                    ));
                }
            }
        }

        CheckResult::from_reasons(reasons)
    }

    /// 裁切精度: 长度偏差在容差内的卷数 / 总卷数 (无结果为 0)
    pub fn cutting_precision(inst: &ProcessingInstance, t: &GateThresholds) -> f64 {
        let total = inst.cutting_results.len();
        if total == 0 {
            return 0.0;
        }
        let within = inst
            .cutting_results
            .iter()
            .filter(|r| {
                (r.actual_length - r.target_length).abs()
                    <= t.cutting_tolerance_ratio * r.target_length.abs() + EPSILON
            })
            .count();
        within as f64 / total as f64
    }

    /// 外观分析 (启发式)
    pub fn visual_analysis(inst: &ProcessingInstance, t: &GateThresholds) -> VisualAnalysis {
        let mut issues = Vec::new();

        match &inst.stage_kind {
            StageKind::Sorting => match (&inst.sorting, inst.waste_ratio()) {
                (None, _) => issues.push("未录入分拣结果".to_string()),
                (Some(_), Some(ratio)) if ratio > t.quality_waste_ratio + EPSILON => {
                    issues.push(format!(
                        "废料比例过高: {:.2}% > {:.0}%",
                        ratio * 100.0,
                        t.quality_waste_ratio * 100.0
                    ));
                }
                _ => {}
            },
            StageKind::Cutting => {
                if inst.cutting_results.is_empty() {
                    issues.push("未录入裁切结果".to_string());
                } else {
                    let precision = Self::cutting_precision(inst, t);
                    if precision < t.visual_cutting_precision - EPSILON {
                        issues.push(format!(
                            "裁切精度偏低: {:.2} < {:.2}",
                            precision, t.visual_cutting_precision
                        ));
                    }
                }
            }
            StageKind::Warehouse | StageKind::Other(_) => {}
        }

        let defect_rate = (issues.len() as f64 / 10.0).min(1.0);
        VisualAnalysis {
            issues,
            defect_rate,
        }
    }

    /// 规格符合性: 交付规格错误 + 材料类型不符 + 质量等级不足
    pub fn specifications(inst: &ProcessingInstance, order: &Order) -> CheckResult {
        let mut reasons = validate_delivery_spec(&order.spec);

        if let (Some(expected), Some(actual)) = (&order.spec.material_type, &inst.measured.material_type) {
            if !expected.trim().eq_ignore_ascii_case(actual.trim()) {
                reasons.push(format!("材料类型不符: 实测 {} / 规格 {}", actual, expected));
            }
        }

        if let (Some(required), Some(actual)) =
            (order.spec.required_quality_grade, inst.measured.quality_grade)
        {
            if actual < required {
                reasons.push(format!("质量等级不足: 实测 {} < 要求 {}", actual, required));
            }
        }

        CheckResult::from_reasons(reasons)
    }

    /// 质量评分
    ///
    /// score = 30×尺寸 + 20×重量 + 25×外观(通过=1, 否则 1−缺陷率) + 25×规格, 截断到 [0,100]
    pub fn quality_score(
        dimensions_passed: bool,
        weight_passed: bool,
        visual: &VisualAnalysis,
        specs_passed: bool,
    ) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let visual_factor = if visual.passed() {
            1.0
        } else {
            1.0 - visual.defect_rate
        };
        let score = 30.0 * flag(dimensions_passed)
            + 20.0 * flag(weight_passed)
            + 25.0 * visual_factor
            + 25.0 * flag(specs_passed);
        score.clamp(0.0, 100.0)
    }

    /// 评分 → 质量等级
    pub fn quality_grade(score: f64) -> i32 {
        if score >= 90.0 {
            5
        } else if score >= 80.0 {
            4
        } else if score >= 70.0 {
            3
        } else if score >= 60.0 {
            2
        } else {
            1
        }
    }

    /// 人工复核原因 (空列表表示无需复核)
    pub fn review_reasons(
        score: f64,
        priority: OrderPriority,
        visual: &VisualAnalysis,
        kind: &StageKind,
        cutting_precision: f64,
        t: &GateThresholds,
    ) -> Vec<String> {
        let mut reasons = Vec::new();
        if score < t.review_score {
            reasons.push(format!("质量评分 {:.1} 低于 {:.0}", score, t.review_score));
        }
        if priority == OrderPriority::High {
            reasons.push("加急订单需人工复核".to_string());
        }
        if visual.issues.len() > t.visual_issue_limit {
            reasons.push(format!("外观问题 {} 项, 超过 {} 项", visual.issues.len(), t.visual_issue_limit));
        }
        if *kind == StageKind::Cutting && cutting_precision < t.review_cutting_precision {
            reasons.push(format!(
                "裁切精度 {:.2} 低于 {:.2}",
                cutting_precision, t.review_cutting_precision
            ));
        }
        reasons
    }
}

#[cfg(test)]
mod tests;
