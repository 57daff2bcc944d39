// ==========================================
// 纸卷加工阶段流程系统 - 审批闸门
// ==========================================
// 职责: 判定阶段实例能否免人工审批, 并在满足条件时执行审批
// 判定: 常规分类 (按阶段类型) + 智能校验 (重量/质量/时效/成本) 同时通过
// 红线: 审批写入 (审批标记 + 流转历史) 在单事务内完成, 失败整体回滚
// 红线: 只读取质检闸门写入的复核标记, 不修改质检字段
// ==========================================

use crate::config::GateThresholds;
use crate::domain::gate::{ApprovalDecision, CheckResult, SmartValidationReport};
use crate::domain::order::Order;
use crate::domain::outcome::OperationOutcome;
use crate::domain::stage::ProcessingInstance;
use crate::domain::transition::TransitionRecord;
use crate::domain::types::{StageKind, TransitionAction};
use crate::engine::audit::{AuditAction, AuditDispatcher, AuditEvent, AuditSink};
use crate::engine::clock::Clock;
use crate::engine::collaborators::MaterialAllocator;
use crate::engine::gate_core::{GateCore, EPSILON};
use crate::engine::repositories::{repository_failure, WorkflowRepositories};
use crate::repository::{ProcessingInstanceRepository, RepositoryResult, TransitionRepository};
use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::instrument;

#[cfg(test)]
mod tests;

/// 自动审批写入的审批备注
const AUTO_APPROVAL_NOTE: &str = "自动审批: 常规分类与智能校验均通过";

// ==========================================
// ApprovalGate - 审批闸门
// ==========================================
pub struct ApprovalGate {
    repos: WorkflowRepositories,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
    allocator: Option<Arc<dyn MaterialAllocator>>,
    thresholds: GateThresholds,
}

impl ApprovalGate {
    pub fn new(
        repos: WorkflowRepositories,
        clock: Arc<dyn Clock>,
        audit_sink: Arc<dyn AuditSink>,
        thresholds: GateThresholds,
    ) -> Self {
        Self {
            repos,
            clock,
            audit: AuditDispatcher::new(audit_sink),
            allocator: None,
            thresholds,
        }
    }

    /// 注入选料服务 (成本效率检查的材料成本兜底来源)
    pub fn with_allocator(mut self, allocator: Arc<dyn MaterialAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    // ==========================================
    // 判定 (只读)
    // ==========================================

    /// 智能校验
    pub fn smart_validation(
        &self,
        inst: &ProcessingInstance,
        order: &Order,
        now: NaiveDateTime,
    ) -> SmartValidationReport {
        let t = &self.thresholds;
        SmartValidationReport {
            weight_balance: GateCore::weight_balance(inst, t),
            quality_standards: GateCore::quality_standards(inst, order, t),
            timeline: GateCore::timeline(inst, order, now, t),
            cost_efficiency: self.cost_efficiency(inst, order, now),
        }
    }

    /// 审批判定 (常规 + 智能校验, 不含智能审批附加条件)
    pub fn decide(
        &self,
        inst: &ProcessingInstance,
        order: &Order,
        now: NaiveDateTime,
    ) -> ApprovalDecision {
        ApprovalDecision {
            instance_id: inst.instance_id.clone(),
            approved: false,
            routine: GateCore::routine_check(inst, order, &self.thresholds),
            smart_validation: self.smart_validation(inst, order, now),
            advanced_criteria: None,
        }
    }

    /// 成本效率 (含材料成本解析)
    fn cost_efficiency(
        &self,
        inst: &ProcessingInstance,
        order: &Order,
        now: NaiveDateTime,
    ) -> CheckResult {
        let final_price = order.pricing.final_price;
        if !final_price.map_or(false, |p| p > 0.0) {
            return CheckResult::pass();
        }

        match self.resolve_material_cost(inst, order) {
            Ok(material_cost) => {
                GateCore::cost_efficiency(inst, final_price, material_cost, now, &self.thresholds)
            }
            Err(reason) => {
                let mut reasons = vec![reason];
                reasons.extend(
                    GateCore::cost_efficiency(inst, final_price, None, now, &self.thresholds).reasons,
                );
                CheckResult::from_reasons(reasons)
            }
        }
    }

    /// 预估材料成本解析顺序: 报价快照 → 已选材料合计 → 选料服务
    ///
    /// # 返回
    /// - Ok(None): 无任何来源 (废料成本检查跳过)
    /// - Err(reason): 选料服务判定不通过或调用失败
    fn resolve_material_cost(
        &self,
        inst: &ProcessingInstance,
        order: &Order,
    ) -> Result<Option<f64>, String> {
        if let Some(cost) = order.pricing.estimated_material_cost {
            return Ok(Some(cost));
        }
        if let Some(cost) = order.selected_material_cost() {
            return Ok(Some(cost));
        }

        let allocator = match &self.allocator {
            Some(a) => a,
            None => return Ok(None),
        };
        let required_weight = order
            .spec
            .weight_kg
            .or(inst.warehouse.weight_received)
            .unwrap_or(0.0);

        match allocator.allocate(&order.spec, required_weight) {
            Ok(outcome) if outcome.passed => Ok(outcome.estimated_cost),
            Ok(outcome) => Err(format!(
                "选料分配未通过: {}",
                outcome.reason.unwrap_or_else(|| "无可用材料".to_string())
            )),
            Err(e) => Err(format!("选料服务调用失败: {}", e)),
        }
    }

    /// 智能审批附加条件
    ///
    /// # 规则
    /// 1. 负责人近 N 天完成率 ≥ 下限 (无负责人或无历史视为 100%)
    /// 2. 订单非加急
    /// 3. 订单历史中无已取消的阶段
    /// 4. 未被质检闸门标记为需人工复核
    pub fn advanced_criteria(
        &self,
        inst: &ProcessingInstance,
        order: &Order,
        now: NaiveDateTime,
    ) -> RepositoryResult<CheckResult> {
        let t = &self.thresholds;
        let mut reasons = Vec::new();

        if let Some(assignee) = inst.assigned_to.as_deref() {
            let (since, window_days) = match t.completion_window_start(now) {
                Some(since) => (since, t.completion_window_days),
                None => {
                    let fallback = GateThresholds::default();
                    tracing::warn!(
                        window_days = t.completion_window_days,
                        default = fallback.completion_window_days,
                        "完成率统计窗口非法, 使用默认窗口"
                    );
                    (
                        fallback.completion_window_start(now).unwrap_or(now),
                        fallback.completion_window_days,
                    )
                }
            };
            let (completed, total) = self
                .repos
                .instance_repo
                .completion_stats_for_assignee(assignee, since)?;
            let rate = if total == 0 {
                1.0
            } else {
                completed as f64 / total as f64
            };
            if rate < t.min_completion_rate - EPSILON {
                reasons.push(format!(
                    "负责人 {} 近{}天完成率 {:.0}% 低于 {:.0}%",
                    assignee,
                    window_days,
                    rate * 100.0,
                    t.min_completion_rate * 100.0
                ));
            }
        }

        if order.is_high_priority() {
            reasons.push("加急订单不适用智能审批".to_string());
        }

        if self.repos.instance_repo.has_cancelled_in_order(&order.order_id)? {
            reasons.push("订单存在已取消的阶段".to_string());
        }

        if inst.quality.requires_human_review {
            reasons.push("质检要求人工复核".to_string());
        }

        Ok(CheckResult::from_reasons(reasons))
    }

    // ==========================================
    // 对外操作
    // ==========================================

    /// 评估审批条件 (不写入)
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub fn evaluate(&self, instance_id: &str) -> OperationOutcome<ApprovalDecision> {
        let (inst, order) = match self.load(instance_id) {
            Ok(loaded) => loaded,
            Err(failure) => return failure,
        };
        let decision = self.decide(&inst, &order, self.clock.now());
        let message = if decision.eligible() {
            "满足自动审批条件".to_string()
        } else {
            format!("不满足自动审批条件: {}", decision.reasons().join("; "))
        };
        OperationOutcome::ok(message, decision)
    }

    /// 满足条件时自动审批
    #[instrument(skip(self), fields(instance_id = %instance_id, approver = %approver))]
    pub fn auto_approve_if_eligible(
        &self,
        instance_id: &str,
        approver: &str,
    ) -> OperationOutcome<ApprovalDecision> {
        let (inst, order) = match self.load(instance_id) {
            Ok(loaded) => loaded,
            Err(failure) => return failure,
        };
        if let Some(rejection) = Self::check_approvable(&inst) {
            return rejection;
        }

        let now = self.clock.now();
        let decision = self.decide(&inst, &order, now);
        if !decision.eligible() {
            return self.deny(&inst, approver, now, "不满足自动审批条件", decision);
        }

        self.grant(inst, decision, approver, now)
    }

    /// 智能审批: 附加条件全部满足后再执行标准审批
    #[instrument(skip(self), fields(instance_id = %instance_id, approver = %approver))]
    pub fn smart_approve(
        &self,
        instance_id: &str,
        approver: &str,
    ) -> OperationOutcome<ApprovalDecision> {
        let (inst, order) = match self.load(instance_id) {
            Ok(loaded) => loaded,
            Err(failure) => return failure,
        };
        if let Some(rejection) = Self::check_approvable(&inst) {
            return rejection;
        }

        let now = self.clock.now();
        let advanced = match self.advanced_criteria(&inst, &order, now) {
            Ok(result) => result,
            Err(e) => return repository_failure("智能审批", instance_id, e),
        };

        let mut decision = self.decide(&inst, &order, now);
        let advanced_passed = advanced.passed;
        decision.advanced_criteria = Some(advanced);

        if !advanced_passed {
            return self.deny(&inst, approver, now, "智能审批附加条件未通过", decision);
        }
        if !decision.eligible() {
            return self.deny(&inst, approver, now, "不满足自动审批条件", decision);
        }

        self.grant(inst, decision, approver, now)
    }

    // ==========================================
    // 内部实现
    // ==========================================

    fn load(
        &self,
        instance_id: &str,
    ) -> Result<(ProcessingInstance, Order), OperationOutcome<ApprovalDecision>> {
        let inst = match self.repos.instance_repo.find_by_id(instance_id) {
            Ok(Some(inst)) => inst,
            Ok(None) => {
                tracing::warn!(instance_id, "审批闸门: 阶段实例不存在");
                return Err(OperationOutcome::integrity_failure(format!(
                    "阶段实例不存在: {}",
                    instance_id
                )));
            }
            Err(e) => return Err(repository_failure("读取阶段实例", instance_id, e)),
        };

        let order = match self.repos.order_repo.find_by_id(&inst.order_id) {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::warn!(instance_id, order_id = %inst.order_id, "审批闸门: 订单不存在");
                return Err(OperationOutcome::integrity_failure(format!(
                    "订单不存在: {}",
                    inst.order_id
                )));
            }
            Err(e) => return Err(repository_failure("读取订单", &inst.order_id, e)),
        };

        Ok((inst, order))
    }

    /// 状态/重复审批检查, 不可审批时返回拒绝结果
    fn check_approvable(inst: &ProcessingInstance) -> Option<OperationOutcome<ApprovalDecision>> {
        if inst.status.is_terminal() {
            return Some(OperationOutcome::rejected(format!(
                "阶段 {} 状态为 {}, 不可审批",
                inst.stage_label, inst.status
            )));
        }
        if inst.is_approved() {
            return Some(OperationOutcome::rejected(format!(
                "阶段 {} 已审批, 不可重复审批",
                inst.stage_label
            )));
        }
        None
    }

    fn deny(
        &self,
        inst: &ProcessingInstance,
        approver: &str,
        now: NaiveDateTime,
        headline: &str,
        decision: ApprovalDecision,
    ) -> OperationOutcome<ApprovalDecision> {
        let reasons = decision.reasons().join("; ");
        tracing::debug!(
            instance_id = %inst.instance_id,
            order_id = %inst.order_id,
            stage_id = %inst.stage_id,
            reasons = %reasons,
            "审批闸门拒绝"
        );

        let event = AuditEvent::new(&inst.order_id, &inst.stage_id, AuditAction::ApprovalDenied, approver, now)
            .with_instance(&inst.instance_id)
            .with_note(Some(reasons.clone()));
        self.audit.emit(&event);

        OperationOutcome::rejected_with(format!("{}: {}", headline, reasons), decision)
    }

    /// 写入审批 (审批标记 + 流转历史, 单事务)
    fn grant(
        &self,
        mut inst: ProcessingInstance,
        mut decision: ApprovalDecision,
        approver: &str,
        now: NaiveDateTime,
    ) -> OperationOutcome<ApprovalDecision> {
        match &inst.stage_kind {
            StageKind::Warehouse => inst.approval.transfer_approved = true,
            StageKind::Sorting => inst.approval.sorting_approved = true,
            StageKind::Cutting => inst.approval.cutting_approved = true,
            StageKind::Other(name) => {
                return OperationOutcome::rejected(format!("阶段类型 {} 不支持自动审批", name));
            }
        }
        inst.approval.approved_by = Some(approver.to_string());
        inst.approval.approval_note = Some(AUTO_APPROVAL_NOTE.to_string());
        inst.approval.approved_at = Some(now);

        decision.approved = true;
        let record = TransitionRecord::new(
            &inst.order_id,
            &inst.instance_id,
            &inst.stage_id,
            TransitionAction::AutoApproved,
            approver,
            now,
        )
        .with_labels(Some(&inst.stage_label), Some(&inst.stage_label))
        .with_note(Some(AUTO_APPROVAL_NOTE))
        .with_payload(&decision);

        let result = self.repos.transaction(|tx| {
            ProcessingInstanceRepository::update_in_tx(tx, &inst)?;
            TransitionRepository::insert_in_tx(tx, &record)?;
            Ok(())
        });

        if let Err(e) = result {
            return repository_failure("自动审批", &inst.instance_id, e);
        }

        tracing::info!(
            instance_id = %inst.instance_id,
            order_id = %inst.order_id,
            stage_id = %inst.stage_id,
            approver,
            "自动审批通过"
        );
        self.audit.emit(&AuditEvent::from_transition(&record));

        OperationOutcome::ok(format!("阶段 {} 自动审批通过", inst.stage_label), decision)
    }
}
