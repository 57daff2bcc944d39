// ==========================================
// 纸卷加工阶段流程系统 - 质检闸门
// ==========================================
// 职责: 对阶段实例评分, 判定是否必须人工复核
// 巡检: 对进行中且未质检的实例批量评分并写入质检记录
// 红线: 只写质检字段, 不修改审批标记与状态
// 红线: 单个实例失败不影响其余实例
// ==========================================

use crate::config::GateThresholds;
use crate::domain::gate::{QualityChecks, QualityReport, QualitySweepItem, QualitySweepSummary};
use crate::domain::order::Order;
use crate::domain::outcome::OperationOutcome;
use crate::domain::stage::{ProcessingInstance, QualityRecord};
use crate::domain::types::StageKind;
use crate::engine::audit::{AuditAction, AuditDispatcher, AuditEvent, AuditSink};
use crate::engine::clock::Clock;
use crate::engine::gate_core::GateCore;
use crate::engine::repositories::{repository_failure, WorkflowRepositories};
use std::sync::Arc;
use tracing::instrument;

/// 质检巡检的审计操作人
const QUALITY_ACTOR: &str = "quality_gate";

// ==========================================
// QualityGate - 质检闸门
// ==========================================
pub struct QualityGate {
    repos: WorkflowRepositories,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
    thresholds: GateThresholds,
}

impl QualityGate {
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
            thresholds,
        }
    }

    /// 质检评分 (纯计算)
    pub fn evaluate(&self, inst: &ProcessingInstance, order: &Order) -> QualityReport {
        let t = &self.thresholds;

        let checks = QualityChecks {
            dimensions: GateCore::dimensions(inst, order, t),
            weight_balance: GateCore::weight_balance(inst, t),
            visual: GateCore::visual_analysis(inst, t),
            specifications: GateCore::specifications(inst, order),
        };
        let score = GateCore::quality_score(
            checks.dimensions.passed,
            checks.weight_balance.passed,
            &checks.visual,
            checks.specifications.passed,
        );

        let precision = GateCore::cutting_precision(inst, t);
        let review_reasons =
            GateCore::review_reasons(score, order.priority, &checks.visual, &inst.stage_kind, precision, t);

        QualityReport {
            instance_id: inst.instance_id.clone(),
            score,
            quality_grade: GateCore::quality_grade(score),
            passed: score >= t.review_score,
            requires_human_review: !review_reasons.is_empty(),
            review_reasons,
            cutting_precision: (inst.stage_kind == StageKind::Cutting).then_some(precision),
            checks,
        }
    }

    /// 单个实例质检 (不写入)
    #[instrument(skip(self), fields(instance_id = %instance_id))]
    pub fn check(&self, instance_id: &str) -> OperationOutcome<QualityReport> {
        let inst = match self.repos.instance_repo.find_by_id(instance_id) {
            Ok(Some(inst)) => inst,
            Ok(None) => {
                tracing::warn!(instance_id, "质检闸门: 阶段实例不存在");
                return OperationOutcome::integrity_failure(format!("阶段实例不存在: {}", instance_id));
            }
            Err(e) => return repository_failure("读取阶段实例", instance_id, e),
        };
        let order = match self.repos.order_repo.find_by_id(&inst.order_id) {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::warn!(instance_id, order_id = %inst.order_id, "质检闸门: 订单不存在");
                return OperationOutcome::integrity_failure(format!("订单不存在: {}", inst.order_id));
            }
            Err(e) => return repository_failure("读取订单", &inst.order_id, e),
        };

        let report = self.evaluate(&inst, &order);
        let message = format!(
            "质量评分 {:.1} (等级 {}){}",
            report.score,
            report.quality_grade,
            if report.requires_human_review { ", 需人工复核" } else { "" }
        );
        OperationOutcome::ok(message, report)
    }

    /// 巡检: 对进行中且未质检的实例评分并写入质检记录
    #[instrument(skip(self))]
    pub fn run(&self) -> OperationOutcome<QualitySweepSummary> {
        let candidates = match self.repos.instance_repo.find_in_progress_unchecked() {
            Ok(list) => list,
            Err(e) => return repository_failure("质检巡检", "-", e),
        };

        let mut summary = QualitySweepSummary::default();
        for inst in &candidates {
            let item = self.sweep_one(inst);
            summary.checked += 1;
            if item.error.is_some() {
                summary.errored += 1;
            } else if item.passed {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            summary.items.push(item);
        }

        tracing::info!(
            checked = summary.checked,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            "质检巡检完成"
        );
        OperationOutcome::ok(
            format!(
                "质检巡检完成: 共 {} 个, 通过 {}, 未通过 {}, 异常 {}",
                summary.checked, summary.passed, summary.failed, summary.errored
            ),
            summary,
        )
    }

    /// 质检记录载荷: 评分报告 + 当时生效的阈值
    fn quality_payload(&self, report: &QualityReport) -> Result<serde_json::Value, serde_json::Error> {
        Ok(serde_json::json!({
            "report": serde_json::to_value(report)?,
            "thresholds": serde_json::to_value(&self.thresholds)?,
        }))
    }

    fn sweep_one(&self, inst: &ProcessingInstance) -> QualitySweepItem {
        let mut item = QualitySweepItem {
            instance_id: inst.instance_id.clone(),
            order_id: inst.order_id.clone(),
            passed: false,
            score: None,
            requires_human_review: false,
            error: None,
        };

        let order = match self.repos.order_repo.find_by_id(&inst.order_id) {
            Ok(Some(order)) => order,
            Ok(None) => {
                tracing::warn!(instance_id = %inst.instance_id, order_id = %inst.order_id, "质检巡检: 订单不存在");
                item.error = Some(format!("订单不存在: {}", inst.order_id));
                return item;
            }
            Err(e) => {
                tracing::warn!(instance_id = %inst.instance_id, error = %e, "质检巡检: 读取订单失败");
                item.error = Some(e.to_string());
                return item;
            }
        };

        let report = self.evaluate(inst, &order);
        let payload = match self.quality_payload(&report) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(instance_id = %inst.instance_id, error = %e, "质检巡检: 质检结果序列化失败");
                item.error = Some(format!("质检结果序列化失败: {}", e));
                return item;
            }
        };
        let now = self.clock.now();
        let record = QualityRecord {
            quality_score: Some(report.score),
            quality_checked_at: Some(now),
            requires_human_review: report.requires_human_review,
            quality_result: Some(payload),
        };
        if let Err(e) = self.repos.instance_repo.update_quality(&inst.instance_id, &record) {
            tracing::error!(instance_id = %inst.instance_id, error = %e, "质检巡检: 写入质检记录失败");
            item.error = Some(e.to_string());
            return item;
        }

        item.passed = report.passed;
        item.score = Some(report.score);
        item.requires_human_review = report.requires_human_review;

        let action = if report.requires_human_review {
            AuditAction::QualityReviewRequired
        } else {
            AuditAction::QualityPassed
        };
        let note = if report.review_reasons.is_empty() {
            format!("质量评分 {:.1}", report.score)
        } else {
            report.review_reasons.join("; ")
        };
        let event = AuditEvent::new(&inst.order_id, &inst.stage_id, action, QUALITY_ACTOR, now)
            .with_instance(&inst.instance_id)
            .with_note(Some(note));
        self.audit.emit(&event);

        item
    }
}
