use super::types::SortingInput;
use super::StageWorkflow;
use crate::domain::outcome::OperationOutcome;
use crate::domain::stage::{CuttingResult, MeasuredDimensions, ProcessingInstance, SortingResults};
use crate::domain::transition::TransitionRecord;
use crate::domain::types::{Capability, StageKind, TransitionAction};
use crate::engine::repositories::repository_failure;
use crate::repository::{ProcessingInstanceRepository, TransitionRepository};
use serde_json::{json, Value as JsonValue};
use tracing::instrument;

/// 录入步骤: 修改实例并返回写入历史的动作参数, Err 为业务拒绝原因
type Apply<'a> = Box<dyn FnOnce(&mut ProcessingInstance) -> Result<JsonValue, String> + 'a>;

fn require_positive(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{}必须为正数: {}", name, value))
    }
}

fn require_non_negative(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{}不能为负数: {}", name, value))
    }
}

impl StageWorkflow {
    /// 确认仓库入库重量
    #[instrument(skip(self, note), fields(instance_id = %instance_id, actor = %actor))]
    pub fn approve_weight_received(
        &self,
        instance_id: &str,
        actor: &str,
        weight_received: f64,
        note: Option<&str>,
    ) -> OperationOutcome<ProcessingInstance> {
        self.record_measurement(
            instance_id,
            actor,
            StageKind::Warehouse,
            Capability::ApproveWeight,
            TransitionAction::WeightApproved,
            note,
            Box::new(move |inst| {
                if inst.warehouse.weight_received.is_some() {
                    return Err("入库重量已确认, 不可重复录入".to_string());
                }
                require_positive("入库重量", weight_received)?;
                inst.warehouse.weight_received = Some(weight_received);
                Ok(json!({ "weight_received": weight_received }))
            }),
        )
    }

    /// 仓库移交: 记录移交重量与去向, 计算重量差额 (移交 - 入库)
    #[instrument(skip(self), fields(instance_id = %instance_id, actor = %actor))]
    pub fn manage_transfer(
        &self,
        instance_id: &str,
        actor: &str,
        weight_transferred: f64,
        destination: &str,
    ) -> OperationOutcome<ProcessingInstance> {
        let destination = destination.trim().to_string();
        self.record_measurement(
            instance_id,
            actor,
            StageKind::Warehouse,
            Capability::ManageTransfer,
            TransitionAction::TransferCompleted,
            None,
            Box::new(move |inst| {
                if inst.warehouse.weight_transferred.is_some() {
                    return Err("移交已完成, 不可重复录入".to_string());
                }
                let received = inst
                    .warehouse
                    .weight_received
                    .ok_or_else(|| "尚未确认入库重量, 不能移交".to_string())?;
                require_positive("移交重量", weight_transferred)?;
                if destination.is_empty() {
                    return Err("移交去向不能为空".to_string());
                }

                let balance = weight_transferred - received;
                inst.warehouse.weight_transferred = Some(weight_transferred);
                inst.warehouse.weight_balance = Some(balance);
                inst.warehouse.transfer_destination = Some(destination.clone());
                Ok(json!({
                    "weight_received": received,
                    "weight_transferred": weight_transferred,
                    "weight_balance": balance,
                    "destination": destination,
                }))
            }),
        )
    }

    /// 录入分拣结果
    ///
    /// 入料重量未填写时沿用同订单仓库阶段的移交重量 (无则入库重量)
    #[instrument(skip(self, input), fields(instance_id = %instance_id, actor = %actor))]
    pub fn record_sorting_results(
        &self,
        instance_id: &str,
        actor: &str,
        input: SortingInput,
    ) -> OperationOutcome<ProcessingInstance> {
        let now = self.clock.now();
        self.record_measurement(
            instance_id,
            actor,
            StageKind::Sorting,
            Capability::RecordSortingResults,
            TransitionAction::SortingCompleted,
            None,
            Box::new(move |inst| {
                if inst.sorting.is_some() {
                    return Err("分拣结果已录入, 不可重复录入".to_string());
                }
                require_non_negative("一号卷重量", input.roll1_weight)?;
                require_non_negative("二号卷重量", input.roll2_weight)?;
                require_non_negative("废料重量", input.waste_weight)?;

                let received = match input.weight_received.or(inst.warehouse.weight_received) {
                    Some(w) => w,
                    None => self
                        .inherited_weight(&inst.order_id)?
                        .ok_or_else(|| "缺少分拣入料重量, 且仓库阶段未录入重量".to_string())?,
                };
                require_positive("分拣入料重量", received)?;

                inst.warehouse.weight_received = Some(received);
                inst.sorting = Some(SortingResults {
                    roll1_weight: input.roll1_weight,
                    roll2_weight: input.roll2_weight,
                    waste_weight: input.waste_weight,
                    recorded_at: now,
                });
                Ok(json!({
                    "weight_received": received,
                    "roll1_weight": input.roll1_weight,
                    "roll2_weight": input.roll2_weight,
                    "waste_weight": input.waste_weight,
                }))
            }),
        )
    }

    /// 录入裁切结果与实测尺寸
    #[instrument(skip(self, results, measured), fields(instance_id = %instance_id, actor = %actor, rolls = results.len()))]
    pub fn record_cutting_results(
        &self,
        instance_id: &str,
        actor: &str,
        results: Vec<CuttingResult>,
        measured: MeasuredDimensions,
    ) -> OperationOutcome<ProcessingInstance> {
        self.record_measurement(
            instance_id,
            actor,
            StageKind::Cutting,
            Capability::RecordCuttingResults,
            TransitionAction::CuttingCompleted,
            None,
            Box::new(move |inst| {
                if !inst.cutting_results.is_empty() {
                    return Err("裁切结果已录入, 不可重复录入".to_string());
                }
                if results.is_empty() {
                    return Err("裁切结果不能为空".to_string());
                }
                for r in &results {
                    require_positive(&format!("卷 {} 目标长度", r.roll_label), r.target_length)?;
                    require_non_negative(&format!("卷 {} 实际长度", r.roll_label), r.actual_length)?;
                }

                let payload = json!({ "rolls": results.len(), "measured": &measured });
                inst.cutting_results = results;
                inst.measured = measured;
                Ok(payload)
            }),
        )
    }

    // ==========================================
    // 内部实现
    // ==========================================

    /// 录入通用流程
    ///
    /// 1. 读取实例, 校验阶段类型与状态 (终态不可录入)
    /// 2. 权限检查
    /// 3. 应用录入 (含重复录入检查)
    /// 4. 实例更新 + 流转历史 (单事务)
    /// 5. 提交后投递审计
    #[allow(clippy::too_many_arguments)]
    fn record_measurement(
        &self,
        instance_id: &str,
        actor: &str,
        expected_kind: StageKind,
        capability: Capability,
        action: TransitionAction,
        note: Option<&str>,
        apply: Apply<'_>,
    ) -> OperationOutcome<ProcessingInstance> {
        let mut inst = match self.load_instance(instance_id) {
            Ok(inst) => inst,
            Err(failure) => return failure,
        };

        if inst.stage_kind != expected_kind {
            return OperationOutcome::rejected(format!(
                "阶段 {} 不是{}阶段, 不能执行该录入",
                inst.stage_label, expected_kind
            ));
        }
        if inst.status.is_terminal() {
            return OperationOutcome::rejected(format!(
                "阶段 {} 状态为 {}, 不可录入",
                inst.stage_label, inst.status
            ));
        }
        if !self.authorizer.can(actor, capability, &inst) {
            tracing::debug!(instance_id, actor, capability = capability.as_str(), "权限不足");
            return OperationOutcome::rejected(format!("操作人 {} 无权限: {}", actor, capability.as_str()));
        }

        let payload = match apply(&mut inst) {
            Ok(payload) => payload,
            Err(reason) => {
                tracing::debug!(instance_id, actor, reason = %reason, "录入被拒绝");
                return OperationOutcome::rejected(reason);
            }
        };

        let now = self.clock.now();
        let record = TransitionRecord::new(&inst.order_id, &inst.instance_id, &inst.stage_id, action, actor, now)
            .with_labels(Some(&inst.stage_label), Some(&inst.stage_label))
            .with_note(note)
            .with_payload(&payload);

        let result = self.repos.transaction(|tx| {
            let revision = ProcessingInstanceRepository::update_in_tx(tx, &inst)?;
            TransitionRepository::insert_in_tx(tx, &record)?;
            Ok(revision)
        });
        match result {
            Ok(revision) => inst.revision = revision,
            Err(e) => return repository_failure(action.as_str(), instance_id, e),
        }

        tracing::info!(
            instance_id,
            order_id = %inst.order_id,
            stage_id = %inst.stage_id,
            actor,
            action = action.as_str(),
            "阶段测量已录入"
        );
        self.emit_transitions(std::slice::from_ref(&record));
        OperationOutcome::ok(format!("阶段 {} 录入成功", inst.stage_label), inst)
    }

    /// 同订单仓库阶段的移交重量 (无则入库重量)
    fn inherited_weight(&self, order_id: &str) -> Result<Option<f64>, String> {
        let instances = self
            .repos
            .instance_repo
            .find_by_order(order_id)
            .map_err(|e| format!("读取仓库阶段失败: {}", e))?;
        Ok(instances
            .iter()
            .find(|i| i.stage_kind == StageKind::Warehouse)
            .and_then(|w| w.warehouse.weight_transferred.or(w.warehouse.weight_received)))
    }
}
