use super::types::{AdvanceResult, AutoAdvanceResult, ORDER_LABEL_CANCELLED, ORDER_LABEL_COMPLETED};
use super::StageWorkflow;
use crate::domain::order::Order;
use crate::domain::outcome::OperationOutcome;
use crate::domain::stage::ProcessingInstance;
use crate::domain::transition::TransitionRecord;
use crate::domain::types::{StageStatus, TransitionAction};
use crate::engine::approval_gate::ApprovalGate;
use crate::engine::audit::{AuditDispatcher, AuditEvent, AuditSink};
use crate::engine::clock::Clock;
use crate::engine::collaborators::Authorizer;
use crate::engine::repositories::{repository_failure, WorkflowRepositories};
use crate::repository::{OrderRepository, ProcessingInstanceRepository, TransitionRepository};
use std::sync::Arc;
use tracing::instrument;

impl StageWorkflow {
    pub fn new(
        repos: WorkflowRepositories,
        clock: Arc<dyn Clock>,
        audit_sink: Arc<dyn AuditSink>,
        authorizer: Arc<dyn Authorizer>,
        approval_gate: Arc<ApprovalGate>,
    ) -> Self {
        Self {
            repos,
            clock,
            audit: AuditDispatcher::new(audit_sink),
            authorizer,
            approval_gate,
        }
    }

    // ==========================================
    // 初始化
    // ==========================================

    /// 为订单创建阶段实例 (每个启用阶段一个, 按目录顺序, 全部待处理)
    ///
    /// # 规则
    /// - 只能调用一次, 重复调用为业务拒绝且无副作用
    /// - 启用阶段目录为空视为数据完整性问题
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub fn initialize(&self, order_id: &str, actor: &str) -> OperationOutcome<Vec<ProcessingInstance>> {
        if let Err(failure) = self.load_order(order_id) {
            return failure;
        }

        match self.repos.instance_repo.count_by_order(order_id) {
            Ok(0) => {}
            Ok(_) => {
                return OperationOutcome::rejected(format!("订单 {} 的阶段已初始化", order_id));
            }
            Err(e) => return repository_failure("初始化阶段", order_id, e),
        }

        let definitions = match self.repos.stage_repo.list_active() {
            Ok(defs) => defs,
            Err(e) => return repository_failure("初始化阶段", order_id, e),
        };
        if definitions.is_empty() {
            tracing::warn!(order_id, "阶段目录中没有启用的阶段");
            return OperationOutcome::integrity_failure("阶段目录中没有启用的阶段");
        }

        let now = self.clock.now();
        let instances: Vec<ProcessingInstance> = definitions
            .iter()
            .map(|def| ProcessingInstance::pending(uuid::Uuid::new_v4().to_string(), order_id, def, now))
            .collect();

        if let Err(e) = self
            .repos
            .transaction(|tx| ProcessingInstanceRepository::insert_batch_in_tx(tx, &instances))
        {
            return repository_failure("初始化阶段", order_id, e);
        }

        tracing::info!(order_id, actor, stages = instances.len(), "订单阶段初始化完成");
        OperationOutcome::ok(format!("已创建 {} 个阶段", instances.len()), instances)
    }

    // ==========================================
    // 推进
    // ==========================================

    /// 推进订单到下一阶段
    ///
    /// # 规则
    /// - 有进行中阶段: 完成它, 再开始下一个待处理阶段 (若有)
    /// - 无进行中阶段: 开始第一个待处理阶段
    /// - 最后一个阶段完成后订单标签置为 completed
    /// - 无可推进阶段: 业务拒绝, 无副作用
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub fn advance(&self, order_id: &str, actor: &str) -> OperationOutcome<AdvanceResult> {
        let order = match self.load_order(order_id) {
            Ok(order) => order,
            Err(failure) => return failure,
        };
        let instances = match self.repos.instance_repo.find_by_order(order_id) {
            Ok(list) => list,
            Err(e) => return repository_failure("推进阶段", order_id, e),
        };
        if instances.is_empty() {
            return OperationOutcome::rejected(format!("订单 {} 尚未初始化阶段", order_id));
        }

        let current = instances.iter().find(|i| i.is_in_progress()).cloned();
        // 实例按目录顺序排列, 首个待处理实例之前的阶段均已结束
        let next = instances.iter().find(|i| i.is_pending()).cloned();

        if current.is_none() && next.is_none() {
            tracing::debug!(order_id, "无可推进的阶段");
            return OperationOutcome::rejected("所有阶段均已结束, 无可推进的阶段");
        }

        let now = self.clock.now();
        let mut records = Vec::new();

        let completed = current.map(|mut inst| {
            inst.status = StageStatus::Completed;
            inst.completed_at = Some(now);
            inst.actual_duration_minutes = inst.started_at.map(|s| (now - s).num_minutes().max(0));
            let new_label = next
                .as_ref()
                .map(|n| n.stage_label.as_str())
                .unwrap_or(ORDER_LABEL_COMPLETED);
            records.push(
                TransitionRecord::new(&inst.order_id, &inst.instance_id, &inst.stage_id, TransitionAction::Complete, actor, now)
                    .with_labels(Some(&inst.stage_label), Some(new_label)),
            );
            inst
        });

        let started = next.map(|mut inst| {
            inst.status = StageStatus::InProgress;
            inst.started_at = Some(now);
            inst.assigned_to = Some(actor.to_string());
            let previous_label = completed
                .as_ref()
                .map(|c| c.stage_label.clone())
                .or_else(|| order.current_stage.clone());
            records.push(
                TransitionRecord::new(&inst.order_id, &inst.instance_id, &inst.stage_id, TransitionAction::Start, actor, now)
                    .with_labels(previous_label.as_deref(), Some(&inst.stage_label)),
            );
            inst
        });

        let order_completed = started.is_none();
        let order_label = match &started {
            Some(inst) => inst.stage_label.clone(),
            None => ORDER_LABEL_COMPLETED.to_string(),
        };

        let result = self.repos.transaction(|tx| {
            let mut result = AdvanceResult {
                completed: None,
                started: None,
                order_completed,
            };
            if let Some(mut inst) = completed.clone() {
                inst.revision = ProcessingInstanceRepository::update_in_tx(tx, &inst)?;
                result.completed = Some(inst);
            }
            if let Some(mut inst) = started.clone() {
                inst.revision = ProcessingInstanceRepository::update_in_tx(tx, &inst)?;
                result.started = Some(inst);
            }
            for record in &records {
                TransitionRepository::insert_in_tx(tx, record)?;
            }
            OrderRepository::update_current_stage_in_tx(tx, order_id, Some(&order_label))?;
            Ok(result)
        });

        let result = match result {
            Ok(result) => result,
            Err(e) => return repository_failure("推进阶段", order_id, e),
        };

        tracing::info!(
            order_id,
            actor,
            completed = result.completed.as_ref().map(|i| i.stage_id.as_str()).unwrap_or("-"),
            started = result.started.as_ref().map(|i| i.stage_id.as_str()).unwrap_or("-"),
            order_completed,
            "阶段推进完成"
        );
        self.emit_transitions(&records);

        let message = if order_completed {
            "全部阶段已完成".to_string()
        } else {
            format!("已进入阶段: {}", order_label)
        };
        OperationOutcome::ok(message, result)
    }

    /// 自动审批当前阶段, 审批通过后推进
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub fn advance_with_auto_approval(
        &self,
        order_id: &str,
        actor: &str,
    ) -> OperationOutcome<AutoAdvanceResult> {
        let instances = match self.repos.instance_repo.find_by_order(order_id) {
            Ok(list) => list,
            Err(e) => return repository_failure("自动审批推进", order_id, e),
        };
        let current = match instances.iter().find(|i| i.is_in_progress()) {
            Some(inst) => inst,
            None => {
                return OperationOutcome::rejected(format!("订单 {} 没有进行中的阶段", order_id));
            }
        };

        let approval = self.approval_gate.auto_approve_if_eligible(&current.instance_id, actor);
        if !approval.success {
            return approval.map(|decision| AutoAdvanceResult {
                decision,
                advance: None,
            });
        }
        let decision = match approval.data {
            Some(decision) => decision,
            None => return OperationOutcome::unexpected("自动审批未返回判定结果"),
        };

        let advance = self.advance(order_id, actor);
        if !advance.success {
            tracing::warn!(order_id, message = %advance.message, "自动审批已通过, 但推进失败");
            return OperationOutcome {
                success: false,
                message: format!("自动审批已通过, 但推进失败: {}", advance.message),
                data: Some(AutoAdvanceResult {
                    decision,
                    advance: None,
                }),
                kind: advance.kind,
            };
        }

        let message = format!("自动审批通过, {}", advance.message);
        OperationOutcome::ok(
            message,
            AutoAdvanceResult {
                decision,
                advance: advance.data,
            },
        )
    }

    // ==========================================
    // 跳过 / 取消
    // ==========================================

    /// 跳过阶段
    ///
    /// # 规则
    /// - 阶段定义必须可跳过
    /// - 实例状态必须为待处理或进行中
    /// - 跳过原因不能为空
    /// - 拒绝时不写任何记录
    #[instrument(skip(self), fields(order_id = %order_id, stage_id = %stage_id, actor = %actor))]
    pub fn skip(
        &self,
        order_id: &str,
        stage_id: &str,
        actor: &str,
        reason: &str,
    ) -> OperationOutcome<ProcessingInstance> {
        let definition = match self.repos.stage_repo.find_by_id(stage_id) {
            Ok(Some(def)) => def,
            Ok(None) => {
                tracing::warn!(order_id, stage_id, "阶段定义不存在");
                return OperationOutcome::integrity_failure(format!("阶段定义不存在: {}", stage_id));
            }
            Err(e) => return repository_failure("跳过阶段", order_id, e),
        };
        let mut inst = match self.find_instance(order_id, stage_id) {
            Ok(inst) => inst,
            Err(failure) => return failure,
        };

        if !definition.skippable {
            tracing::debug!(order_id, stage_id, "阶段不可跳过");
            return OperationOutcome::rejected(format!("阶段 {} 不可跳过", definition.label));
        }
        if !inst.status.is_skippable() {
            tracing::debug!(order_id, stage_id, status = %inst.status, "阶段状态不允许跳过");
            return OperationOutcome::rejected(format!(
                "阶段 {} 状态为 {}, 不可跳过",
                inst.stage_label, inst.status
            ));
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return OperationOutcome::rejected("跳过原因不能为空");
        }

        let now = self.clock.now();
        let was_in_progress = inst.is_in_progress();
        inst.status = StageStatus::Skipped;
        inst.skip_reason = Some(reason.to_string());
        if was_in_progress {
            inst.completed_at = Some(now);
        }

        let record = TransitionRecord::new(order_id, &inst.instance_id, stage_id, TransitionAction::Skip, actor, now)
            .with_labels(Some(&inst.stage_label), None)
            .with_note(Some(reason));

        let result = self.repos.transaction(|tx| {
            let revision = ProcessingInstanceRepository::update_in_tx(tx, &inst)?;
            TransitionRepository::insert_in_tx(tx, &record)?;
            Ok(revision)
        });
        match result {
            Ok(revision) => inst.revision = revision,
            Err(e) => return repository_failure("跳过阶段", order_id, e),
        }

        tracing::info!(order_id, stage_id, actor, "阶段已跳过");
        self.emit_transitions(std::slice::from_ref(&record));
        OperationOutcome::ok(format!("阶段 {} 已跳过", inst.stage_label), inst)
    }

    /// 取消订单: 所有未结束阶段置为已取消
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor))]
    pub fn cancel(
        &self,
        order_id: &str,
        actor: &str,
        reason: &str,
    ) -> OperationOutcome<Vec<ProcessingInstance>> {
        if let Err(failure) = self.load_order(order_id) {
            return failure;
        }
        let instances = match self.repos.instance_repo.find_by_order(order_id) {
            Ok(list) => list,
            Err(e) => return repository_failure("取消订单", order_id, e),
        };

        let now = self.clock.now();
        let mut records = Vec::new();
        let cancelled: Vec<ProcessingInstance> = instances
            .into_iter()
            .filter(|i| !i.status.is_terminal())
            .map(|mut inst| {
                inst.status = StageStatus::Cancelled;
                records.push(
                    TransitionRecord::new(order_id, &inst.instance_id, &inst.stage_id, TransitionAction::Cancel, actor, now)
                        .with_labels(Some(&inst.stage_label), Some(ORDER_LABEL_CANCELLED))
                        .with_note(Some(reason)),
                );
                inst
            })
            .collect();

        if cancelled.is_empty() {
            return OperationOutcome::rejected(format!("订单 {} 没有可取消的阶段", order_id));
        }

        let result = self.repos.transaction(|tx| {
            let mut saved = Vec::with_capacity(cancelled.len());
            for inst in &cancelled {
                let mut inst = inst.clone();
                inst.revision = ProcessingInstanceRepository::update_in_tx(tx, &inst)?;
                saved.push(inst);
            }
            for record in &records {
                TransitionRepository::insert_in_tx(tx, record)?;
            }
            OrderRepository::update_current_stage_in_tx(tx, order_id, Some(ORDER_LABEL_CANCELLED))?;
            Ok(saved)
        });
        let saved = match result {
            Ok(saved) => saved,
            Err(e) => return repository_failure("取消订单", order_id, e),
        };

        tracing::info!(order_id, actor, cancelled = saved.len(), "订单已取消");
        self.emit_transitions(&records);
        OperationOutcome::ok(format!("已取消 {} 个阶段", saved.len()), saved)
    }

    // ==========================================
    // 内部工具
    // ==========================================

    pub(super) fn load_order<T>(&self, order_id: &str) -> Result<Order, OperationOutcome<T>> {
        match self.repos.order_repo.find_by_id(order_id) {
            Ok(Some(order)) => Ok(order),
            Ok(None) => {
                tracing::warn!(order_id, "订单不存在");
                Err(OperationOutcome::integrity_failure(format!("订单不存在: {}", order_id)))
            }
            Err(e) => Err(repository_failure("读取订单", order_id, e)),
        }
    }

    pub(super) fn load_instance<T>(&self, instance_id: &str) -> Result<ProcessingInstance, OperationOutcome<T>> {
        match self.repos.instance_repo.find_by_id(instance_id) {
            Ok(Some(inst)) => Ok(inst),
            Ok(None) => {
                tracing::warn!(instance_id, "阶段实例不存在");
                Err(OperationOutcome::integrity_failure(format!("阶段实例不存在: {}", instance_id)))
            }
            Err(e) => Err(repository_failure("读取阶段实例", instance_id, e)),
        }
    }

    fn find_instance<T>(&self, order_id: &str, stage_id: &str) -> Result<ProcessingInstance, OperationOutcome<T>> {
        let instances = self
            .repos
            .instance_repo
            .find_by_order(order_id)
            .map_err(|e| repository_failure("读取阶段实例", order_id, e))?;
        instances
            .into_iter()
            .find(|i| i.stage_id == stage_id)
            .ok_or_else(|| {
                tracing::warn!(order_id, stage_id, "订单阶段实例不存在");
                OperationOutcome::integrity_failure(format!(
                    "订单 {} 不存在阶段实例: {}",
                    order_id, stage_id
                ))
            })
    }

    /// 提交后投递审计 (一条流转记录对应一条审计事件)
    pub(super) fn emit_transitions(&self, records: &[TransitionRecord]) {
        let events: Vec<AuditEvent> = records.iter().map(AuditEvent::from_transition).collect();
        self.audit.emit_all(&events);
    }
}
