// ==========================================
// 纸卷加工阶段流程系统 - 审计事件输出
// ==========================================
// 职责: 定义审计输出 trait，实现依赖倒置
// 说明: 引擎层只依赖 AuditSink, 具体投递由外部实现
// 红线: 审计投递为尽力而为, 失败不得影响业务结果
// ==========================================

use crate::domain::transition::TransitionRecord;
use crate::domain::types::TransitionAction;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::{Arc, Mutex};

/// 审计投递最大尝试次数
pub const AUDIT_MAX_ATTEMPTS: usize = 3;

// ==========================================
// 审计动作
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// 阶段流转 (与流转历史一一对应)
    Transition(TransitionAction),
    /// 审批闸门拒绝自动审批
    ApprovalDenied,
    /// 质检通过
    QualityPassed,
    /// 质检要求人工复核
    QualityReviewRequired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Transition(action) => action.as_str(),
            AuditAction::ApprovalDenied => "approval_denied",
            AuditAction::QualityPassed => "quality_passed",
            AuditAction::QualityReviewRequired => "quality_review_required",
        }
    }
}

/// 审计事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub order_id: String,
    pub stage_id: String,
    pub instance_id: Option<String>,
    pub action: AuditAction,
    pub actor_id: String,
    pub note: Option<String>,
    pub timestamp: NaiveDateTime,
}

impl AuditEvent {
    pub fn new(
        order_id: &str,
        stage_id: &str,
        action: AuditAction,
        actor_id: &str,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            order_id: order_id.to_string(),
            stage_id: stage_id.to_string(),
            instance_id: None,
            action,
            actor_id: actor_id.to_string(),
            note: None,
            timestamp,
        }
    }

    /// 由流转记录生成审计事件 (一条历史对应一条审计)
    pub fn from_transition(record: &TransitionRecord) -> Self {
        Self {
            order_id: record.order_id.clone(),
            stage_id: record.stage_id.clone(),
            instance_id: Some(record.instance_id.clone()),
            action: AuditAction::Transition(record.action),
            actor_id: record.actor.clone(),
            note: record.note.clone(),
            timestamp: record.created_at,
        }
    }

    pub fn with_instance(mut self, instance_id: &str) -> Self {
        self.instance_id = Some(instance_id.to_string());
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

// ==========================================
// 审计输出 Trait
// ==========================================

/// 审计事件接收方
///
/// # 实现说明
/// - 返回 Err 时由 AuditDispatcher 重试
/// - 实现方不需要自行重试
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 默认实现: 以结构化日志输出 (target = "audit")
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::info!(
            target: "audit",
            order_id = %event.order_id,
            stage_id = %event.stage_id,
            instance_id = event.instance_id.as_deref().unwrap_or("-"),
            action = event.action.as_str(),
            actor = %event.actor_id,
            note = event.note.as_deref().unwrap_or(""),
            timestamp = %event.timestamp,
            "audit"
        );
        Ok(())
    }
}

/// 空操作实现
#[derive(Debug, Clone, Default)]
pub struct NoOpAuditSink;

impl AuditSink for NoOpAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            "NoOpAuditSink: 跳过审计事件 - order_id={}, action={}",
            event.order_id,
            event.action.as_str()
        );
        Ok(())
    }
}

/// 内存实现 (测试断言用)
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已接收事件的副本
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 按动作筛选
    pub fn events_with(&self, action: AuditAction) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self
            .events
            .lock()
            .map_err(|e| format!("审计缓存锁获取失败: {}", e))?;
        guard.push(event.clone());
        Ok(())
    }
}

// ==========================================
// AuditDispatcher - 有界重试投递
// ==========================================
#[derive(Clone)]
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
    max_attempts: usize,
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            max_attempts: AUDIT_MAX_ATTEMPTS,
        }
    }

    /// 投递事件
    ///
    /// # 返回
    /// - true: 已投递
    /// - false: 重试耗尽 (已记录 warn, 不向上传播)
    pub fn emit(&self, event: &AuditEvent) -> bool {
        for attempt in 1..=self.max_attempts {
            match self.sink.record(event) {
                Ok(()) => return true,
                Err(e) if attempt < self.max_attempts => {
                    tracing::debug!(
                        attempt,
                        order_id = %event.order_id,
                        action = event.action.as_str(),
                        error = %e,
                        "审计投递失败, 重试"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        attempts = self.max_attempts,
                        order_id = %event.order_id,
                        stage_id = %event.stage_id,
                        action = event.action.as_str(),
                        error = %e,
                        "审计投递失败, 已放弃"
                    );
                }
            }
        }
        false
    }

    /// 批量投递
    pub fn emit_all(&self, events: &[AuditEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}
