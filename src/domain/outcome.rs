// ==========================================
// 纸卷加工阶段流程系统 - 操作结果
// ==========================================
// 对外返回约定: {success, message, data?}
// - success=false + Rejected: 业务规则拒绝 (可预期, 不记错误日志)
// - success=false + IntegrityFailure: 数据完整性问题 (记 warn)
// - success=false + Unexpected: 事务内异常, 已整体回滚 (记 error)
// ==========================================

use serde::{Deserialize, Serialize};

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Ok,
    Rejected,
    IntegrityFailure,
    Unexpected,
}

/// 操作结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub kind: OutcomeKind,
}

impl<T> OperationOutcome<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            kind: OutcomeKind::Ok,
        }
    }

    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            kind: OutcomeKind::Ok,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            kind: OutcomeKind::Rejected,
        }
    }

    /// 业务拒绝, 同时携带判定明细
    pub fn rejected_with(message: impl Into<String>, data: T) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Some(data),
            kind: OutcomeKind::Rejected,
        }
    }

    pub fn integrity_failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            kind: OutcomeKind::IntegrityFailure,
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            kind: OutcomeKind::Unexpected,
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.kind == OutcomeKind::Rejected
    }

    /// 转换携带的数据类型, 保留成功标记与消息
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> OperationOutcome<U> {
        OperationOutcome {
            success: self.success,
            message: self.message,
            data: self.data.map(f),
            kind: self.kind,
        }
    }

    /// 丢弃数据, 仅保留结果 (用于失败结果在不同操作间传递)
    pub fn discard<U>(self) -> OperationOutcome<U> {
        OperationOutcome {
            success: self.success,
            message: self.message,
            data: None,
            kind: self.kind,
        }
    }
}
