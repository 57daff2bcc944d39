// ==========================================
// 纸卷加工阶段流程系统 - 领域类型定义
// ==========================================
// 依据: 阶段流转状态机 + 审批/质检闸门
// 红线: 终态 (COMPLETED/SKIPPED/CANCELLED) 不可回退
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 阶段实例状态 (Stage Status)
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    Pending,    // 待处理
    InProgress, // 进行中
    Completed,  // 已完成
    Skipped,    // 已跳过
    Cancelled,  // 已取消
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

impl StageStatus {
    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(StageStatus::Pending),
            "IN_PROGRESS" => Some(StageStatus::InProgress),
            "COMPLETED" => Some(StageStatus::Completed),
            "SKIPPED" => Some(StageStatus::Skipped),
            "CANCELLED" => Some(StageStatus::Cancelled),
            _ => None,
        }
    }

    /// 转换为数据库存储的字符串
    pub fn to_db_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::InProgress => "IN_PROGRESS",
            StageStatus::Completed => "COMPLETED",
            StageStatus::Skipped => "SKIPPED",
            StageStatus::Cancelled => "CANCELLED",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Completed | StageStatus::Skipped | StageStatus::Cancelled
        )
    }

    /// 是否允许跳过（仅待处理/进行中）
    pub fn is_skippable(&self) -> bool {
        matches!(self, StageStatus::Pending | StageStatus::InProgress)
    }
}

// ==========================================
// 阶段类型 (Stage Kind)
// ==========================================
// 封闭枚举: 由阶段编码推导, 闸门规则按类型穷举匹配
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Warehouse,     // 仓库入库
    Sorting,       // 分拣
    Cutting,       // 裁切
    Other(String), // 其他阶段 (永不自动审批)
}

impl StageKind {
    /// 根据阶段编码推导类型
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "warehouse" => StageKind::Warehouse,
            "sorting" => StageKind::Sorting,
            "cutting" => StageKind::Cutting,
            other => StageKind::Other(other.to_string()),
        }
    }

    /// 转换为数据库存储的编码
    pub fn code(&self) -> &str {
        match self {
            StageKind::Warehouse => "warehouse",
            StageKind::Sorting => "sorting",
            StageKind::Cutting => "cutting",
            StageKind::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ==========================================
// 订单优先级 (Order Priority)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPriority {
    Normal, // 普通
    High,   // 加急
}

impl OrderPriority {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => OrderPriority::High,
            _ => OrderPriority::Normal, // 默认值
        }
    }

    pub fn to_db_str(&self) -> &'static str {
        match self {
            OrderPriority::Normal => "normal",
            OrderPriority::High => "high",
        }
    }
}

impl fmt::Display for OrderPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 流转动作 (Transition Action)
// ==========================================
// 红线: 每次状态变化必须写入流转历史
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Start,             // 开始阶段
    Complete,          // 完成阶段
    Skip,              // 跳过阶段
    Cancel,            // 取消阶段
    WeightApproved,    // 入库重量确认
    SortingCompleted,  // 分拣结果录入
    TransferCompleted, // 移交完成
    CuttingCompleted,  // 裁切结果录入
    AutoApproved,      // 自动审批通过
}

impl TransitionAction {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionAction::Start => "start",
            TransitionAction::Complete => "complete",
            TransitionAction::Skip => "skip",
            TransitionAction::Cancel => "cancel",
            TransitionAction::WeightApproved => "weight_approved",
            TransitionAction::SortingCompleted => "sorting_completed",
            TransitionAction::TransferCompleted => "transfer_completed",
            TransitionAction::CuttingCompleted => "cutting_completed",
            TransitionAction::AutoApproved => "auto_approved",
        }
    }

    /// 从字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(TransitionAction::Start),
            "complete" => Some(TransitionAction::Complete),
            "skip" => Some(TransitionAction::Skip),
            "cancel" => Some(TransitionAction::Cancel),
            "weight_approved" => Some(TransitionAction::WeightApproved),
            "sorting_completed" => Some(TransitionAction::SortingCompleted),
            "transfer_completed" => Some(TransitionAction::TransferCompleted),
            "cutting_completed" => Some(TransitionAction::CuttingCompleted),
            "auto_approved" => Some(TransitionAction::AutoApproved),
            _ => None,
        }
    }
}

impl fmt::Display for TransitionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 操作权限 (Capability)
// ==========================================
// 权限判定由外部授权服务完成, 本系统只查询
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ApproveWeight,        // 确认入库重量
    RecordSortingResults, // 录入分拣结果
    ManageTransfer,       // 管理移交
    RecordCuttingResults, // 录入裁切结果
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ApproveWeight => "approve_weight",
            Capability::RecordSortingResults => "record_sorting_results",
            Capability::ManageTransfer => "manage_transfer",
            Capability::RecordCuttingResults => "record_cutting_results",
        }
    }
}
