use crate::domain::gate::ApprovalDecision;
use crate::domain::stage::ProcessingInstance;
use serde::{Deserialize, Serialize};

/// 全部阶段结束后的订单标签
pub const ORDER_LABEL_COMPLETED: &str = "completed";
/// 订单取消后的订单标签
pub const ORDER_LABEL_CANCELLED: &str = "cancelled";

// ==========================================
// AdvanceResult - 推进结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceResult {
    pub completed: Option<ProcessingInstance>, // 本次完成的阶段
    pub started: Option<ProcessingInstance>,   // 本次开始的阶段
    pub order_completed: bool,                 // 订单全部阶段已结束
}

// ==========================================
// AutoAdvanceResult - 自动审批推进结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAdvanceResult {
    pub decision: ApprovalDecision,
    /// 审批未通过时为 None
    pub advance: Option<AdvanceResult>,
}

// ==========================================
// SortingInput - 分拣结果录入
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingInput {
    pub roll1_weight: f64,
    pub roll2_weight: f64,
    pub waste_weight: f64,
    /// 分拣入料重量; 不填时沿用仓库阶段的移交重量 (无移交重量则用入库重量)
    #[serde(default)]
    pub weight_received: Option<f64>,
}
