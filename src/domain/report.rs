// ==========================================
// 纸卷加工阶段流程系统 - 报表投影
// ==========================================
// 职责: 订单筛选、阶段统计、效率指标的只读输出结构
// 说明: 报表不参与流转判定, 允许读到稍旧的数据
// ==========================================

use crate::domain::order::Order;
use crate::domain::stage::ProcessingInstance;
use crate::domain::types::{OrderPriority, StageStatus};
use crate::domain::transition::TransitionRecord;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// OrderFilter - 订单筛选条件
// ==========================================
// 所有条件可选, None 表示不过滤
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderFilter {
    pub priority: Option<OrderPriority>,
    /// 当前进行中的阶段编码
    pub current_stage_id: Option<String>,
    /// 当前进行中阶段的负责人
    pub assigned_to: Option<String>,
    /// 订单中存在该状态的阶段实例
    pub has_status: Option<StageStatus>,
    pub created_from: Option<NaiveDateTime>,
    pub created_to: Option<NaiveDateTime>,
}

/// 报表时间范围 (闭区间, 按实例创建时间)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportRange {
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
}

impl ReportRange {
    pub fn between(from: NaiveDateTime, to: NaiveDateTime) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }
}

// ==========================================
// OrderProgress - 订单进度
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProgress {
    pub order: Order,
    pub total_stages: usize,
    pub completed_stages: usize,
    pub skipped_stages: usize,
    pub cancelled_stages: usize,
    /// (已完成 + 已跳过) / 总数, 百分比
    pub progress_pct: f64,
    pub current_instance: Option<ProcessingInstance>,
}

// ==========================================
// StageStatistics - 单阶段状态统计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageStatistics {
    pub stage_id: String,
    pub stage_label: String,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub avg_actual_minutes: Option<f64>,
}

impl StageStatistics {
    /// 计入一个实例的状态
    pub fn count(&mut self, status: StageStatus) {
        self.total += 1;
        match status {
            StageStatus::Pending => self.pending += 1,
            StageStatus::InProgress => self.in_progress += 1,
            StageStatus::Completed => self.completed += 1,
            StageStatus::Skipped => self.skipped += 1,
            StageStatus::Cancelled => self.cancelled += 1,
        }
    }
}

// ==========================================
// EfficiencyReport - 效率指标
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyReport {
    pub stages: Vec<StageEfficiency>,
    pub operators: Vec<OperatorThroughput>,
    /// 全部已完成实例中按时完成的比例 (无样本为 None)
    pub overall_on_time_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageEfficiency {
    pub stage_id: String,
    pub stage_label: String,
    pub completed: usize,
    pub avg_actual_minutes: Option<f64>,
    pub avg_estimated_minutes: Option<f64>,
    /// 预计 / 实际, 大于 1 表示快于预期
    pub efficiency_ratio: Option<f64>,
    pub on_time_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorThroughput {
    pub assignee: String,
    pub completed: usize,
    pub avg_actual_minutes: Option<f64>,
}

// ==========================================
// OrderHistory - 订单流转历史
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHistory {
    pub order_id: String,
    pub current_stage: Option<String>,
    pub instances: Vec<ProcessingInstance>,
    pub transitions: Vec<TransitionRecord>,
}

/// 求平均值 (空集合为 None)
pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
