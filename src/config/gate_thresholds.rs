// ==========================================
// 纸卷加工阶段流程系统 - 闸门阈值
// ==========================================
// 职责: 审批闸门/质检闸门使用的全部数值规则
// 说明: 默认值即生产口径, 可由 config_kv 覆写
// ==========================================

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 闸门阈值集合
///
/// 比例类字段统一使用小数 (0.001 = 0.1%)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    // ===== 仓库入库 =====
    pub warehouse_max_weight: f64,     // 入库重量上限
    pub warehouse_min_balance: f64,    // 重量差额下限
    pub balance_tolerance_ratio: f64,  // 重量平衡容差 (相对入库重量)

    // ===== 分拣 =====
    pub routine_waste_ratio: f64,      // 常规审批废料上限
    pub quality_waste_ratio: f64,      // 质量标准废料上限 (不含)

    // ===== 时效 =====
    pub timeline_overrun_ratio: f64,   // 超出预计时长的比例上限
    pub deadline_buffer_hours: f64,    // 交期缓冲小时数

    // ===== 成本 =====
    pub waste_cost_ratio: f64,         // 废料成本占报价上限
    pub labor_cost_ratio: f64,         // 人工成本占报价上限
    pub labor_hourly_rate: f64,        // 人工小时费率

    // ===== 智能审批 =====
    pub min_completion_rate: f64,      // 操作人完成率下限
    pub completion_window_days: i64,   // 完成率统计窗口

    // ===== 质检 =====
    pub length_tolerance_ratio: f64,   // 长度容差
    pub width_tolerance_ratio: f64,    // 宽度容差
    pub thickness_tolerance_ratio: f64, // 厚度容差
    pub cutting_tolerance_ratio: f64,  // 裁切长度容差
    pub review_score: f64,             // 低于此分数需人工复核
    pub review_cutting_precision: f64, // 裁切精度低于此值需人工复核
    pub visual_cutting_precision: f64, // 裁切精度低于此值记为外观问题
    pub visual_issue_limit: usize,     // 外观问题数超过此值需人工复核
}

/// 完成率统计窗口上限 (天)
pub const MAX_COMPLETION_WINDOW_DAYS: i64 = 3650;

impl GateThresholds {
    /// 完成率统计起点, 窗口非法或时间溢出时返回 None
    pub fn completion_window_start(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !(1..=MAX_COMPLETION_WINDOW_DAYS).contains(&self.completion_window_days) {
            return None;
        }
        Duration::try_days(self.completion_window_days).and_then(|d| now.checked_sub_signed(d))
    }
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            warehouse_max_weight: 5000.0,
            warehouse_min_balance: -10.0,
            balance_tolerance_ratio: 0.001,
            routine_waste_ratio: 0.10,
            quality_waste_ratio: 0.15,
            timeline_overrun_ratio: 1.2,
            deadline_buffer_hours: 2.0,
            waste_cost_ratio: 0.05,
            labor_cost_ratio: 0.30,
            labor_hourly_rate: 50.0,
            min_completion_rate: 0.80,
            completion_window_days: 30,
            length_tolerance_ratio: 0.02,
            width_tolerance_ratio: 0.02,
            thickness_tolerance_ratio: 0.05,
            cutting_tolerance_ratio: 0.02,
            review_score: 80.0,
            review_cutting_precision: 0.9,
            visual_cutting_precision: 0.8,
            visual_issue_limit: 2,
        }
    }
}
