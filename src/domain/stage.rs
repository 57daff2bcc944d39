// ==========================================
// 纸卷加工阶段流程系统 - 阶段领域模型
// ==========================================
// 职责: 阶段目录定义 + 订单阶段实例
// 红线: 每个订单同一时刻最多一个 IN_PROGRESS 实例
// 红线: 测量值未录入用 None 表示, 不用 0 代替
// ==========================================

use crate::domain::types::{StageKind, StageStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// StageDefinition - 阶段定义 (阶段目录)
// ==========================================
// 部署期固定, 核心流程只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub stage_id: String,                         // 阶段编码
    pub label: String,                            // 显示名称
    pub display_order: i32,                       // 显示顺序
    pub estimated_duration_minutes: Option<i64>,  // 预计时长
    pub skippable: bool,                          // 是否可跳过
    pub color: Option<String>,                    // 显示颜色
    pub active: bool,                             // 是否启用
    pub kind: StageKind,                          // 阶段类型
}

impl StageDefinition {
    /// 创建阶段定义, 类型由阶段编码推导
    pub fn new(
        stage_id: &str,
        label: &str,
        display_order: i32,
        estimated_duration_minutes: Option<i64>,
        skippable: bool,
    ) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            label: label.to_string(),
            display_order,
            estimated_duration_minutes,
            skippable,
            color: None,
            active: true,
            kind: StageKind::from_code(stage_id),
        }
    }
}

// ==========================================
// SortingResults - 分拣结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingResults {
    pub roll1_weight: f64,         // 一号卷重量
    pub roll2_weight: f64,         // 二号卷重量
    pub waste_weight: f64,         // 分拣废料重量
    pub recorded_at: NaiveDateTime, // 录入时间
}

impl SortingResults {
    /// 分拣产出 + 废料合计
    pub fn accounted_weight(&self) -> f64 {
        self.roll1_weight + self.roll2_weight + self.waste_weight
    }

    /// 至少一个产出卷重量为正
    pub fn has_output_roll(&self) -> bool {
        self.roll1_weight > 0.0 || self.roll2_weight > 0.0
    }
}

// ==========================================
// CuttingResult - 单卷裁切结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuttingResult {
    pub roll_label: String,   // 卷标识
    pub target_length: f64,   // 目标长度
    pub actual_length: f64,   // 实际长度
}

// ==========================================
// MeasuredDimensions - 实测尺寸
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasuredDimensions {
    #[serde(default)]
    pub length_m: Option<f64>,
    #[serde(default)]
    pub width_mm: Option<f64>,
    #[serde(default)]
    pub thickness_mm: Option<f64>,
    #[serde(default)]
    pub material_type: Option<String>,
    #[serde(default)]
    pub quality_grade: Option<i32>,
}

// ==========================================
// WarehouseMeasurements - 仓库入库测量
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseMeasurements {
    pub weight_received: Option<f64>,        // 入库重量
    pub weight_transferred: Option<f64>,     // 移交重量
    pub weight_balance: Option<f64>,         // 重量差额 (移交 - 入库)
    pub transfer_destination: Option<String>, // 移交去向
}

// ==========================================
// ApprovalFlags - 审批标记
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalFlags {
    pub transfer_approved: bool,
    pub sorting_approved: bool,
    pub cutting_approved: bool,
    pub approved_by: Option<String>,
    pub approval_note: Option<String>,
    pub approved_at: Option<NaiveDateTime>,
}

// ==========================================
// QualityRecord - 质检记录 (由质检闸门写入)
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub quality_score: Option<f64>,
    pub quality_checked_at: Option<NaiveDateTime>,
    pub requires_human_review: bool,
    pub quality_result: Option<JsonValue>,
}

// ==========================================
// ProcessingInstance - 订单阶段实例
// ==========================================
// 对齐: processing_instance 表, 每个 (订单, 阶段) 唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingInstance {
    // ===== 主键与关联 =====
    pub instance_id: String,
    pub order_id: String,
    pub stage_id: String,
    pub stage_label: String,
    pub stage_kind: StageKind,
    pub display_order: i32,

    // ===== 状态 =====
    pub status: StageStatus,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub assigned_to: Option<String>,
    pub estimated_duration_minutes: Option<i64>,
    pub actual_duration_minutes: Option<i64>,
    pub skip_reason: Option<String>,

    // ===== 阶段测量 =====
    pub warehouse: WarehouseMeasurements,
    pub sorting: Option<SortingResults>,
    pub cutting_results: Vec<CuttingResult>,
    pub measured: MeasuredDimensions,

    // ===== 闸门结果 =====
    pub approval: ApprovalFlags,
    pub quality: QualityRecord,

    // ===== 乐观锁 =====
    pub revision: i32,

    pub created_at: NaiveDateTime,
}

impl ProcessingInstance {
    /// 根据阶段定义创建待处理实例
    pub fn pending(
        instance_id: String,
        order_id: &str,
        definition: &StageDefinition,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            instance_id,
            order_id: order_id.to_string(),
            stage_id: definition.stage_id.clone(),
            stage_label: definition.label.clone(),
            stage_kind: definition.kind.clone(),
            display_order: definition.display_order,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            assigned_to: None,
            estimated_duration_minutes: definition.estimated_duration_minutes,
            actual_duration_minutes: None,
            skip_reason: None,
            warehouse: WarehouseMeasurements::default(),
            sorting: None,
            cutting_results: vec![],
            measured: MeasuredDimensions::default(),
            approval: ApprovalFlags::default(),
            quality: QualityRecord::default(),
            revision: 0,
            created_at,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == StageStatus::InProgress
    }

    pub fn is_pending(&self) -> bool {
        self.status == StageStatus::Pending
    }

    /// 分拣废料占入库重量的比例 (无入库重量或非正数返回 None)
    pub fn waste_ratio(&self) -> Option<f64> {
        let received = self.warehouse.weight_received.filter(|w| *w > 0.0)?;
        let waste = self.sorting.as_ref()?.waste_weight;
        Some(waste / received)
    }

    /// 本阶段是否已被闸门批准
    pub fn is_approved(&self) -> bool {
        self.approval.transfer_approved
            || self.approval.sorting_approved
            || self.approval.cutting_approved
    }

    /// 已过去的时长 (分钟, 含小数), 未开始返回 None
    pub fn elapsed_minutes(&self, now: NaiveDateTime) -> Option<f64> {
        self.started_at
            .map(|start| (now - start).num_seconds() as f64 / 60.0)
    }
}
