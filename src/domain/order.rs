// ==========================================
// 纸卷加工阶段流程系统 - 订单领域模型
// ==========================================
// 职责: 订单规格、选料、报价快照
// 红线: 本系统只写 current_stage, 其余字段由外部协作方维护
// ==========================================

use crate::domain::types::OrderPriority;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Order - 生产订单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,                       // 订单ID
    pub order_no: String,                       // 订单编号
    pub priority: OrderPriority,                // 优先级
    pub spec: DeliverySpec,                     // 交付规格
    pub selected_materials: Vec<SelectedMaterial>, // 已选材料
    pub pricing: PricingSnapshot,               // 报价快照
    pub delivery_deadline: Option<NaiveDateTime>, // 交付期限
    pub current_stage: Option<String>,          // 当前阶段标签
    pub created_at: NaiveDateTime,              // 创建时间
}

// ==========================================
// DeliverySpec - 交付规格
// ==========================================
// 所有字段可选: 未填写 ≠ 填写为 0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliverySpec {
    #[serde(default)]
    pub width_mm: Option<f64>, // 宽度
    #[serde(default)]
    pub length_m: Option<f64>, // 长度
    #[serde(default)]
    pub thickness_mm: Option<f64>, // 厚度
    #[serde(default)]
    pub grammage_gsm: Option<f64>, // 克重
    #[serde(default)]
    pub quality: Option<String>, // 品质等级描述
    #[serde(default)]
    pub quantity: Option<i64>, // 数量
    #[serde(default)]
    pub weight_kg: Option<f64>, // 重量
    #[serde(default)]
    pub material_type: Option<String>, // 材料类型
    #[serde(default)]
    pub required_quality_grade: Option<i32>, // 要求的质量等级 (1~5)
}

// ==========================================
// SelectedMaterial - 选料分配
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedMaterial {
    pub material_id: String,     // 材料ID
    pub allocated_weight_kg: f64, // 分配重量
    pub cost: f64,               // 分配成本
}

// ==========================================
// PricingSnapshot - 报价快照
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    #[serde(default)]
    pub final_price: Option<f64>, // 最终报价
    #[serde(default)]
    pub estimated_material_cost: Option<f64>, // 预估材料成本
}

impl Order {
    /// 创建新的订单 (规格与报价为空)
    pub fn new(order_id: String, order_no: String, priority: OrderPriority, created_at: NaiveDateTime) -> Self {
        Self {
            order_id,
            order_no,
            priority,
            spec: DeliverySpec::default(),
            selected_materials: vec![],
            pricing: PricingSnapshot::default(),
            delivery_deadline: None,
            current_stage: None,
            created_at,
        }
    }

    /// 是否为加急订单
    pub fn is_high_priority(&self) -> bool {
        self.priority == OrderPriority::High
    }

    /// 已选材料的成本合计 (无选料返回 None)
    pub fn selected_material_cost(&self) -> Option<f64> {
        if self.selected_materials.is_empty() {
            return None;
        }
        Some(self.selected_materials.iter().map(|m| m.cost).sum())
    }

    /// 已选材料的分配重量合计
    pub fn selected_material_weight(&self) -> f64 {
        self.selected_materials
            .iter()
            .map(|m| m.allocated_weight_kg)
            .sum()
    }
}
