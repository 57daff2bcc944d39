// ==========================================
// 纸卷加工阶段流程系统 - 阶段流转历史领域模型
// ==========================================
// 红线: 流转历史只追加, 不修改、不删除
// 用途: 审计追踪, 效率统计
// 对齐: stage_transition 表
// ==========================================

use crate::domain::types::TransitionAction;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// TransitionRecord - 流转记录
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition_id: String,          // 记录ID
    pub order_id: String,               // 订单ID
    pub instance_id: String,            // 阶段实例ID
    pub stage_id: String,               // 阶段编码
    pub previous_label: Option<String>, // 变更前阶段标签
    pub new_label: Option<String>,      // 变更后阶段标签
    pub action: TransitionAction,       // 动作
    pub actor: String,                  // 操作人
    pub note: Option<String>,           // 备注
    pub payload_json: Option<JsonValue>, // 动作参数 (JSON)
    pub created_at: NaiveDateTime,      // 记录时间
}

impl TransitionRecord {
    /// 创建新的流转记录
    ///
    /// # 参数
    /// - `order_id` / `instance_id` / `stage_id`: 关联实体
    /// - `action`: 流转动作
    /// - `actor`: 操作人
    /// - `created_at`: 记录时间 (来自注入时钟)
    pub fn new(
        order_id: &str,
        instance_id: &str,
        stage_id: &str,
        action: TransitionAction,
        actor: &str,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            transition_id: uuid::Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            instance_id: instance_id.to_string(),
            stage_id: stage_id.to_string(),
            previous_label: None,
            new_label: None,
            action,
            actor: actor.to_string(),
            note: None,
            payload_json: None,
            created_at,
        }
    }

    /// 设置标签变化
    pub fn with_labels(mut self, previous: Option<&str>, new: Option<&str>) -> Self {
        self.previous_label = previous.map(|s| s.to_string());
        self.new_label = new.map(|s| s.to_string());
        self
    }

    /// 设置备注 (空白备注视为无)
    pub fn with_note(mut self, note: Option<&str>) -> Self {
        self.note = note
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());
        self
    }

    /// 设置动作参数 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    /// 生成简短摘要文本
    pub fn summary_text(&self) -> String {
        let from = self.previous_label.as_deref().unwrap_or("-");
        let to = self.new_label.as_deref().unwrap_or("-");
        match &self.note {
            Some(note) => format!("[{}] {} → {} ({}): {}", self.action, from, to, self.actor, note),
            None => format!("[{}] {} → {} ({})", self.action, from, to, self.actor),
        }
    }
}
