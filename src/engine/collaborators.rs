// ==========================================
// 纸卷加工阶段流程系统 - 外部协作方接口
// ==========================================
// 职责: 权限判定 / 选料分配 的依赖倒置接口
// 说明: 本系统只查询结果, 不实现判定规则
// ==========================================

use crate::domain::order::DeliverySpec;
use crate::domain::stage::ProcessingInstance;
use crate::domain::types::Capability;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::error::Error;

// ==========================================
// Authorizer - 权限判定
// ==========================================
pub trait Authorizer: Send + Sync {
    /// 操作人能否对该阶段实例执行指定操作
    fn can(&self, actor: &str, capability: Capability, instance: &ProcessingInstance) -> bool;
}

/// 全部放行 (单机部署/测试)
#[derive(Debug, Clone, Default)]
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn can(&self, _actor: &str, _capability: Capability, _instance: &ProcessingInstance) -> bool {
        true
    }
}

/// 静态授权表: 未登记的操作人/权限一律拒绝
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    grants: HashMap<String, HashSet<Capability>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 授予权限
    pub fn grant(mut self, actor: &str, capability: Capability) -> Self {
        self.grants
            .entry(actor.to_string())
            .or_default()
            .insert(capability);
        self
    }
}

impl Authorizer for StaticAuthorizer {
    fn can(&self, actor: &str, capability: Capability, _instance: &ProcessingInstance) -> bool {
        self.grants
            .get(actor)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false)
    }
}

// ==========================================
// MaterialAllocator - 选料分配
// ==========================================

/// 选料分配结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub passed: bool,
    pub estimated_cost: Option<f64>,
    pub reason: Option<String>,
}

/// 选料服务 (只消费其结论与成本估算)
pub trait MaterialAllocator: Send + Sync {
    fn allocate(
        &self,
        spec: &DeliverySpec,
        required_weight: f64,
    ) -> Result<AllocationOutcome, Box<dyn Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::StageDefinition;

    #[test]
    fn test_static_authorizer() {
        let now = chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        let def = StageDefinition::new("warehouse", "仓库入库", 1, Some(60), false);
        let inst = ProcessingInstance::pending("I1".into(), "O1", &def, now);

        let auth = StaticAuthorizer::new().grant("u1", Capability::ApproveWeight);
        assert!(auth.can("u1", Capability::ApproveWeight, &inst));
        assert!(!auth.can("u1", Capability::ManageTransfer, &inst));
        assert!(!auth.can("u2", Capability::ApproveWeight, &inst));
        assert!(AllowAllAuthorizer.can("anyone", Capability::ManageTransfer, &inst));
    }
}
