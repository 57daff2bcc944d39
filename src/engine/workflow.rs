// ==========================================
// 纸卷加工阶段流程系统 - 阶段流转引擎
// ==========================================
// 职责: 为订单创建阶段实例, 推进/跳过/取消阶段, 录入阶段测量
// 红线: 每个订单同一时刻最多一个进行中阶段
// 红线: 阶段顺序单调, 前序阶段未结束时后续阶段不得开始
// 红线: 每次状态变化都写入流转历史, 与实例更新在同一事务提交
// 红线: 审计事件在提交后投递, 投递失败不影响操作结果
// ==========================================

mod core;
mod recording;
mod reporting;
mod types;


pub use types::{AdvanceResult, AutoAdvanceResult, SortingInput, ORDER_LABEL_CANCELLED, ORDER_LABEL_COMPLETED};

use crate::engine::approval_gate::ApprovalGate;
use crate::engine::audit::AuditDispatcher;
use crate::engine::clock::Clock;
use crate::engine::collaborators::Authorizer;
use crate::engine::repositories::WorkflowRepositories;
use std::sync::Arc;

// ==========================================
// StageWorkflow - 阶段流转引擎
// ==========================================
pub struct StageWorkflow {
    repos: WorkflowRepositories,
    clock: Arc<dyn Clock>,
    audit: AuditDispatcher,
    authorizer: Arc<dyn Authorizer>,
    approval_gate: Arc<ApprovalGate>,
}
