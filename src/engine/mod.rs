// ==========================================
// 纸卷加工阶段流程系统 - 引擎层
// ==========================================
// 职责: 阶段流转状态机 + 审批闸门 + 质检闸门
// 红线: Engine 不拼 SQL, 所有判定必须输出 reason
// 红线: 外部协作方 (时钟/审计/授权/选料) 通过 trait 注入
// ==========================================

pub mod approval_gate;
pub mod audit;
pub mod clock;
pub mod collaborators;
pub mod gate_core;
pub mod quality_gate;
pub mod repositories;
pub mod spec_validator;
pub mod workflow;

// 重导出核心引擎
pub use approval_gate::ApprovalGate;
pub use audit::{
    AuditAction, AuditDispatcher, AuditEvent, AuditSink, MemoryAuditSink, NoOpAuditSink,
    TracingAuditSink,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use collaborators::{
    AllocationOutcome, AllowAllAuthorizer, Authorizer, MaterialAllocator, StaticAuthorizer,
};
pub use gate_core::{GateCore, EPSILON};
pub use quality_gate::QualityGate;
pub use repositories::{repository_failure, WorkflowRepositories};
pub use spec_validator::validate_delivery_spec;
pub use workflow::{
    AdvanceResult, AutoAdvanceResult, SortingInput, StageWorkflow, ORDER_LABEL_CANCELLED,
    ORDER_LABEL_COMPLETED,
};
