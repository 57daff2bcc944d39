// ==========================================
// 纸卷加工阶段流程系统 - 核心库
// ==========================================
// 职责: 订单阶段流转 + 自动审批闸门 + 质检闸门
// 技术栈: Rust + SQLite
// 系统定位: 规则可自动放行的阶段自动放行, 其余交由人工决定
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 流转与闸门规则
pub mod engine;

// 配置层 - 闸门阈值
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{Capability, OrderPriority, StageKind, StageStatus, TransitionAction};

// 领域实体
pub use domain::{
    ApprovalDecision, GateDecision, OperationOutcome, Order, OutcomeKind, ProcessingInstance,
    QualityReport, StageDefinition, TransitionRecord,
};

// 引擎
pub use engine::{ApprovalGate, QualityGate, StageWorkflow, WorkflowRepositories};

// 配置
pub use config::{ConfigManager, GateThresholds};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "纸卷加工阶段流程系统";
