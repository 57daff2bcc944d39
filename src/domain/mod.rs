// ==========================================
// 纸卷加工阶段流程系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、闸门判定结构
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod gate;
pub mod order;
pub mod outcome;
pub mod report;
pub mod stage;
pub mod transition;
pub mod types;

// 重导出核心类型
pub use gate::{
    ApprovalDecision, CheckResult, GateDecision, QualityChecks, QualityReport,
    QualitySweepItem, QualitySweepSummary, SmartValidationReport, VisualAnalysis,
};
pub use order::{DeliverySpec, Order, PricingSnapshot, SelectedMaterial};
pub use outcome::{OperationOutcome, OutcomeKind};
pub use report::{
    EfficiencyReport, OperatorThroughput, OrderFilter, OrderHistory, OrderProgress,
    ReportRange, StageEfficiency, StageStatistics,
};
pub use stage::{
    ApprovalFlags, CuttingResult, MeasuredDimensions, ProcessingInstance, QualityRecord,
    SortingResults, StageDefinition, WarehouseMeasurements,
};
pub use transition::TransitionRecord;
pub use types::{Capability, OrderPriority, StageKind, StageStatus, TransitionAction};
