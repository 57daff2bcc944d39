// ==========================================
// 纸卷加工阶段流程系统 - 配置层
// ==========================================
// 职责: 闸门阈值管理, 支持 config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod gate_thresholds;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use gate_thresholds::GateThresholds;
