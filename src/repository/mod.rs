// ==========================================
// 纸卷加工阶段流程系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约束: 写入方法以 *_in_tx 形式接收调用方连接, 由引擎层统一管理事务
// ==========================================

pub mod error;
pub mod order_repo;
pub mod processing_repo;
pub mod stage_definition_repo;
pub mod transition_repo;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use order_repo::OrderRepository;
pub use processing_repo::{InstanceQuery, ProcessingInstanceRepository};
pub use stage_definition_repo::StageDefinitionRepository;
pub use transition_repo::TransitionRepository;
