// ==========================================
// 纸卷加工阶段流程系统 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合流程引擎/闸门所需的所有 Repository
// 职责: 提供单连接事务入口, 保证"实例字段 + 流转历史"原子提交
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::domain::outcome::OperationOutcome;
use crate::repository::{
    OrderRepository, ProcessingInstanceRepository, RepositoryError, RepositoryResult,
    StageDefinitionRepository, TransitionRepository,
};

/// 流程引擎仓储集合
///
/// 所有仓储共享同一个连接句柄。
/// 事务内只能调用 `*_in_tx` 关联函数, 不能再调用持锁的读方法 (会死锁)。
#[derive(Clone)]
pub struct WorkflowRepositories {
    conn: Arc<Mutex<Connection>>,
    pub order_repo: Arc<OrderRepository>,
    pub stage_repo: Arc<StageDefinitionRepository>,
    pub instance_repo: Arc<ProcessingInstanceRepository>,
    pub transition_repo: Arc<TransitionRepository>,
}

impl WorkflowRepositories {
    /// 基于共享连接创建仓储集合
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            order_repo: Arc::new(OrderRepository::new(conn.clone())),
            stage_repo: Arc::new(StageDefinitionRepository::new(conn.clone())),
            instance_repo: Arc::new(ProcessingInstanceRepository::new(conn.clone())),
            transition_repo: Arc::new(TransitionRepository::new(conn.clone())),
            conn,
        }
    }

    /// 共享连接句柄
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// 在单个事务内执行闭包
    ///
    /// - 闭包返回 Ok: 提交
    /// - 闭包返回 Err: 回滚 (Transaction drop 时自动回滚)
    pub fn transaction<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&Connection) -> RepositoryResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;

        let value = f(&tx)?;

        tx.commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(value)
    }
}

/// 仓储错误 → 操作结果
///
/// - 并发冲突 (revision 不符 / 进行中唯一索引) → 业务拒绝
/// - 记录缺失 → 数据完整性失败 (warn)
/// - 其他 → 意外失败 (error), 事务已回滚
pub fn repository_failure<T>(
    operation: &str,
    subject_id: &str,
    err: RepositoryError,
) -> OperationOutcome<T> {
    if err.is_concurrency_conflict() {
        tracing::debug!(operation, subject_id, error = %err, "并发修改冲突");
        return OperationOutcome::rejected("并发修改冲突: 记录已被其他操作更新, 请刷新后重试");
    }

    match err {
        RepositoryError::NotFound { entity, id } => {
            tracing::warn!(operation, subject_id, entity = %entity, id = %id, "关联记录缺失");
            OperationOutcome::integrity_failure(format!("{}不存在: {}", entity, id))
        }
        other => {
            tracing::error!(operation, subject_id, error = %other, "操作失败, 事务已回滚");
            OperationOutcome::unexpected(format!("{}失败: {}", operation, other))
        }
    }
}
