// ==========================================
// 纸卷加工阶段流程系统 - 阶段实例数据仓储
// ==========================================
// 对齐: processing_instance 表
// 红线: Repository 不做业务逻辑,只做数据映射
// 并发: 写入带 revision 乐观锁检查
// ==========================================


use crate::db::{format_ts, parse_json_column, parse_opt_ts, parse_ts};
use crate::domain::stage::{
    ApprovalFlags, CuttingResult, MeasuredDimensions, ProcessingInstance, QualityRecord,
    SortingResults, WarehouseMeasurements,
};
use crate::domain::types::{StageKind, StageStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    instance_id, order_id, stage_id, stage_label, stage_kind, display_order, status,
    started_at, completed_at, assigned_to, estimated_duration_minutes,
    actual_duration_minutes, skip_reason,
    weight_received, weight_transferred, weight_balance, transfer_destination,
    roll1_weight, roll2_weight, sorting_waste_weight, sorting_recorded_at,
    cutting_results_json, measured_json,
    transfer_approved, sorting_approved, cutting_approved,
    approved_by, approval_note, approved_at,
    quality_score, quality_checked_at, requires_human_review, quality_result_json,
    revision, created_at
"#;

// ==========================================
// InstanceQuery - 阶段实例查询条件
// ==========================================
// 所有条件可选, None 表示不过滤
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    pub order_id: Option<String>,
    pub stage_id: Option<String>,
    pub status: Option<StageStatus>,
    pub assigned_to: Option<String>,
    pub created_from: Option<NaiveDateTime>,
    pub created_to: Option<NaiveDateTime>,
}

// ==========================================
// ProcessingInstanceRepository - 阶段实例仓储
// ==========================================
pub struct ProcessingInstanceRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProcessingInstanceRepository {
    /// 从已有连接创建仓储实例
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 按ID查询
    pub fn find_by_id(&self, instance_id: &str) -> RepositoryResult<Option<ProcessingInstance>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in_tx(&conn, instance_id)
    }

    /// 按ID查询 (在调用方持有的连接/事务内)
    pub fn find_by_id_in_tx(
        conn: &Connection,
        instance_id: &str,
    ) -> RepositoryResult<Option<ProcessingInstance>> {
        let sql = format!(
            "SELECT {} FROM processing_instance WHERE instance_id = ?1",
            SELECT_COLUMNS
        );
        let inst = conn
            .query_row(&sql, params![instance_id], Self::map_row)
            .optional()?;
        Ok(inst)
    }

    /// 查询订单全部阶段实例 (按目录顺序)
    pub fn find_by_order(&self, order_id: &str) -> RepositoryResult<Vec<ProcessingInstance>> {
        let conn = self.get_conn()?;
        Self::find_by_order_in_tx(&conn, order_id)
    }

    /// 查询订单全部阶段实例 (在调用方持有的连接/事务内)
    pub fn find_by_order_in_tx(
        conn: &Connection,
        order_id: &str,
    ) -> RepositoryResult<Vec<ProcessingInstance>> {
        let sql = format!(
            "SELECT {} FROM processing_instance WHERE order_id = ?1 ORDER BY display_order, stage_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![order_id], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 订单已有的阶段实例数量
    pub fn count_by_order(&self, order_id: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_instance WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 查询进行中且尚未质检的实例 (质检巡检输入)
    pub fn find_in_progress_unchecked(&self) -> RepositoryResult<Vec<ProcessingInstance>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM processing_instance
               WHERE status = 'IN_PROGRESS' AND quality_checked_at IS NULL
               ORDER BY created_at, instance_id"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 条件查询
    pub fn find_by_query(&self, query: &InstanceQuery) -> RepositoryResult<Vec<ProcessingInstance>> {
        let conn = self.get_conn()?;

        let mut clauses: Vec<&str> = vec![];
        let mut args: Vec<Box<dyn ToSql>> = vec![];

        if let Some(order_id) = &query.order_id {
            clauses.push("order_id = ?");
            args.push(Box::new(order_id.clone()));
        }
        if let Some(stage_id) = &query.stage_id {
            clauses.push("stage_id = ?");
            args.push(Box::new(stage_id.clone()));
        }
        if let Some(status) = &query.status {
            clauses.push("status = ?");
            args.push(Box::new(status.to_db_str()));
        }
        if let Some(assigned_to) = &query.assigned_to {
            clauses.push("assigned_to = ?");
            args.push(Box::new(assigned_to.clone()));
        }
        if let Some(from) = &query.created_from {
            clauses.push("created_at >= ?");
            args.push(Box::new(format_ts(from)));
        }
        if let Some(to) = &query.created_to {
            clauses.push("created_at <= ?");
            args.push(Box::new(format_ts(to)));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM processing_instance {} ORDER BY order_id, display_order",
            SELECT_COLUMNS, where_sql
        );

        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt
            .query_map(arg_refs.as_slice(), Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// 统计操作人在时间窗口内的完成情况
    ///
    /// # 返回
    /// (completed, total): 窗口内创建且已结束的实例中, 已完成数量 / 总数量
    /// (待处理/进行中的实例尚无结论, 不计入)
    pub fn completion_stats_for_assignee(
        &self,
        assignee: &str,
        since: NaiveDateTime,
    ) -> RepositoryResult<(i64, i64)> {
        let conn = self.get_conn()?;
        let stats = conn.query_row(
            r#"SELECT
                   COALESCE(SUM(CASE WHEN status = 'COMPLETED' THEN 1 ELSE 0 END), 0),
                   COUNT(*)
               FROM processing_instance
               WHERE assigned_to = ?1 AND created_at >= ?2
                 AND status NOT IN ('PENDING', 'IN_PROGRESS')"#,
            params![assignee, format_ts(&since)],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        Ok(stats)
    }

    /// 订单历史中是否存在已取消的实例
    pub fn has_cancelled_in_order(&self, order_id: &str) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_instance WHERE order_id = ?1 AND status = 'CANCELLED'",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ==========================================
    // 写入操作 (均在调用方事务内执行)
    // ==========================================

    /// 批量插入阶段实例
    pub fn insert_batch_in_tx(
        conn: &Connection,
        instances: &[ProcessingInstance],
    ) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO processing_instance (
                instance_id, order_id, stage_id, stage_label, stage_kind, display_order,
                status, estimated_duration_minutes, revision, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )?;

        let mut count = 0;
        for inst in instances {
            stmt.execute(params![
                inst.instance_id,
                inst.order_id,
                inst.stage_id,
                inst.stage_label,
                inst.stage_kind.code(),
                inst.display_order,
                inst.status.to_db_str(),
                inst.estimated_duration_minutes,
                inst.revision,
                format_ts(&inst.created_at),
            ])?;
            count += 1;
        }
        Ok(count)
    }

    /// 更新实例 (带乐观锁检查)
    ///
    /// 写入状态/测量/审批字段, 不写质检字段 (质检字段归质检闸门)
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision不匹配 (其他操作已更新)
    /// - `RepositoryError::NotFound`: instance_id不存在
    ///
    /// # 返回
    /// 更新后的 revision
    pub fn update_in_tx(conn: &Connection, inst: &ProcessingInstance) -> RepositoryResult<i32> {
        let cutting_json = if inst.cutting_results.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&inst.cutting_results)?)
        };
        let measured_json = if inst.measured == MeasuredDimensions::default() {
            None
        } else {
            Some(serde_json::to_string(&inst.measured)?)
        };
        let sorting = inst.sorting.as_ref();

        let rows_affected = conn.execute(
            r#"UPDATE processing_instance SET
                   status = ?1, started_at = ?2, completed_at = ?3, assigned_to = ?4,
                   actual_duration_minutes = ?5, skip_reason = ?6,
                   weight_received = ?7, weight_transferred = ?8, weight_balance = ?9,
                   transfer_destination = ?10,
                   roll1_weight = ?11, roll2_weight = ?12, sorting_waste_weight = ?13,
                   sorting_recorded_at = ?14,
                   cutting_results_json = ?15, measured_json = ?16,
                   transfer_approved = ?17, sorting_approved = ?18, cutting_approved = ?19,
                   approved_by = ?20, approval_note = ?21, approved_at = ?22,
                   revision = revision + 1
               WHERE instance_id = ?23 AND revision = ?24"#,
            params![
                inst.status.to_db_str(),
                inst.started_at.as_ref().map(format_ts),
                inst.completed_at.as_ref().map(format_ts),
                inst.assigned_to,
                inst.actual_duration_minutes,
                inst.skip_reason,
                inst.warehouse.weight_received,
                inst.warehouse.weight_transferred,
                inst.warehouse.weight_balance,
                inst.warehouse.transfer_destination,
                sorting.map(|s| s.roll1_weight),
                sorting.map(|s| s.roll2_weight),
                sorting.map(|s| s.waste_weight),
                sorting.map(|s| format_ts(&s.recorded_at)),
                cutting_json,
                measured_json,
                inst.approval.transfer_approved,
                inst.approval.sorting_approved,
                inst.approval.cutting_approved,
                inst.approval.approved_by,
                inst.approval.approval_note,
                inst.approval.approved_at.as_ref().map(format_ts),
                inst.instance_id,
                inst.revision,
            ],
        )?;

        if rows_affected == 0 {
            // 判断是记录不存在还是revision冲突
            let actual: Option<i32> = conn
                .query_row(
                    "SELECT revision FROM processing_instance WHERE instance_id = ?1",
                    params![inst.instance_id],
                    |row| row.get(0),
                )
                .optional()?;

            return match actual {
                Some(actual_revision) => Err(RepositoryError::OptimisticLockFailure {
                    entity: "ProcessingInstance".to_string(),
                    id: inst.instance_id.clone(),
                    expected: inst.revision,
                    actual: actual_revision,
                }),
                None => Err(RepositoryError::NotFound {
                    entity: "ProcessingInstance".to_string(),
                    id: inst.instance_id.clone(),
                }),
            };
        }

        Ok(inst.revision + 1)
    }

    /// 写入质检结果 (仅质检字段)
    pub fn update_quality(&self, instance_id: &str, quality: &QualityRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let payload = quality
            .quality_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let rows_affected = conn.execute(
            r#"UPDATE processing_instance SET
                   quality_score = ?1, quality_checked_at = ?2,
                   requires_human_review = ?3, quality_result_json = ?4
               WHERE instance_id = ?5"#,
            params![
                quality.quality_score,
                quality.quality_checked_at.as_ref().map(format_ts),
                quality.requires_human_review,
                payload,
                instance_id,
            ],
        )?;

        if rows_affected == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ProcessingInstance".to_string(),
                id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    // ==========================================
    // 行映射
    // ==========================================

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ProcessingInstance> {
        let status_raw: String = row.get(6)?;
        let status = StageStatus::from_str(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("未知阶段状态: {}", status_raw).into(),
            )
        })?;

        let sorting = match (
            row.get::<_, Option<f64>>(17)?,
            row.get::<_, Option<f64>>(18)?,
            row.get::<_, Option<f64>>(19)?,
            parse_opt_ts(20, row.get(20)?)?,
        ) {
            (Some(roll1_weight), Some(roll2_weight), Some(waste_weight), Some(recorded_at)) => {
                Some(SortingResults {
                    roll1_weight,
                    roll2_weight,
                    waste_weight,
                    recorded_at,
                })
            }
            _ => None,
        };

        let cutting_results: Vec<CuttingResult> = parse_json_column(21, row.get(21)?)?.unwrap_or_default();
        let measured: MeasuredDimensions = parse_json_column(22, row.get(22)?)?.unwrap_or_default();

        Ok(ProcessingInstance {
            instance_id: row.get(0)?,
            order_id: row.get(1)?,
            stage_id: row.get(2)?,
            stage_label: row.get(3)?,
            stage_kind: StageKind::from_code(&row.get::<_, String>(4)?),
            display_order: row.get(5)?,
            status,
            started_at: parse_opt_ts(7, row.get(7)?)?,
            completed_at: parse_opt_ts(8, row.get(8)?)?,
            assigned_to: row.get(9)?,
            estimated_duration_minutes: row.get(10)?,
            actual_duration_minutes: row.get(11)?,
            skip_reason: row.get(12)?,
            warehouse: WarehouseMeasurements {
                weight_received: row.get(13)?,
                weight_transferred: row.get(14)?,
                weight_balance: row.get(15)?,
                transfer_destination: row.get(16)?,
            },
            sorting,
            cutting_results,
            measured,
            approval: ApprovalFlags {
                transfer_approved: row.get(23)?,
                sorting_approved: row.get(24)?,
                cutting_approved: row.get(25)?,
                approved_by: row.get(26)?,
                approval_note: row.get(27)?,
                approved_at: parse_opt_ts(28, row.get(28)?)?,
            },
            quality: QualityRecord {
                quality_score: row.get(29)?,
                quality_checked_at: parse_opt_ts(30, row.get(30)?)?,
                requires_human_review: row.get(31)?,
                quality_result: parse_json_column(32, row.get(32)?)?,
            },
            revision: row.get(33)?,
            created_at: parse_ts(34, &row.get::<_, String>(34)?)?,
        })
    }
}
