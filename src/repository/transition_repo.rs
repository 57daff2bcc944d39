// ==========================================
// 纸卷加工阶段流程系统 - 阶段流转历史仓储
// ==========================================
// 对齐: stage_transition 表
// 红线: 只追加, 不提供更新/删除
// ==========================================

use crate::db::{format_ts, parse_json_column, parse_ts};
use crate::domain::transition::TransitionRecord;
use crate::domain::types::TransitionAction;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    transition_id, order_id, instance_id, stage_id, previous_label, new_label,
    action, actor, note, payload_json, created_at
"#;

pub struct TransitionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TransitionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加流转记录 (在调用方事务内)
    pub fn insert_in_tx(conn: &Connection, record: &TransitionRecord) -> RepositoryResult<String> {
        conn.execute(
            r#"
            INSERT INTO stage_transition (
                transition_id, order_id, instance_id, stage_id, previous_label, new_label,
                action, actor, note, payload_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.transition_id,
                record.order_id,
                record.instance_id,
                record.stage_id,
                record.previous_label,
                record.new_label,
                record.action.as_str(),
                record.actor,
                record.note,
                record.payload_json.as_ref().map(|v| v.to_string()),
                format_ts(&record.created_at),
            ],
        )?;
        Ok(record.transition_id.clone())
    }

    /// 按订单查询 (时间正序)
    pub fn find_by_order(&self, order_id: &str) -> RepositoryResult<Vec<TransitionRecord>> {
        self.query(
            "WHERE order_id = ?1 ORDER BY created_at ASC, rowid ASC",
            params![order_id],
        )
    }

    /// 按阶段实例查询 (时间正序)
    pub fn find_by_instance(&self, instance_id: &str) -> RepositoryResult<Vec<TransitionRecord>> {
        self.query(
            "WHERE instance_id = ?1 ORDER BY created_at ASC, rowid ASC",
            params![instance_id],
        )
    }

    /// 按时间范围查询 (闭区间, 时间正序)
    pub fn find_by_time_range(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> RepositoryResult<Vec<TransitionRecord>> {
        self.query(
            "WHERE created_at >= ?1 AND created_at <= ?2 ORDER BY created_at ASC, rowid ASC",
            params![format_ts(&start), format_ts(&end)],
        )
    }

    /// 查询最近 N 条记录 (时间倒序)
    pub fn find_recent(&self, limit: i64) -> RepositoryResult<Vec<TransitionRecord>> {
        self.query(
            "ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            params![limit],
        )
    }

    /// 按动作统计次数
    pub fn count_by_action(&self, action: TransitionAction) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stage_transition WHERE action = ?1",
            params![action.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn query(
        &self,
        tail: &str,
        args: impl rusqlite::Params,
    ) -> RepositoryResult<Vec<TransitionRecord>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM stage_transition {}", SELECT_COLUMNS, tail);
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(args, Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<TransitionRecord> {
        let action_raw: String = row.get(6)?;
        let action = TransitionAction::from_str(&action_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("未知流转动作: {}", action_raw).into(),
            )
        })?;
        let payload_json: Option<JsonValue> = parse_json_column(9, row.get(9)?)?;

        Ok(TransitionRecord {
            transition_id: row.get(0)?,
            order_id: row.get(1)?,
            instance_id: row.get(2)?,
            stage_id: row.get(3)?,
            previous_label: row.get(4)?,
            new_label: row.get(5)?,
            action,
            actor: row.get(7)?,
            note: row.get(8)?,
            payload_json,
            created_at: parse_ts(10, &row.get::<_, String>(10)?)?,
        })
    }
}
