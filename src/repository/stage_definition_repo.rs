// ==========================================
// 纸卷加工阶段流程系统 - 阶段目录数据仓储
// ==========================================
// 对齐: stage_definition 表
// 说明: 阶段目录按部署配置, 流程核心只读
// ==========================================

use crate::domain::stage::StageDefinition;
use crate::domain::types::StageKind;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str =
    "stage_id, label, display_order, estimated_duration_minutes, skippable, color, active, kind";

pub struct StageDefinitionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StageDefinitionRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 新增或覆盖阶段定义 (部署初始化使用)
    pub fn upsert(&self, def: &StageDefinition) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO stage_definition (
                stage_id, label, display_order, estimated_duration_minutes,
                skippable, color, active, kind
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(stage_id) DO UPDATE SET
                label = excluded.label,
                display_order = excluded.display_order,
                estimated_duration_minutes = excluded.estimated_duration_minutes,
                skippable = excluded.skippable,
                color = excluded.color,
                active = excluded.active,
                kind = excluded.kind
            "#,
            params![
                def.stage_id,
                def.label,
                def.display_order,
                def.estimated_duration_minutes,
                def.skippable,
                def.color,
                def.active,
                def.kind.code(),
            ],
        )?;
        Ok(())
    }

    /// 按编码查询
    pub fn find_by_id(&self, stage_id: &str) -> RepositoryResult<Option<StageDefinition>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM stage_definition WHERE stage_id = ?1", SELECT_COLUMNS);
        let def = conn
            .query_row(&sql, params![stage_id], Self::map_row)
            .optional()?;
        Ok(def)
    }

    /// 查询启用的阶段 (按显示顺序)
    pub fn list_active(&self) -> RepositoryResult<Vec<StageDefinition>> {
        let conn = self.get_conn()?;
        Self::list_active_in_tx(&conn)
    }

    /// 查询启用的阶段 (在调用方持有的连接/事务内)
    pub fn list_active_in_tx(conn: &Connection) -> RepositoryResult<Vec<StageDefinition>> {
        let sql = format!(
            "SELECT {} FROM stage_definition WHERE active = 1 ORDER BY display_order, stage_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let defs = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    /// 查询全部阶段 (含停用)
    pub fn list_all(&self) -> RepositoryResult<Vec<StageDefinition>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM stage_definition ORDER BY display_order, stage_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let defs = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<StageDefinition> {
        Ok(StageDefinition {
            stage_id: row.get(0)?,
            label: row.get(1)?,
            display_order: row.get(2)?,
            estimated_duration_minutes: row.get(3)?,
            skippable: row.get(4)?,
            color: row.get(5)?,
            active: row.get(6)?,
            kind: StageKind::from_code(&row.get::<_, String>(7)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> StageDefinitionRepository {
        let conn = crate::db::open_in_memory().unwrap();
        StageDefinitionRepository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_list_active_ordered_by_display_order() {
        let repo = setup();
        repo.upsert(&StageDefinition::new("cutting", "裁切", 3, Some(120), false)).unwrap();
        repo.upsert(&StageDefinition::new("warehouse", "仓库入库", 1, Some(60), false)).unwrap();
        let mut packing = StageDefinition::new("packing", "包装", 2, None, true);
        packing.active = false;
        repo.upsert(&packing).unwrap();

        let active = repo.list_active().unwrap();
        let ids: Vec<&str> = active.iter().map(|d| d.stage_id.as_str()).collect();
        assert_eq!(ids, vec!["warehouse", "cutting"]);
        assert_eq!(repo.list_all().unwrap().len(), 3);
    }

    #[test]
    fn test_upsert_overwrites() {
        let repo = setup();
        repo.upsert(&StageDefinition::new("sorting", "分拣", 2, Some(90), false)).unwrap();
        repo.upsert(&StageDefinition::new("sorting", "分拣(新)", 5, None, true)).unwrap();

        let def = repo.find_by_id("sorting").unwrap().unwrap();
        assert_eq!(def.label, "分拣(新)");
        assert_eq!(def.display_order, 5);
        assert!(def.skippable);
        assert_eq!(def.kind, StageKind::Sorting);
        assert!(repo.find_by_id("unknown").unwrap().is_none());
    }
}
