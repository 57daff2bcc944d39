// ==========================================
// 纸卷加工阶段流程系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 提供阶段流程所需的最小 schema (可重复执行)
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开内存库并建表 (测试/临时场景)
pub fn open_in_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    configure_sqlite_connection(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// 建表 (幂等)
///
/// 约束:
/// - processing_instance (order_id, stage_id) 唯一
/// - 同一订单最多一条 IN_PROGRESS 记录 (部分唯一索引)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS stage_definition (
            stage_id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            display_order INTEGER NOT NULL,
            estimated_duration_minutes INTEGER,
            skippable INTEGER NOT NULL DEFAULT 0,
            color TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            kind TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS production_order (
            order_id TEXT PRIMARY KEY,
            order_no TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'normal',
            delivery_spec_json TEXT,
            selected_materials_json TEXT,
            final_price REAL,
            estimated_material_cost REAL,
            delivery_deadline TEXT,
            current_stage TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS processing_instance (
            instance_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES production_order(order_id),
            stage_id TEXT NOT NULL REFERENCES stage_definition(stage_id),
            stage_label TEXT NOT NULL,
            stage_kind TEXT NOT NULL,
            display_order INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            assigned_to TEXT,
            estimated_duration_minutes INTEGER,
            actual_duration_minutes INTEGER,
            skip_reason TEXT,
            weight_received REAL,
            weight_transferred REAL,
            weight_balance REAL,
            transfer_destination TEXT,
            roll1_weight REAL,
            roll2_weight REAL,
            sorting_waste_weight REAL,
            sorting_recorded_at TEXT,
            cutting_results_json TEXT,
            measured_json TEXT,
            transfer_approved INTEGER NOT NULL DEFAULT 0,
            sorting_approved INTEGER NOT NULL DEFAULT 0,
            cutting_approved INTEGER NOT NULL DEFAULT 0,
            approved_by TEXT,
            approval_note TEXT,
            approved_at TEXT,
            quality_score REAL,
            quality_checked_at TEXT,
            requires_human_review INTEGER NOT NULL DEFAULT 0,
            quality_result_json TEXT,
            revision INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (order_id, stage_id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_processing_single_in_progress
            ON processing_instance(order_id) WHERE status = 'IN_PROGRESS';

        CREATE INDEX IF NOT EXISTS idx_processing_status
            ON processing_instance(status);

        CREATE TABLE IF NOT EXISTS stage_transition (
            transition_id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            instance_id TEXT NOT NULL,
            stage_id TEXT NOT NULL,
            previous_label TEXT,
            new_label TEXT,
            action TEXT NOT NULL,
            actor TEXT NOT NULL,
            note TEXT,
            payload_json TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_transition_order
            ON stage_transition(order_id, created_at);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 时间戳转存储字符串
pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// 存储字符串转时间戳 (列号用于错误定位)
pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// 可空时间戳列读取
pub fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

/// 可空 JSON 列读取
pub fn parse_json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<T>> {
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}
