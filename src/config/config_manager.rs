// ==========================================
// 纸卷加工阶段流程系统 - 配置管理器
// ==========================================
// 职责: 闸门阈值加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 约束: 配置缺失或格式错误时回退默认值并记录 warn
// ==========================================

use crate::config::gate_thresholds::{GateThresholds, MAX_COMPLETION_WINDOW_DAYS};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值 (存在则覆盖)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析配置值, 缺失或格式错误时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy + std::fmt::Display,
    {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };

        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    default = %default,
                    "配置值格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }

    /// 读取并解析配置值, 超出取值范围时同样回退默认值
    fn get_in_range_or_default<T>(
        &self,
        key: &str,
        default: T,
        range: RangeInclusive<T>,
    ) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy + PartialOrd + std::fmt::Display,
    {
        let value = self.get_parsed_or_default(key, default)?;
        if range.contains(&value) {
            return Ok(value);
        }
        tracing::warn!(
            config_key = key,
            value = %value,
            min = %range.start(),
            max = %range.end(),
            default = %default,
            "配置值超出取值范围，使用默认值"
        );
        Ok(default)
    }

    /// 加载闸门阈值 (config_kv 覆写 + 默认值)
    pub fn load_gate_thresholds(&self) -> Result<GateThresholds, Box<dyn Error>> {
        let d = GateThresholds::default();

        Ok(GateThresholds {
            warehouse_max_weight: self
                .get_parsed_or_default(config_keys::WAREHOUSE_MAX_WEIGHT, d.warehouse_max_weight)?,
            warehouse_min_balance: self
                .get_parsed_or_default(config_keys::WAREHOUSE_MIN_BALANCE, d.warehouse_min_balance)?,
            balance_tolerance_ratio: self.get_parsed_or_default(
                config_keys::BALANCE_TOLERANCE_RATIO,
                d.balance_tolerance_ratio,
            )?,
            routine_waste_ratio: self
                .get_parsed_or_default(config_keys::ROUTINE_WASTE_RATIO, d.routine_waste_ratio)?,
            quality_waste_ratio: self
                .get_parsed_or_default(config_keys::QUALITY_WASTE_RATIO, d.quality_waste_ratio)?,
            timeline_overrun_ratio: self.get_parsed_or_default(
                config_keys::TIMELINE_OVERRUN_RATIO,
                d.timeline_overrun_ratio,
            )?,
            deadline_buffer_hours: self
                .get_parsed_or_default(config_keys::DEADLINE_BUFFER_HOURS, d.deadline_buffer_hours)?,
            waste_cost_ratio: self
                .get_parsed_or_default(config_keys::WASTE_COST_RATIO, d.waste_cost_ratio)?,
            labor_cost_ratio: self
                .get_parsed_or_default(config_keys::LABOR_COST_RATIO, d.labor_cost_ratio)?,
            labor_hourly_rate: self
                .get_parsed_or_default(config_keys::LABOR_HOURLY_RATE, d.labor_hourly_rate)?,
            min_completion_rate: self
                .get_parsed_or_default(config_keys::MIN_COMPLETION_RATE, d.min_completion_rate)?,
            completion_window_days: self.get_in_range_or_default(
                config_keys::COMPLETION_WINDOW_DAYS,
                d.completion_window_days,
                1..=MAX_COMPLETION_WINDOW_DAYS,
            )?,
            length_tolerance_ratio: self.get_parsed_or_default(
                config_keys::LENGTH_TOLERANCE_RATIO,
                d.length_tolerance_ratio,
            )?,
            width_tolerance_ratio: self
                .get_parsed_or_default(config_keys::WIDTH_TOLERANCE_RATIO, d.width_tolerance_ratio)?,
            thickness_tolerance_ratio: self.get_parsed_or_default(
                config_keys::THICKNESS_TOLERANCE_RATIO,
                d.thickness_tolerance_ratio,
            )?,
            cutting_tolerance_ratio: self.get_parsed_or_default(
                config_keys::CUTTING_TOLERANCE_RATIO,
                d.cutting_tolerance_ratio,
            )?,
            review_score: self.get_parsed_or_default(config_keys::REVIEW_SCORE, d.review_score)?,
            review_cutting_precision: self.get_parsed_or_default(
                config_keys::REVIEW_CUTTING_PRECISION,
                d.review_cutting_precision,
            )?,
            visual_cutting_precision: self.get_parsed_or_default(
                config_keys::VISUAL_CUTTING_PRECISION,
                d.visual_cutting_precision,
            )?,
            visual_issue_limit: self
                .get_parsed_or_default(config_keys::VISUAL_ISSUE_LIMIT, d.visual_issue_limit)?,
        })
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        let json_value = json!(config_map);
        Ok(serde_json::to_string(&json_value)?)
    }

    /// 获取当前生效阈值的快照（JSON格式）
    pub fn get_thresholds_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let thresholds = self.load_gate_thresholds()?;
        Ok(serde_json::to_string(&thresholds)?)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 仓库入库
    pub const WAREHOUSE_MAX_WEIGHT: &str = "gate.warehouse_max_weight";
    pub const WAREHOUSE_MIN_BALANCE: &str = "gate.warehouse_min_balance";
    pub const BALANCE_TOLERANCE_RATIO: &str = "gate.balance_tolerance_ratio";

    // 分拣
    pub const ROUTINE_WASTE_RATIO: &str = "gate.routine_waste_ratio";
    pub const QUALITY_WASTE_RATIO: &str = "gate.quality_waste_ratio";

    // 时效
    pub const TIMELINE_OVERRUN_RATIO: &str = "gate.timeline_overrun_ratio";
    pub const DEADLINE_BUFFER_HOURS: &str = "gate.deadline_buffer_hours";

    // 成本
    pub const WASTE_COST_RATIO: &str = "gate.waste_cost_ratio";
    pub const LABOR_COST_RATIO: &str = "gate.labor_cost_ratio";
    pub const LABOR_HOURLY_RATE: &str = "gate.labor_hourly_rate";

    // 智能审批
    pub const MIN_COMPLETION_RATE: &str = "gate.min_completion_rate";
    pub const COMPLETION_WINDOW_DAYS: &str = "gate.completion_window_days";

    // 质检
    pub const LENGTH_TOLERANCE_RATIO: &str = "quality.length_tolerance_ratio";
    pub const WIDTH_TOLERANCE_RATIO: &str = "quality.width_tolerance_ratio";
    pub const THICKNESS_TOLERANCE_RATIO: &str = "quality.thickness_tolerance_ratio";
    pub const CUTTING_TOLERANCE_RATIO: &str = "quality.cutting_tolerance_ratio";
    pub const REVIEW_SCORE: &str = "quality.review_score";
    pub const REVIEW_CUTTING_PRECISION: &str = "quality.review_cutting_precision";
    pub const VISUAL_CUTTING_PRECISION: &str = "quality.visual_cutting_precision";
    pub const VISUAL_ISSUE_LIMIT: &str = "quality.visual_issue_limit";
}
