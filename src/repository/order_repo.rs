// ==========================================
// 纸卷加工阶段流程系统 - 订单数据仓储
// ==========================================
// 对齐: production_order 表
// 说明: 订单由外部业务流程创建, 流程核心只更新 current_stage
// ==========================================

use crate::db::{format_ts, parse_json_column, parse_opt_ts, parse_ts};
use crate::domain::order::{DeliverySpec, Order, PricingSnapshot, SelectedMaterial};
use crate::domain::types::OrderPriority;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    order_id, order_no, priority, delivery_spec_json, selected_materials_json,
    final_price, estimated_material_cost, delivery_deadline, current_stage, created_at
"#;

pub struct OrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 插入订单
    pub fn insert(&self, order: &Order) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO production_order (
                order_id, order_no, priority, delivery_spec_json, selected_materials_json,
                final_price, estimated_material_cost, delivery_deadline, current_stage, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                order.order_id,
                order.order_no,
                order.priority.to_db_str(),
                serde_json::to_string(&order.spec)?,
                serde_json::to_string(&order.selected_materials)?,
                order.pricing.final_price,
                order.pricing.estimated_material_cost,
                order.delivery_deadline.as_ref().map(format_ts),
                order.current_stage,
                format_ts(&order.created_at),
            ],
        )?;
        Ok(())
    }

    /// 按ID查询
    pub fn find_by_id(&self, order_id: &str) -> RepositoryResult<Option<Order>> {
        let conn = self.get_conn()?;
        Self::find_by_id_in_tx(&conn, order_id)
    }

    /// 按ID查询 (在调用方持有的连接/事务内)
    pub fn find_by_id_in_tx(conn: &Connection, order_id: &str) -> RepositoryResult<Option<Order>> {
        let sql = format!("SELECT {} FROM production_order WHERE order_id = ?1", SELECT_COLUMNS);
        let order = conn
            .query_row(&sql, params![order_id], Self::map_row)
            .optional()?;
        Ok(order)
    }

    /// 查询全部订单 (按创建时间)
    pub fn list_all(&self) -> RepositoryResult<Vec<Order>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM production_order ORDER BY created_at, order_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let orders = stmt
            .query_map([], Self::map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    /// 更新当前阶段标签 (在调用方事务内)
    pub fn update_current_stage_in_tx(
        conn: &Connection,
        order_id: &str,
        label: Option<&str>,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE production_order SET current_stage = ?1 WHERE order_id = ?2",
            params![label, order_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "Order".to_string(),
                id: order_id.to_string(),
            });
        }
        Ok(())
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<Order> {
        let spec: DeliverySpec = parse_json_column(3, row.get(3)?)?.unwrap_or_default();
        let selected_materials: Vec<SelectedMaterial> =
            parse_json_column(4, row.get(4)?)?.unwrap_or_default();

        Ok(Order {
            order_id: row.get(0)?,
            order_no: row.get(1)?,
            priority: OrderPriority::from_str(&row.get::<_, String>(2)?),
            spec,
            selected_materials,
            pricing: PricingSnapshot {
                final_price: row.get(5)?,
                estimated_material_cost: row.get(6)?,
            },
            delivery_deadline: parse_opt_ts(7, row.get(7)?)?,
            current_stage: row.get(8)?,
            created_at: parse_ts(9, &row.get::<_, String>(9)?)?,
        })
    }
}
