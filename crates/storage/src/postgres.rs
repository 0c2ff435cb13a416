use std::collections::HashMap;

use async_trait::async_trait;
use common::{CustomerId, LineItemId, Money, OrderId, PricedItem, ProductId, total_of};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};

use crate::{
    IdempotencyRecord, IdempotencyStore, InsertOutcome, NewIdempotencyRecord, Order,
    OrderLineItem, OrderStatus, OrderStore, Result, StoreError,
};

const ORDER_COLUMNS: &str =
    "id, customer_id, total_amount, status, failure_reason, created_at, updated_at";
const LINE_COLUMNS: &str = "id, order_id, product_id, quantity, unit_price, status";
const RECORD_COLUMNS: &str =
    "key, resource_path, request_hash, response_status, response_body, created_at";

/// PostgreSQL-backed order and idempotency store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: &PgRow, items: Vec<OrderLineItem>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        let total: Decimal = row.try_get("total_amount")?;

        Ok(Order {
            id: OrderId::new(row.try_get("id")?),
            customer_id: CustomerId::new(row.try_get("customer_id")?),
            total_amount: Money::new(total),
            status: status.parse()?,
            failure_reason: row.try_get("failure_reason")?,
            items,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line(row: &PgRow) -> Result<OrderLineItem> {
        let status: String = row.try_get("status")?;
        let quantity: i32 = row.try_get("quantity")?;
        let unit_price: Decimal = row.try_get("unit_price")?;

        Ok(OrderLineItem {
            id: LineItemId::new(row.try_get("id")?),
            order_id: OrderId::new(row.try_get("order_id")?),
            product_id: ProductId::new(row.try_get("product_id")?),
            quantity: u32::try_from(quantity)
                .map_err(|_| StoreError::InvalidData(format!("negative quantity {quantity}")))?,
            unit_price: Money::new(unit_price),
            status: status.parse()?,
        })
    }

    fn row_to_record(row: &PgRow) -> Result<IdempotencyRecord> {
        let status: Option<i32> = row.try_get("response_status")?;
        let response_status = status
            .map(|s| {
                u16::try_from(s)
                    .map_err(|_| StoreError::InvalidData(format!("response status {s} out of range")))
            })
            .transpose()?;

        Ok(IdempotencyRecord {
            key: row.try_get("key")?,
            resource_path: row.try_get("resource_path")?,
            request_hash: row.try_get("request_hash")?,
            response_status,
            response_body: row.try_get("response_body")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Loads orders by id together with their line items, preserving `ids` order.
    async fn load_orders(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<Order>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let order_rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

        let line_rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_line_items WHERE order_id = ANY($1) ORDER BY id ASC"
        ))
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

        let mut lines: HashMap<OrderId, Vec<OrderLineItem>> = HashMap::new();
        for row in &line_rows {
            let line = Self::row_to_line(row)?;
            lines.entry(line.order_id).or_default().push(line);
        }

        let mut by_id: HashMap<OrderId, Order> = HashMap::new();
        for row in &order_rows {
            let id = OrderId::new(row.try_get("id")?);
            let items = lines.remove(&id).unwrap_or_default();
            by_id.insert(id, Self::row_to_order(row, items)?);
        }

        Ok(ids
            .iter()
            .filter_map(|id| by_id.remove(&OrderId::new(*id)))
            .collect())
    }

    async fn load_order(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<Order>> {
        let mut orders = Self::load_orders(conn, &[order_id.as_i64()]).await?;
        Ok(orders.pop())
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn create_pending(&self, customer_id: CustomerId, items: &[PricedItem]) -> Result<Order> {
        if items.is_empty() {
            return Err(StoreError::EmptyOrder);
        }
        let total_amount = total_of(items)
            .ok_or_else(|| StoreError::InvalidData("order total overflows".to_string()))?;

        let mut tx = self.pool.begin().await?;

        let order_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (customer_id, total_amount, status)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(customer_id.as_i64())
        .bind(total_amount.amount())
        .bind(OrderStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;

        for item in items {
            let quantity = i32::try_from(item.quantity)
                .map_err(|_| StoreError::InvalidData(format!("quantity {} too large", item.quantity)))?;

            sqlx::query(
                r#"
                INSERT INTO order_line_items (order_id, product_id, quantity, unit_price, status)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(order_id)
            .bind(item.product_id.as_i64())
            .bind(quantity)
            .bind(item.unit_price.amount())
            .bind(OrderStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }

        let order = Self::load_order(&mut tx, OrderId::new(order_id))
            .await?
            .ok_or(StoreError::OrderNotFound(OrderId::new(order_id)))?;

        tx.commit().await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self, failure_reason))]
    async fn set_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        failure_reason: Option<&str>,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.as_i64())
                .fetch_optional(&mut *tx)
                .await?;

        let current: OrderStatus = current
            .ok_or(StoreError::OrderNotFound(order_id))?
            .parse()?;

        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidStatusTransition {
                order_id,
                from: current,
                to: status,
            });
        }

        sqlx::query(
            "UPDATE orders SET status = $2, failure_reason = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(order_id.as_i64())
        .bind(status.as_str())
        .bind(failure_reason)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE order_line_items SET status = $2 WHERE order_id = $1")
            .bind(order_id.as_i64())
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;

        let order = Self::load_order(&mut tx, order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))?;

        tx.commit().await?;
        Ok(order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_order(&mut conn, order_id).await
    }

    async fn list_orders(&self, customer_id: Option<CustomerId>, limit: usize) -> Result<Vec<Order>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut conn = self.pool.acquire().await?;

        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM orders
            WHERE ($1::BIGINT IS NULL OR customer_id = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(customer_id.map(|c| c.as_i64()))
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Self::load_orders(&mut conn, &ids).await
    }
}

#[async_trait]
impl IdempotencyStore for PostgresStore {
    async fn insert_if_absent(&self, record: NewIdempotencyRecord) -> Result<InsertOutcome> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO idempotency_records (key, resource_path, request_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (key) DO NOTHING
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&record.key)
        .bind(&record.resource_path)
        .bind(&record.request_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(Self::row_to_record(&row)?));
        }

        tracing::debug!(key = %record.key, "idempotency key already recorded");
        // Records are never deleted, so the conflicting row is still there.
        let existing = self
            .get_record(&record.key)
            .await?
            .ok_or_else(|| StoreError::KeyNotFound(record.key.clone()))?;
        Ok(InsertOutcome::Exists(existing))
    }

    async fn finalize(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET response_status = $2, response_body = $3
            WHERE key = $1 AND response_status IS NULL
            "#,
        )
        .bind(key)
        .bind(i32::from(status))
        .bind(body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_record(key).await? {
            Some(_) => Err(StoreError::AlreadyFinalized(key.to_string())),
            None => Err(StoreError::KeyNotFound(key.to_string())),
        }
    }

    async fn get_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM idempotency_records WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn reclaim_failed(&self, key: &str, request_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE idempotency_records
            SET response_status = NULL, response_body = NULL, request_hash = $2
            WHERE key = $1 AND response_status >= 400
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
