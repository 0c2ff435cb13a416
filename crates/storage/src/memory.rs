use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{CustomerId, LineItemId, OrderId, PricedItem, total_of};
use tokio::sync::RwLock;

use crate::{
    IdempotencyRecord, IdempotencyStore, InsertOutcome, NewIdempotencyRecord, Order,
    OrderLineItem, OrderStatus, OrderStore, Result, StoreError,
};

#[derive(Debug, Default)]
struct OrderState {
    orders: BTreeMap<OrderId, Order>,
    next_order_id: i64,
    next_line_id: i64,
    fail_on_create: bool,
    fail_on_status: Option<OrderStatus>,
    fail_on_get: bool,
}

/// In-memory order store for testing.
///
/// Each operation runs under a single write lock, so order creation is
/// atomic with respect to every reader.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Makes `create_pending` fail.
    pub async fn set_fail_on_create(&self, fail: bool) {
        self.state.write().await.fail_on_create = fail;
    }

    /// Makes `set_status` fail when moving an order to `status`.
    pub async fn set_fail_on_status(&self, status: Option<OrderStatus>) {
        self.state.write().await.fail_on_status = status;
    }

    /// Makes `get_order` fail.
    pub async fn set_fail_on_get(&self, fail: bool) {
        self.state.write().await.fail_on_get = fail;
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_pending(&self, customer_id: CustomerId, items: &[PricedItem]) -> Result<Order> {
        if items.is_empty() {
            return Err(StoreError::EmptyOrder);
        }
        let total_amount = total_of(items)
            .ok_or_else(|| StoreError::InvalidData("order total overflows".to_string()))?;

        let mut state = self.state.write().await;
        if state.fail_on_create {
            return Err(StoreError::Unavailable("order insert rejected".to_string()));
        }

        state.next_order_id += 1;
        let order_id = OrderId::new(state.next_order_id);

        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            state.next_line_id += 1;
            lines.push(OrderLineItem {
                id: LineItemId::new(state.next_line_id),
                order_id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
                status: OrderStatus::Pending,
            });
        }

        let now = Utc::now();
        let order = Order {
            id: order_id,
            customer_id,
            total_amount,
            status: OrderStatus::Pending,
            failure_reason: None,
            items: lines,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(order_id, order.clone());

        Ok(order)
    }

    async fn set_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        failure_reason: Option<&str>,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        if state.fail_on_status == Some(status) {
            return Err(StoreError::Unavailable(format!(
                "status update to {status} rejected"
            )));
        }

        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;

        if !order.status.can_transition_to(status) {
            return Err(StoreError::InvalidStatusTransition {
                order_id,
                from: order.status,
                to: status,
            });
        }

        order.status = status;
        order.failure_reason = failure_reason.map(String::from);
        order.updated_at = Utc::now();
        for line in &mut order.items {
            line.status = status;
        }

        Ok(order.clone())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        if state.fail_on_get {
            return Err(StoreError::Unavailable("order read rejected".to_string()));
        }
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, customer_id: Option<CustomerId>, limit: usize) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .values()
            .rev()
            .filter(|o| customer_id.is_none_or(|c| o.customer_id == c))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct IdempotencyState {
    records: HashMap<String, IdempotencyRecord>,
    fail_on_insert: bool,
    fail_on_finalize: bool,
}

/// In-memory idempotency store for testing.
///
/// The key map is the uniqueness constraint: insert-if-absent is a single
/// critical section on it.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    state: Arc<RwLock<IdempotencyState>>,
}

impl InMemoryIdempotencyStore {
    /// Creates a new empty in-memory idempotency store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records stored.
    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Makes `insert_if_absent` fail.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        self.state.write().await.fail_on_insert = fail;
    }

    /// Makes `finalize` fail.
    pub async fn set_fail_on_finalize(&self, fail: bool) {
        self.state.write().await.fail_on_finalize = fail;
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn insert_if_absent(&self, record: NewIdempotencyRecord) -> Result<InsertOutcome> {
        let mut state = self.state.write().await;
        if state.fail_on_insert {
            return Err(StoreError::Unavailable("idempotency insert rejected".to_string()));
        }

        if let Some(existing) = state.records.get(&record.key) {
            return Ok(InsertOutcome::Exists(existing.clone()));
        }

        let inserted = IdempotencyRecord {
            key: record.key.clone(),
            resource_path: record.resource_path,
            request_hash: record.request_hash,
            response_status: None,
            response_body: None,
            created_at: Utc::now(),
        };
        state.records.insert(record.key, inserted.clone());

        Ok(InsertOutcome::Inserted(inserted))
    }

    async fn finalize(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()> {
        let mut state = self.state.write().await;
        if state.fail_on_finalize {
            return Err(StoreError::Unavailable("idempotency finalize rejected".to_string()));
        }

        let record = state
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;

        if !record.is_in_flight() {
            return Err(StoreError::AlreadyFinalized(key.to_string()));
        }

        record.response_status = Some(status);
        record.response_body = Some(body.clone());
        Ok(())
    }

    async fn get_record(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        Ok(self.state.read().await.records.get(key).cloned())
    }

    async fn reclaim_failed(&self, key: &str, request_hash: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.records.get_mut(key) {
            Some(record) if record.is_failed() => {
                record.response_status = None;
                record.response_body = None;
                record.request_hash = request_hash.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
