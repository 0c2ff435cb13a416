use async_trait::async_trait;
use common::{CustomerId, OrderId, PricedItem};

use crate::Result;
use crate::models::{Order, OrderStatus};

/// Persistence for orders and their line items.
///
/// Implementations must create an order and all of its line items in one
/// atomic write; no reader may ever observe an order with a partial item set.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates an order in `PENDING` together with its line items.
    ///
    /// The total amount is computed from `items`; line prices are stored
    /// exactly as given.
    async fn create_pending(&self, customer_id: CustomerId, items: &[PricedItem]) -> Result<Order>;

    /// Moves an order (and its line items) to `status`.
    ///
    /// Fails with `InvalidStatusTransition` unless the order is `PENDING`.
    async fn set_status(
        &self,
        order_id: OrderId,
        status: OrderStatus,
        failure_reason: Option<&str>,
    ) -> Result<Order>;

    /// Loads an order with its line items.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists orders newest first, optionally for a single customer.
    async fn list_orders(&self, customer_id: Option<CustomerId>, limit: usize) -> Result<Vec<Order>>;
}
