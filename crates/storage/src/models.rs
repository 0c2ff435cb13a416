//! Persisted record shapes.

use chrono::{DateTime, Utc};
use common::{CustomerId, LineItemId, Money, OrderId, PricedItem, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Status of an order and, mirrored, of each of its line items.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Approved
///           └──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created by the saga, awaiting reservation and payment.
    #[default]
    Pending,

    /// Payment succeeded (terminal state).
    Approved,

    /// Compensated after a failure (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if an order may move from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (*self, next),
            (OrderStatus::Pending, OrderStatus::Approved) | (OrderStatus::Pending, OrderStatus::Failed)
        )
    }

    /// Returns the status as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Approved => "APPROVED",
            OrderStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "APPROVED" => Ok(OrderStatus::Approved),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(StoreError::InvalidData(format!("unknown order status '{other}'"))),
        }
    }
}

/// A persisted line item. Fixed once its order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub id: LineItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub status: OrderStatus,
}

impl OrderLineItem {
    /// Returns the line as a priced item.
    pub fn priced(&self) -> PricedItem {
        PricedItem::new(self.product_id, self.quantity, self.unit_price)
    }
}

/// A persisted order with its full line item set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub items: Vec<OrderLineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Returns the persisted line items as priced items, in creation order.
    pub fn priced_items(&self) -> Vec<PricedItem> {
        self.items.iter().map(OrderLineItem::priced).collect()
    }
}

/// Fields supplied when a key is first accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIdempotencyRecord {
    pub key: String,
    pub resource_path: String,
    pub request_hash: String,
}

impl NewIdempotencyRecord {
    pub fn new(
        key: impl Into<String>,
        resource_path: impl Into<String>,
        request_hash: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            resource_path: resource_path.into(),
            request_hash: request_hash.into(),
        }
    }
}

/// One record per client idempotency key.
///
/// A `None` response status means a request owning the key is still
/// running, or crashed before finalizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub resource_path: String,
    pub request_hash: String,
    pub response_status: Option<u16>,
    pub response_body: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Returns true if no final response has been recorded.
    pub fn is_in_flight(&self) -> bool {
        self.response_status.is_none()
    }

    /// Returns true if the stored response is a success or redirect.
    pub fn is_replayable(&self) -> bool {
        matches!(self.response_status, Some(status) if (200..400).contains(&status))
    }

    /// Returns true if the stored response is an error.
    pub fn is_failed(&self) -> bool {
        matches!(self.response_status, Some(status) if status >= 400)
    }
}
