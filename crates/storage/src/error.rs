use common::OrderId;
use thiserror::Error;

use crate::models::OrderStatus;

/// Errors that can occur when interacting with a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The requested status change is not a legal order transition.
    #[error("Invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidStatusTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// An order must carry at least one line item.
    #[error("Order must contain at least one line item")]
    EmptyOrder,

    /// No idempotency record exists for the key.
    #[error("Idempotency key not found: {0}")]
    KeyNotFound(String),

    /// The idempotency record already holds a final response.
    #[error("Idempotency key already finalized: {0}")]
    AlreadyFinalized(String),

    /// A value could not be stored or was read back malformed.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The backing store refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
