//! Persistence for orders and idempotency records.
//!
//! Two store abstractions live here:
//! - [`OrderStore`] owns orders and their line items
//! - [`IdempotencyStore`] owns one record per client idempotency key
//!
//! Both come with an in-memory implementation for tests and a PostgreSQL
//! implementation backed by `sqlx`.

pub mod error;
pub mod idempotency;
pub mod memory;
pub mod models;
pub mod orders;
pub mod postgres;

pub use error::{Result, StoreError};
pub use idempotency::{IdempotencyStore, InsertOutcome};
pub use memory::{InMemoryIdempotencyStore, InMemoryOrderStore};
pub use models::{IdempotencyRecord, NewIdempotencyRecord, Order, OrderLineItem, OrderStatus};
pub use orders::OrderStore;
pub use postgres::PostgresStore;
