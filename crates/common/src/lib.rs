//! Shared value types used across the order saga workspace.

pub mod items;
pub mod money;
pub mod types;

pub use items::{PricedItem, RequestedItem, total_of};
pub use money::Money;
pub use types::{CustomerId, LineItemId, OrderId, ProductId};
