//! Inventory service trait, HTTP client and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, PricedItem, ProductId};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{endpoint, http_client};
use crate::error::SagaError;

/// An item to reserve or release in inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    /// The product to reserve.
    pub product_id: ProductId,
    /// Quantity to reserve.
    pub quantity: u32,
}

impl From<&PricedItem> for ReservationItem {
    fn from(item: &PricedItem) -> Self {
        Self {
            product_id: item.product_id,
            quantity: item.quantity,
        }
    }
}

/// Trait for inventory management operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves stock for the given order items.
    async fn reserve(&self, order_id: OrderId, items: &[ReservationItem]) -> Result<(), SagaError>;

    /// Releases stock previously reserved for an order.
    async fn release(&self, order_id: OrderId, items: &[ReservationItem]) -> Result<(), SagaError>;
}

/// Body of both reserve and release calls.
#[derive(Debug, Serialize)]
struct StockRequest<'a> {
    order_id: OrderId,
    items: &'a [ReservationItem],
}

/// Inventory client: `POST {base_url}/reserve` and `POST {base_url}/release`.
#[derive(Debug, Clone)]
pub struct HttpInventoryService {
    client: Client,
    base_url: String,
}

impl HttpInventoryService {
    /// Creates an inventory client whose calls give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    async fn post(
        &self,
        path: &str,
        order_id: OrderId,
        items: &[ReservationItem],
    ) -> Result<(), SagaError> {
        let response = self
            .client
            .post(endpoint(&self.base_url, path))
            .json(&StockRequest { order_id, items })
            .send()
            .await
            .map_err(|e| SagaError::InventoryUnavailable(format!("{path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SagaError::InventoryUnavailable(format!(
                "{path} answered HTTP {status}: {detail}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl InventoryService for HttpInventoryService {
    #[tracing::instrument(skip(self, items))]
    async fn reserve(&self, order_id: OrderId, items: &[ReservationItem]) -> Result<(), SagaError> {
        self.post("reserve", order_id, items).await
    }

    #[tracing::instrument(skip(self, items))]
    async fn release(&self, order_id: OrderId, items: &[ReservationItem]) -> Result<(), SagaError> {
        self.post("release", order_id, items).await
    }
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    reservations: HashMap<OrderId, Vec<ReservationItem>>,
    releases: Vec<(OrderId, Vec<ReservationItem>)>,
    reserve_calls: usize,
    fail_on_reserve: bool,
    fail_on_release: bool,
}

/// In-memory inventory service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InMemoryInventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on reserve calls.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reserve = fail;
    }

    /// Configures the service to fail on release calls.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.state.write().unwrap().fail_on_release = fail;
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    /// Returns the items currently reserved for an order.
    pub fn reserved_items(&self, order_id: OrderId) -> Option<Vec<ReservationItem>> {
        self.state.read().unwrap().reservations.get(&order_id).cloned()
    }

    /// Returns every release call received, in order.
    pub fn releases(&self) -> Vec<(OrderId, Vec<ReservationItem>)> {
        self.state.read().unwrap().releases.clone()
    }

    /// Returns the number of reserve calls received.
    pub fn reserve_calls(&self) -> usize {
        self.state.read().unwrap().reserve_calls
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(&self, order_id: OrderId, items: &[ReservationItem]) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap();
        state.reserve_calls += 1;

        if state.fail_on_reserve {
            return Err(SagaError::InventoryUnavailable(
                "Insufficient stock".to_string(),
            ));
        }

        state.reservations.insert(order_id, items.to_vec());
        Ok(())
    }

    async fn release(&self, order_id: OrderId, items: &[ReservationItem]) -> Result<(), SagaError> {
        let mut state = self.state.write().unwrap();
        state.releases.push((order_id, items.to_vec()));

        if state.fail_on_release {
            return Err(SagaError::InventoryUnavailable(
                "Release rejected".to_string(),
            ));
        }

        state.reservations.remove(&order_id);
        Ok(())
    }
}
