//! Pricing service trait, catalog HTTP client and in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, PricedItem, ProductId, RequestedItem, total_of};
use reqwest::Client;
use serde::Deserialize;

use super::http_client;
use crate::error::SagaError;

/// Trait for turning client product references into server-priced items.
#[async_trait]
pub trait PricingService: Send + Sync {
    /// Prices every requested item, preserving order and quantities.
    ///
    /// Fails with `PricingUnavailable` if any product cannot be priced.
    async fn verify(&self, items: &[RequestedItem]) -> Result<Vec<PricedItem>, SagaError>;
}

/// Applies catalog prices to requested items.
fn apply_prices(
    items: &[RequestedItem],
    prices: &HashMap<ProductId, Money>,
) -> Result<Vec<PricedItem>, SagaError> {
    let priced = items
        .iter()
        .map(|item| {
            let price = prices.get(&item.product_id).ok_or_else(|| {
                SagaError::PricingUnavailable(format!(
                    "catalog returned no price for product {}",
                    item.product_id
                ))
            })?;
            if price.is_negative() {
                return Err(SagaError::PricingUnavailable(format!(
                    "catalog returned negative price {price} for product {}",
                    item.product_id
                )));
            }
            Ok(PricedItem::new(item.product_id, item.quantity, *price))
        })
        .collect::<Result<Vec<_>, SagaError>>()?;

    if total_of(&priced).is_none() {
        return Err(SagaError::PricingUnavailable(
            "catalog prices overflow the order total".to_string(),
        ));
    }
    Ok(priced)
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    items: Vec<CatalogItem>,
}

#[derive(Debug, Deserialize)]
struct CatalogItem {
    product_id: ProductId,
    price: Money,
}

/// Catalog client: `GET {base_url}?productIds=1,2,3`.
#[derive(Debug, Clone)]
pub struct HttpPricingService {
    client: Client,
    base_url: String,
}

impl HttpPricingService {
    /// Creates a catalog client whose calls give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PricingService for HttpPricingService {
    #[tracing::instrument(skip(self, items), fields(item_count = items.len()))]
    async fn verify(&self, items: &[RequestedItem]) -> Result<Vec<PricedItem>, SagaError> {
        let ids: BTreeSet<ProductId> = items.iter().map(|i| i.product_id).collect();
        let query = ids
            .iter()
            .map(ProductId::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("productIds", query)])
            .send()
            .await
            .map_err(|e| SagaError::PricingUnavailable(format!("catalog unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(SagaError::PricingUnavailable(format!(
                "catalog answered HTTP {}",
                response.status()
            )));
        }

        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| SagaError::PricingUnavailable(format!("malformed catalog response: {e}")))?;

        let prices: HashMap<ProductId, Money> = body
            .items
            .into_iter()
            .map(|item| (item.product_id, item.price))
            .collect();

        apply_prices(items, &prices)
    }
}

#[derive(Debug, Default)]
struct InMemoryPricingState {
    prices: HashMap<ProductId, Money>,
    fail_on_verify: bool,
    calls: usize,
}

/// In-memory catalog for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPricingService {
    state: Arc<RwLock<InMemoryPricingState>>,
}

impl InMemoryPricingService {
    /// Creates a new in-memory catalog with no products.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the catalog price of a product.
    pub fn set_price(&self, product_id: ProductId, price: Money) {
        self.state.write().unwrap().prices.insert(product_id, price);
    }

    /// Configures the service to fail on verify calls.
    pub fn set_fail_on_verify(&self, fail: bool) {
        self.state.write().unwrap().fail_on_verify = fail;
    }

    /// Returns the number of verify calls received.
    pub fn call_count(&self) -> usize {
        self.state.read().unwrap().calls
    }
}

#[async_trait]
impl PricingService for InMemoryPricingService {
    async fn verify(&self, items: &[RequestedItem]) -> Result<Vec<PricedItem>, SagaError> {
        let mut state = self.state.write().unwrap();
        state.calls += 1;

        if state.fail_on_verify {
            return Err(SagaError::PricingUnavailable(
                "catalog unavailable".to_string(),
            ));
        }

        apply_prices(items, &state.prices)
    }
}
