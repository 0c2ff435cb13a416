//! Payment service trait, HTTP client and in-memory implementation.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{CustomerId, Money, OrderId};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{endpoint, http_client};
use crate::error::SagaError;

/// Upper bound on a single charge call.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a successful payment charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// The payment reference assigned by the payment service.
    pub payment_ref: String,
}

/// Trait for payment processing operations.
///
/// There is deliberately no refund operation: a successful charge is never
/// undone by the saga.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges a customer for an order.
    async fn charge(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<PaymentReceipt, SagaError>;
}

#[derive(Debug, Serialize)]
struct ChargeRequest {
    order_id: OrderId,
    user_id: CustomerId,
    amount: Money,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    status: String,
    payment_id: Option<String>,
}

/// Payment client: `POST {base_url}/charge`.
#[derive(Debug, Clone)]
pub struct HttpPaymentService {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpPaymentService {
    /// Creates a payment client whose charges give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    #[tracing::instrument(skip(self))]
    async fn charge(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<PaymentReceipt, SagaError> {
        let request = ChargeRequest {
            order_id,
            user_id: customer_id,
            amount,
        };

        let response = self
            .client
            .post(endpoint(&self.base_url, "charge"))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SagaError::PaymentFailed(format!(
                        "no answer within {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    SagaError::PaymentFailed(format!("payment service unreachable: {e}"))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SagaError::PaymentFailed(format!(
                "payment service answered HTTP {status}: {detail}"
            )));
        }

        let body: ChargeResponse = response
            .json()
            .await
            .map_err(|e| SagaError::PaymentFailed(format!("malformed payment response: {e}")))?;

        match (body.status.as_str(), body.payment_id) {
            ("SUCCESS", Some(payment_ref)) => Ok(PaymentReceipt { payment_ref }),
            ("SUCCESS", None) => Err(SagaError::PaymentFailed(
                "payment succeeded without a payment id".to_string(),
            )),
            (status, _) => Err(SagaError::PaymentFailed(format!(
                "payment status {status}"
            ))),
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: Vec<(OrderId, CustomerId, Money, String)>,
    attempts: usize,
    next_id: u32,
    fail_on_charge: bool,
    delay: Option<Duration>,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to fail on charge calls.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Makes every charge wait before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().delay = delay;
    }

    /// Returns the number of successful charges.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().charges.len()
    }

    /// Returns the number of charge calls received, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.state.read().unwrap().attempts
    }

    /// Returns the amount charged for an order, if any.
    pub fn charged_amount(&self, order_id: OrderId) -> Option<Money> {
        self.state
            .read()
            .unwrap()
            .charges
            .iter()
            .find(|(id, ..)| *id == order_id)
            .map(|(_, _, amount, _)| *amount)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Money,
    ) -> Result<PaymentReceipt, SagaError> {
        let delay = self.state.read().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().unwrap();
        state.attempts += 1;

        if state.fail_on_charge {
            return Err(SagaError::PaymentFailed("Payment declined".to_string()));
        }

        state.next_id += 1;
        let payment_ref = format!("PAY-{:04}", state.next_id);
        state
            .charges
            .push((order_id, customer_id, amount, payment_ref.clone()));

        Ok(PaymentReceipt { payment_ref })
    }
}
