//! Saga error types.

use common::OrderId;
use storage::StoreError;
use thiserror::Error;

use crate::state::SagaState;

/// Errors that can end a saga.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The catalog could not price the requested items.
    #[error("Pricing unavailable: {0}")]
    PricingUnavailable(String),

    /// The local order store failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// The inventory service could not reserve or release stock.
    #[error("Inventory unavailable: {0}")]
    InventoryUnavailable(String),

    /// The payment service declined, failed, or timed out.
    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    /// Payment succeeded but the order could not be marked approved.
    #[error("Order {order_id} was charged ({payment_ref}) but could not be approved: {source}")]
    ApprovalFailed {
        order_id: OrderId,
        payment_ref: String,
        #[source]
        source: StoreError,
    },

    /// The saga attempted an illegal state transition.
    #[error("Invalid saga transition: {from} -> {to}")]
    InvalidState { from: SagaState, to: SagaState },
}

impl SagaError {
    /// Returns a stable, machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::PricingUnavailable(_) => "PRICING_UNAVAILABLE",
            SagaError::Persistence(_) => "PERSISTENCE_ERROR",
            SagaError::InventoryUnavailable(_) => "INVENTORY_UNAVAILABLE",
            SagaError::PaymentFailed(_) => "PAYMENT_FAILED",
            SagaError::ApprovalFailed { .. } => "APPROVAL_FAILED",
            SagaError::InvalidState { .. } => "INVALID_SAGA_STATE",
        }
    }
}

/// The terminal failure of a saga run, with the context needed for
/// manual reconciliation.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct SagaFailure {
    /// The error that ended the saga. Never a compensation error.
    #[source]
    pub error: SagaError,
    /// The order, if one was created before the failure.
    pub order_id: Option<OrderId>,
    /// The terminal state the saga ended in.
    pub state: SagaState,
    /// True if an operator has to reconcile the outcome by hand.
    pub manual_intervention: bool,
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            SagaError::PricingUnavailable("x".into()).code(),
            "PRICING_UNAVAILABLE"
        );
        assert_eq!(
            SagaError::Persistence(StoreError::EmptyOrder).code(),
            "PERSISTENCE_ERROR"
        );
        assert_eq!(
            SagaError::InventoryUnavailable("x".into()).code(),
            "INVENTORY_UNAVAILABLE"
        );
        assert_eq!(SagaError::PaymentFailed("x".into()).code(), "PAYMENT_FAILED");
    }

    #[test]
    fn test_failure_displays_original_error() {
        let failure = SagaFailure {
            error: SagaError::PaymentFailed("card declined".into()),
            order_id: Some(OrderId::new(5)),
            state: SagaState::Failed,
            manual_intervention: false,
        };
        assert_eq!(failure.to_string(), "Payment failed: card declined");
    }
}
