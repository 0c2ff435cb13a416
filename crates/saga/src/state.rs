//! Saga state machine.

use serde::{Deserialize, Serialize};

/// The state of an order-creation saga.
///
/// State transitions:
/// ```text
/// Pricing ──► Persisting ──► Reserving ──► Charging ──► Approving ──► Approved
///
/// Pricing | Persisting                            ──► Rejected
/// Persisting | Reserving | Charging | Approving   ──► Compensating ──► Failed
/// Approving                                       ──► Stalled
/// ```
///
/// `Rejected` ends a saga that failed before any durable effect existed.
/// `Stalled` ends a saga whose payment succeeded but whose final status
/// write failed; it is left for manual reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Verifying prices with the catalog.
    #[default]
    Pricing,

    /// Writing the `PENDING` order and its line items.
    Persisting,

    /// Reserving stock.
    Reserving,

    /// Charging the customer.
    Charging,

    /// Writing the `APPROVED` status.
    Approving,

    /// All steps completed successfully (terminal state).
    Approved,

    /// Undoing committed steps after a failure.
    Compensating,

    /// Compensation finished after a failure (terminal state).
    Failed,

    /// Failed before any durable effect (terminal state).
    Rejected,

    /// Paid but not approved; needs manual reconciliation (terminal state).
    Stalled,
}

impl SagaState {
    /// Returns true if the saga may move from `self` to `next`.
    pub fn can_transition_to(&self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (*self, next),
            (Pricing, Persisting)
                | (Persisting, Reserving)
                | (Reserving, Charging)
                | (Charging, Approving)
                | (Approving, Approved)
                | (Pricing | Persisting, Rejected)
                | (Persisting | Reserving | Charging | Approving, Compensating)
                | (Approving, Stalled)
                | (Compensating, Failed)
        )
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Approved | SagaState::Failed | SagaState::Rejected | SagaState::Stalled
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Pricing => "Pricing",
            SagaState::Persisting => "Persisting",
            SagaState::Reserving => "Reserving",
            SagaState::Charging => "Charging",
            SagaState::Approving => "Approving",
            SagaState::Approved => "Approved",
            SagaState::Compensating => "Compensating",
            SagaState::Failed => "Failed",
            SagaState::Rejected => "Rejected",
            SagaState::Stalled => "Stalled",
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
