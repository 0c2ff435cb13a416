//! Ordered log of the durable effects a saga has committed.

use common::OrderId;
use serde::{Deserialize, Serialize};

/// Step name: the `PENDING` order and its lines were written.
pub const STEP_CREATE_ORDER: &str = "create_order";

/// Step name: stock was reserved for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: the customer was charged.
pub const STEP_CHARGE_PAYMENT: &str = "charge_payment";

/// A committed saga step and the context needed to undo it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CompletedStep {
    OrderCreated { order_id: OrderId },
    InventoryReserved { order_id: OrderId },
    PaymentCharged { order_id: OrderId, payment_ref: String },
}

impl CompletedStep {
    /// Returns the step name.
    pub fn name(&self) -> &'static str {
        match self {
            CompletedStep::OrderCreated { .. } => STEP_CREATE_ORDER,
            CompletedStep::InventoryReserved { .. } => STEP_RESERVE_INVENTORY,
            CompletedStep::PaymentCharged { .. } => STEP_CHARGE_PAYMENT,
        }
    }

    /// Returns the order the step belongs to.
    pub fn order_id(&self) -> OrderId {
        match self {
            CompletedStep::OrderCreated { order_id }
            | CompletedStep::InventoryReserved { order_id }
            | CompletedStep::PaymentCharged { order_id, .. } => *order_id,
        }
    }

    /// Returns true if a compensating action exists for this step.
    ///
    /// Payments have no refund call, so a charge cannot be undone.
    pub fn is_reversible(&self) -> bool {
        !matches!(self, CompletedStep::PaymentCharged { .. })
    }
}

/// Steps committed so far, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    steps: Vec<CompletedStep>,
}

impl StepLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a committed step.
    pub fn record(&mut self, step: CompletedStep) {
        self.steps.push(step);
    }

    /// Returns the committed steps, newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &CompletedStep> {
        self.steps.iter().rev()
    }

    /// Returns the names of the committed steps, oldest first.
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(CompletedStep::name).collect()
    }

    /// Returns the created order, if the order step committed.
    pub fn order_id(&self) -> Option<OrderId> {
        self.steps.iter().find_map(|step| match step {
            CompletedStep::OrderCreated { order_id } => Some(*order_id),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
