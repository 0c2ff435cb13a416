//! Compensation of committed saga steps after a failure.

use std::sync::Arc;

use common::OrderId;
use storage::{OrderStatus, OrderStore};

use crate::error::SagaError;
use crate::services::{InventoryService, ReservationItem};
use crate::steps::{CompletedStep, STEP_CREATE_ORDER, STEP_RESERVE_INVENTORY, StepLog};

/// A compensating action that did not succeed.
///
/// These never reach the client; they are logged, counted, and flag the
/// saga for manual intervention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompensationFailure {
    /// The order could not be moved to `FAILED`.
    MarkFailed { order_id: OrderId, reason: String },
    /// The persisted line items could not be read back for release.
    ReloadItems { order_id: OrderId, reason: String },
    /// The inventory service refused or failed the release.
    Release { order_id: OrderId, reason: String },
    /// The step has no compensating action.
    Irreversible { step: &'static str, order_id: OrderId },
}

impl CompensationFailure {
    /// Returns the step whose compensation failed.
    pub fn step(&self) -> &'static str {
        match self {
            CompensationFailure::MarkFailed { .. } => STEP_CREATE_ORDER,
            CompensationFailure::ReloadItems { .. } | CompensationFailure::Release { .. } => {
                STEP_RESERVE_INVENTORY
            }
            CompensationFailure::Irreversible { step, .. } => *step,
        }
    }
}

impl std::fmt::Display for CompensationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompensationFailure::MarkFailed { order_id, reason } => {
                write!(f, "could not mark order {order_id} failed: {reason}")
            }
            CompensationFailure::ReloadItems { order_id, reason } => {
                write!(f, "could not reload items of order {order_id}: {reason}")
            }
            CompensationFailure::Release { order_id, reason } => {
                write!(f, "could not release stock of order {order_id}: {reason}")
            }
            CompensationFailure::Irreversible { step, order_id } => {
                write!(f, "step {step} of order {order_id} cannot be undone")
            }
        }
    }
}

/// What compensation achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationOutcome {
    pub order_marked_failed: bool,
    pub inventory_released: bool,
    pub failures: Vec<CompensationFailure>,
}

impl CompensationOutcome {
    /// Returns true if any compensating action failed.
    pub fn manual_intervention(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Undoes the committed steps of a failed saga.
#[derive(Clone)]
pub struct CompensationEngine {
    orders: Arc<dyn OrderStore>,
    inventory: Arc<dyn InventoryService>,
}

impl CompensationEngine {
    pub fn new(orders: Arc<dyn OrderStore>, inventory: Arc<dyn InventoryService>) -> Self {
        Self { orders, inventory }
    }

    /// Compensates every step in `log`.
    ///
    /// The order is marked `FAILED` first, then the remaining steps are
    /// undone newest first. Failures are collected, never returned.
    #[tracing::instrument(skip(self, log, error), fields(order_id = ?log.order_id()))]
    pub async fn compensate(&self, log: &StepLog, error: &SagaError) -> CompensationOutcome {
        let mut outcome = CompensationOutcome::default();

        if let Some(order_id) = log.order_id() {
            match self
                .orders
                .set_status(order_id, OrderStatus::Failed, Some(&error.to_string()))
                .await
            {
                Ok(_) => outcome.order_marked_failed = true,
                Err(e) => record(
                    &mut outcome,
                    CompensationFailure::MarkFailed {
                        order_id,
                        reason: e.to_string(),
                    },
                ),
            }
        }

        for step in log.newest_first() {
            if !step.is_reversible() {
                tracing::error!(?step, "committed step cannot be undone");
                record(
                    &mut outcome,
                    CompensationFailure::Irreversible {
                        step: step.name(),
                        order_id: step.order_id(),
                    },
                );
                continue;
            }

            // The order itself was already marked FAILED above.
            if let CompletedStep::InventoryReserved { order_id } = step {
                match self.release_inventory(*order_id).await {
                    Ok(()) => outcome.inventory_released = true,
                    Err(failure) => record(&mut outcome, failure),
                }
            }
        }

        outcome
    }

    /// Releases exactly the line items persisted for the order.
    async fn release_inventory(&self, order_id: OrderId) -> Result<(), CompensationFailure> {
        let order = self
            .orders
            .get_order(order_id)
            .await
            .map_err(|e| CompensationFailure::ReloadItems {
                order_id,
                reason: e.to_string(),
            })?
            .ok_or_else(|| CompensationFailure::ReloadItems {
                order_id,
                reason: "order not found".to_string(),
            })?;

        let items: Vec<ReservationItem> = order
            .priced_items()
            .iter()
            .map(ReservationItem::from)
            .collect();

        self.inventory
            .release(order_id, &items)
            .await
            .map_err(|e| CompensationFailure::Release {
                order_id,
                reason: e.to_string(),
            })
    }
}

fn record(outcome: &mut CompensationOutcome, failure: CompensationFailure) {
    tracing::error!(
        step = failure.step(),
        error = %failure,
        manual_intervention = true,
        "compensation step failed"
    );
    metrics::counter!("compensation_failures_total", "step" => failure.step()).increment(1);
    outcome.failures.push(failure);
}
