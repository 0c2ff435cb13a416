//! Orchestrator driving the order-creation saga.

use std::sync::Arc;
use std::time::Instant;

use common::{CustomerId, RequestedItem};
use storage::{Order, OrderStatus, OrderStore};

use crate::compensation::CompensationEngine;
use crate::error::{SagaError, SagaFailure};
use crate::services::{InventoryService, PaymentService, PricingService, ReservationItem};
use crate::state::SagaState;
use crate::steps::{
    CompletedStep, STEP_CHARGE_PAYMENT, STEP_CREATE_ORDER, STEP_RESERVE_INVENTORY, StepLog,
};

/// Step name used in logs for the price check. It commits nothing.
const STEP_VERIFY_PRICES: &str = "verify_prices";

/// Step name used in logs for the final status write.
const STEP_APPROVE_ORDER: &str = "approve_order";

/// Command to create an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrder {
    pub customer_id: CustomerId,
    pub items: Vec<RequestedItem>,
}

impl CreateOrder {
    pub fn new(customer_id: CustomerId, items: Vec<RequestedItem>) -> Self {
        Self { customer_id, items }
    }
}

/// Progress of a single saga execution.
#[derive(Debug, Default)]
struct SagaRun {
    state: SagaState,
    log: StepLog,
}

impl SagaRun {
    fn enter(&mut self, next: SagaState) -> Result<(), SagaError> {
        if !self.state.can_transition_to(next) {
            return Err(SagaError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "saga transition");
        self.state = next;
        Ok(())
    }

    /// Moves to a terminal state even if the transition is not expected.
    fn settle(&mut self, terminal: SagaState) {
        debug_assert!(terminal.is_terminal(), "{terminal} is not a terminal state");
        if let Err(e) = self.enter(terminal) {
            tracing::error!(error = %e, "saga settled through an unexpected transition");
            self.state = terminal;
        }
    }
}

/// Runs the order-creation saga: price, persist, reserve, charge, approve.
///
/// Steps run strictly in sequence. A failure after the order exists is
/// compensated, and the caller always receives the error that ended the
/// saga, never a compensation error.
#[derive(Clone)]
pub struct SagaOrchestrator {
    orders: Arc<dyn OrderStore>,
    pricing: Arc<dyn PricingService>,
    inventory: Arc<dyn InventoryService>,
    payment: Arc<dyn PaymentService>,
    compensation: CompensationEngine,
}

impl SagaOrchestrator {
    /// Creates a new saga orchestrator.
    pub fn new(
        orders: Arc<dyn OrderStore>,
        pricing: Arc<dyn PricingService>,
        inventory: Arc<dyn InventoryService>,
        payment: Arc<dyn PaymentService>,
    ) -> Self {
        let compensation = CompensationEngine::new(orders.clone(), inventory.clone());
        Self {
            orders,
            pricing,
            inventory,
            payment,
            compensation,
        }
    }

    /// Executes the saga for `command`.
    ///
    /// Returns the `APPROVED` order, or the failure that ended the saga.
    #[tracing::instrument(
        skip(self, command),
        fields(customer_id = %command.customer_id, item_count = command.items.len())
    )]
    pub async fn execute(&self, command: CreateOrder) -> Result<Order, SagaFailure> {
        metrics::counter!("saga_executions_total").increment(1);
        let saga_start = Instant::now();

        let mut run = SagaRun::default();
        let result = match self.run_steps(&mut run, &command).await {
            Ok(order) => Ok(order),
            Err(error) => Err(self.recover(&mut run, error).await),
        };

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds").record(duration);

        match &result {
            Ok(order) => {
                metrics::counter!("saga_approved_total").increment(1);
                tracing::info!(order_id = %order.id, total = %order.total_amount, duration, "saga completed successfully");
            }
            Err(failure) => {
                tracing::warn!(
                    order_id = ?failure.order_id,
                    state = %failure.state,
                    code = failure.error.code(),
                    manual_intervention = failure.manual_intervention,
                    duration,
                    "saga failed: {}",
                    failure.error
                );
            }
        }

        result
    }

    async fn run_steps(&self, run: &mut SagaRun, command: &CreateOrder) -> Result<Order, SagaError> {
        tracing::info!(step = STEP_VERIFY_PRICES, "saga step started");
        let priced = self.pricing.verify(&command.items).await?;

        run.enter(SagaState::Persisting)?;
        tracing::info!(step = STEP_CREATE_ORDER, "saga step started");
        let order = self
            .orders
            .create_pending(command.customer_id, &priced)
            .await?;
        run.log.record(CompletedStep::OrderCreated { order_id: order.id });

        run.enter(SagaState::Reserving)?;
        tracing::info!(step = STEP_RESERVE_INVENTORY, order_id = %order.id, "saga step started");
        let items: Vec<ReservationItem> = order
            .priced_items()
            .iter()
            .map(ReservationItem::from)
            .collect();
        self.inventory.reserve(order.id, &items).await?;
        run.log
            .record(CompletedStep::InventoryReserved { order_id: order.id });

        run.enter(SagaState::Charging)?;
        tracing::info!(step = STEP_CHARGE_PAYMENT, order_id = %order.id, "saga step started");
        let receipt = self
            .payment
            .charge(order.id, order.customer_id, order.total_amount)
            .await?;
        run.log.record(CompletedStep::PaymentCharged {
            order_id: order.id,
            payment_ref: receipt.payment_ref.clone(),
        });

        run.enter(SagaState::Approving)?;
        tracing::info!(step = STEP_APPROVE_ORDER, order_id = %order.id, "saga step started");
        let approved = self
            .orders
            .set_status(order.id, OrderStatus::Approved, None)
            .await
            .map_err(|source| SagaError::ApprovalFailed {
                order_id: order.id,
                payment_ref: receipt.payment_ref,
                source,
            })?;

        run.enter(SagaState::Approved)?;
        Ok(approved)
    }

    /// Brings a failed run to its terminal state.
    async fn recover(&self, run: &mut SagaRun, error: SagaError) -> SagaFailure {
        let order_id = run.log.order_id();

        if let SagaError::ApprovalFailed {
            order_id,
            payment_ref,
            ..
        } = &error
        {
            run.settle(SagaState::Stalled);
            metrics::counter!("saga_failed_total", "error" => error.code()).increment(1);
            tracing::error!(
                %order_id,
                payment_ref = %payment_ref,
                manual_intervention = true,
                "order charged but not approved"
            );
            return SagaFailure {
                order_id: Some(*order_id),
                error,
                state: run.state,
                manual_intervention: true,
            };
        }

        if order_id.is_none() {
            run.settle(SagaState::Rejected);
            metrics::counter!("saga_rejected_total", "error" => error.code()).increment(1);
            return SagaFailure {
                error,
                order_id: None,
                state: run.state,
                manual_intervention: false,
            };
        }

        run.settle(SagaState::Compensating);
        tracing::info!(
            steps = ?run.log.names(),
            "compensating committed steps"
        );
        let outcome = self.compensation.compensate(&run.log, &error).await;
        run.settle(SagaState::Failed);
        metrics::counter!("saga_failed_total", "error" => error.code()).increment(1);

        SagaFailure {
            error,
            order_id,
            state: run.state,
            manual_intervention: outcome.manual_intervention(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_follows_happy_path() {
        let mut run = SagaRun::default();
        for next in [
            SagaState::Persisting,
            SagaState::Reserving,
            SagaState::Charging,
            SagaState::Approving,
            SagaState::Approved,
        ] {
            run.enter(next).unwrap();
        }
        assert!(run.state.is_terminal());
    }

    #[test]
    fn test_run_rejects_skipped_step() {
        let mut run = SagaRun::default();
        let result = run.enter(SagaState::Charging);
        assert!(matches!(
            result,
            Err(SagaError::InvalidState {
                from: SagaState::Pricing,
                to: SagaState::Charging
            })
        ));
        assert_eq!(run.state, SagaState::Pricing);
    }

    #[test]
    fn test_settle_always_reaches_terminal_state() {
        let mut run = SagaRun::default();
        run.settle(SagaState::Failed);
        assert_eq!(run.state, SagaState::Failed);
    }
}
