//! Saga pattern implementation for order creation.
//!
//! The order-creation saga follows these steps:
//! 1. Verify prices with the catalog
//! 2. Persist the order as `PENDING`
//! 3. Reserve inventory
//! 4. Charge payment
//! 5. Mark the order `APPROVED`
//!
//! If a step fails after the order exists, the committed steps are
//! compensated and the order ends `FAILED`.

pub mod compensation;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod state;
pub mod steps;

pub use compensation::{CompensationEngine, CompensationFailure, CompensationOutcome};
pub use error::{SagaError, SagaFailure};
pub use orchestrator::{CreateOrder, SagaOrchestrator};
pub use services::{
    HttpInventoryService, HttpPaymentService, HttpPricingService, InMemoryInventoryService,
    InMemoryPaymentService, InMemoryPricingService, InventoryService, PaymentReceipt,
    PaymentService, PricingService, ReservationItem,
};
pub use state::SagaState;
pub use steps::{CompletedStep, StepLog};
