//! Integration tests for the order-creation saga.

use std::sync::Arc;

use common::{CustomerId, Money, OrderId, ProductId, RequestedItem};
use saga::{
    CreateOrder, InMemoryInventoryService, InMemoryPaymentService, InMemoryPricingService,
    ReservationItem, SagaError, SagaOrchestrator, SagaState,
};
use storage::{InMemoryOrderStore, OrderStatus, OrderStore};

struct TestHarness {
    orchestrator: SagaOrchestrator,
    orders: InMemoryOrderStore,
    pricing: InMemoryPricingService,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
}

impl TestHarness {
    fn new() -> Self {
        let orders = InMemoryOrderStore::new();
        let pricing = InMemoryPricingService::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();

        pricing.set_price(ProductId::new(9), Money::from_cents(1000));
        pricing.set_price(ProductId::new(4), Money::from_cents(250));

        let orchestrator = SagaOrchestrator::new(
            Arc::new(orders.clone()),
            Arc::new(pricing.clone()),
            Arc::new(inventory.clone()),
            Arc::new(payment.clone()),
        );

        Self {
            orchestrator,
            orders,
            pricing,
            inventory,
            payment,
        }
    }

    fn command() -> CreateOrder {
        CreateOrder::new(
            CustomerId::new(1),
            vec![RequestedItem::new(ProductId::new(9), 2)],
        )
    }
}

#[tokio::test]
async fn test_happy_path_approves_order() {
    let h = TestHarness::new();

    let order = h.orchestrator.execute(TestHarness::command()).await.unwrap();

    assert_eq!(order.status, OrderStatus::Approved);
    assert_eq!(order.total_amount.to_string(), "20.00");
    assert_eq!(order.customer_id, CustomerId::new(1));
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].status, OrderStatus::Approved);
    assert!(order.failure_reason.is_none());

    assert_eq!(h.inventory.reservation_count(), 1);
    assert_eq!(h.payment.charged_amount(order.id), Some(Money::from_cents(2000)));

    let stored = h.orders.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Approved);
}

#[tokio::test]
async fn test_catalog_prices_replace_client_prices() {
    let h = TestHarness::new();
    h.pricing.set_price(ProductId::new(9), Money::from_cents(1299));

    let command = CreateOrder::new(
        CustomerId::new(1),
        vec![
            RequestedItem::new(ProductId::new(9), 1),
            RequestedItem::new(ProductId::new(4), 3),
        ],
    );
    let order = h.orchestrator.execute(command).await.unwrap();

    assert_eq!(order.items[0].unit_price, Money::from_cents(1299));
    assert_eq!(order.items[1].unit_price, Money::from_cents(250));
    assert_eq!(order.total_amount, Money::from_cents(1299 + 750));
}

#[tokio::test]
async fn test_pricing_failure_creates_no_order() {
    let h = TestHarness::new();
    h.pricing.set_fail_on_verify(true);

    let failure = h
        .orchestrator
        .execute(TestHarness::command())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SagaError::PricingUnavailable(_)));
    assert_eq!(failure.state, SagaState::Rejected);
    assert_eq!(failure.order_id, None);
    assert!(!failure.manual_intervention);
    assert_eq!(h.orders.order_count().await, 0);
    assert_eq!(h.inventory.reserve_calls(), 0);
}

#[tokio::test]
async fn test_unknown_product_is_rejected() {
    let h = TestHarness::new();
    let command = CreateOrder::new(
        CustomerId::new(1),
        vec![RequestedItem::new(ProductId::new(77), 1)],
    );

    let failure = h.orchestrator.execute(command).await.unwrap_err();

    assert_eq!(failure.error.code(), "PRICING_UNAVAILABLE");
    assert_eq!(h.orders.order_count().await, 0);
}

#[tokio::test]
async fn test_persistence_failure_is_rejected_without_compensation() {
    let h = TestHarness::new();
    h.orders.set_fail_on_create(true).await;

    let failure = h
        .orchestrator
        .execute(TestHarness::command())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SagaError::Persistence(_)));
    assert_eq!(failure.state, SagaState::Rejected);
    assert_eq!(h.orders.order_count().await, 0);
    assert_eq!(h.inventory.reserve_calls(), 0);
    assert!(h.inventory.releases().is_empty());
}

#[tokio::test]
async fn test_reservation_failure_fails_order_without_payment() {
    let h = TestHarness::new();
    h.inventory.set_fail_on_reserve(true);

    let failure = h
        .orchestrator
        .execute(TestHarness::command())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SagaError::InventoryUnavailable(_)));
    assert_eq!(failure.state, SagaState::Failed);
    assert!(!failure.manual_intervention);

    let order_id = failure.order_id.unwrap();
    let order = h.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(
        order.failure_reason.as_deref(),
        Some(failure.error.to_string().as_str())
    );
    assert!(order.items.iter().all(|i| i.status == OrderStatus::Failed));

    assert_eq!(h.payment.attempt_count(), 0);
    assert!(h.inventory.releases().is_empty());
}

#[tokio::test]
async fn test_payment_failure_releases_persisted_items() {
    let h = TestHarness::new();
    h.payment.set_fail_on_charge(true);

    let command = CreateOrder::new(
        CustomerId::new(1),
        vec![
            RequestedItem::new(ProductId::new(9), 2),
            RequestedItem::new(ProductId::new(4), 5),
        ],
    );
    let failure = h.orchestrator.execute(command).await.unwrap_err();

    assert!(matches!(failure.error, SagaError::PaymentFailed(_)));
    assert_eq!(failure.state, SagaState::Failed);
    assert!(!failure.manual_intervention);

    let order_id = failure.order_id.unwrap();
    assert_eq!(
        h.inventory.releases(),
        vec![(
            order_id,
            vec![
                ReservationItem {
                    product_id: ProductId::new(9),
                    quantity: 2
                },
                ReservationItem {
                    product_id: ProductId::new(4),
                    quantity: 5
                },
            ]
        )]
    );
    assert_eq!(h.inventory.reservation_count(), 0);

    let order = h.orders.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
}

#[tokio::test]
async fn test_release_failure_keeps_original_error() {
    let h = TestHarness::new();
    h.payment.set_fail_on_charge(true);
    h.inventory.set_fail_on_release(true);

    let failure = h
        .orchestrator
        .execute(TestHarness::command())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SagaError::PaymentFailed(_)));
    assert!(failure.manual_intervention);
    assert_eq!(failure.state, SagaState::Failed);

    let order = h
        .orders
        .get_order(failure.order_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
}

#[tokio::test]
async fn test_approval_failure_stalls_without_compensation() {
    let h = TestHarness::new();
    h.orders.set_fail_on_status(Some(OrderStatus::Approved)).await;

    let failure = h
        .orchestrator
        .execute(TestHarness::command())
        .await
        .unwrap_err();

    assert_eq!(failure.state, SagaState::Stalled);
    assert!(failure.manual_intervention);
    match &failure.error {
        SagaError::ApprovalFailed {
            order_id,
            payment_ref,
            ..
        } => {
            assert_eq!(Some(*order_id), failure.order_id);
            assert_eq!(payment_ref, "PAY-0001");
        }
        other => panic!("expected approval failure, got {other:?}"),
    }

    let order = h
        .orders
        .get_order(failure.order_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(h.payment.payment_count(), 1);
    assert!(h.inventory.releases().is_empty());
}

#[tokio::test]
async fn test_concurrent_sagas_are_independent() {
    let h = TestHarness::new();

    let (a, b) = tokio::join!(
        h.orchestrator.execute(TestHarness::command()),
        h.orchestrator.execute(CreateOrder::new(
            CustomerId::new(2),
            vec![RequestedItem::new(ProductId::new(4), 1)],
        )),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.id, b.id);
    assert_eq!(h.orders.order_count().await, 2);
    assert_eq!(h.payment.payment_count(), 2);
    assert!(h.payment.charged_amount(OrderId::new(99)).is_none());
}
