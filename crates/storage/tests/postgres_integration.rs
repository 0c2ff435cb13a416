//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p storage --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use common::{CustomerId, Money, OrderId, PricedItem, ProductId};
use serial_test::serial;
use sqlx::PgPool;
use storage::{
    IdempotencyStore, InsertOutcome, NewIdempotencyRecord, OrderStatus, OrderStore,
    PostgresStore, StoreError,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            PostgresStore::new(temp_pool.clone())
                .run_migrations()
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE order_line_items, orders, idempotency_records RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn items() -> Vec<PricedItem> {
    vec![
        PricedItem::new(ProductId::new(9), 2, Money::from_cents(1000)),
        PricedItem::new(ProductId::new(3), 1, Money::from_cents(499)),
    ]
}

#[tokio::test]
#[serial]
async fn create_pending_writes_order_and_lines() {
    let store = get_test_store().await;

    let order = store
        .create_pending(CustomerId::new(1), &items())
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, Money::from_cents(2499));
    assert_eq!(order.total_amount.to_string(), "24.99");
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.priced_items(), items());

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, order.id);
    assert_eq!(loaded.items, order.items);
}

#[tokio::test]
#[serial]
async fn get_missing_order_returns_none() {
    let store = get_test_store().await;
    assert!(store.get_order(OrderId::new(12345)).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn set_status_updates_lines_in_same_transaction() {
    let store = get_test_store().await;
    let order = store
        .create_pending(CustomerId::new(1), &items())
        .await
        .unwrap();

    let failed = store
        .set_status(order.id, OrderStatus::Failed, Some("payment declined"))
        .await
        .unwrap();

    assert_eq!(failed.status, OrderStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("payment declined"));
    assert!(failed.items.iter().all(|l| l.status == OrderStatus::Failed));

    let again = store
        .set_status(order.id, OrderStatus::Approved, None)
        .await;
    assert!(matches!(
        again,
        Err(StoreError::InvalidStatusTransition { .. })
    ));
}

#[tokio::test]
#[serial]
async fn list_orders_filters_by_customer() {
    let store = get_test_store().await;
    store.create_pending(CustomerId::new(1), &items()).await.unwrap();
    store.create_pending(CustomerId::new(2), &items()).await.unwrap();
    let latest = store.create_pending(CustomerId::new(1), &items()).await.unwrap();

    let mine = store
        .list_orders(Some(CustomerId::new(1)), 10)
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].id, latest.id);
    assert!(mine.iter().all(|o| o.items.len() == 2));

    let all = store.list_orders(None, 2).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
#[serial]
async fn idempotency_key_is_unique() {
    let store = get_test_store().await;

    let first = store
        .insert_if_absent(NewIdempotencyRecord::new("abc123", "/v1/orders", "h1"))
        .await
        .unwrap();
    let second = store
        .insert_if_absent(NewIdempotencyRecord::new("abc123", "/v1/orders", "h2"))
        .await
        .unwrap();

    assert!(matches!(first, InsertOutcome::Inserted(_)));
    match second {
        InsertOutcome::Exists(record) => {
            assert_eq!(record.request_hash, "h1");
            assert!(record.is_in_flight());
        }
        other => panic!("expected existing record, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn concurrent_inserts_have_one_winner() {
    let store = get_test_store().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .insert_if_absent(NewIdempotencyRecord::new(
                    "race",
                    "/v1/orders",
                    format!("h{i}"),
                ))
                .await
                .unwrap()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), InsertOutcome::Inserted(_)) {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
}

#[tokio::test]
#[serial]
async fn finalize_and_reclaim() {
    let store = get_test_store().await;
    store
        .insert_if_absent(NewIdempotencyRecord::new("k1", "/v1/orders", "h"))
        .await
        .unwrap();

    let body = serde_json::json!({"error": "payment declined", "code": "PAYMENT_FAILED"});
    store.finalize("k1", 500, &body).await.unwrap();

    let record = store.get_record("k1").await.unwrap().unwrap();
    assert_eq!(record.response_status, Some(500));
    assert_eq!(record.response_body, Some(body.clone()));

    let twice = store.finalize("k1", 201, &body).await;
    assert!(matches!(twice, Err(StoreError::AlreadyFinalized(_))));

    assert!(store.reclaim_failed("k1", "h2").await.unwrap());
    assert!(!store.reclaim_failed("k1", "h3").await.unwrap());

    let record = store.get_record("k1").await.unwrap().unwrap();
    assert!(record.is_in_flight());
    assert_eq!(record.request_hash, "h2");
}
