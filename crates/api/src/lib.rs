//! HTTP API for idempotent order creation.
//!
//! `POST /v1/orders` passes through the idempotency gate and runs the
//! order-creation saga. Structured logging comes from `tracing` and
//! metrics are exported in Prometheus format.

pub mod config;
pub mod error;
pub mod idempotency;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    HttpInventoryService, HttpPaymentService, HttpPricingService, InventoryService,
    PaymentService, PricingService, SagaOrchestrator,
};
use storage::{
    IdempotencyStore, InMemoryIdempotencyStore, InMemoryOrderStore, OrderStore, PostgresStore,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use error::StartupError;
use idempotency::IdempotencyGate;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/v1/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/v1/orders/{id}", get(routes::orders::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Stores and collaborators the application runs against.
pub struct Backends {
    pub orders: Arc<dyn OrderStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub pricing: Arc<dyn PricingService>,
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub storage: &'static str,
}

/// Wires the saga and the idempotency gate over `backends`.
pub fn create_state(backends: Backends, retry_failed_keys: bool) -> Arc<AppState> {
    let orchestrator = SagaOrchestrator::new(
        backends.orders.clone(),
        backends.pricing,
        backends.inventory,
        backends.payment,
    );

    Arc::new(AppState {
        orders: backends.orders,
        orchestrator,
        gate: IdempotencyGate::new(backends.idempotency, retry_failed_keys),
        storage: backends.storage,
    })
}

/// Builds the application state described by `config`.
///
/// With a `DATABASE_URL` the stores are PostgreSQL and migrations run
/// first; otherwise both stores live in memory.
pub async fn build_state(config: &Config) -> Result<Arc<AppState>, StartupError> {
    let (orders, idempotency, storage): (Arc<dyn OrderStore>, Arc<dyn IdempotencyStore>, _) =
        match &config.database_url {
            Some(url) => {
                let store = PostgresStore::connect(url, config.database_max_connections).await?;
                store.run_migrations().await?;
                tracing::info!("using PostgreSQL stores");
                let orders: Arc<dyn OrderStore> = Arc::new(store.clone());
                let idempotency: Arc<dyn IdempotencyStore> = Arc::new(store);
                (orders, idempotency, "postgres")
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using in-memory stores");
                let orders: Arc<dyn OrderStore> = Arc::new(InMemoryOrderStore::new());
                let idempotency: Arc<dyn IdempotencyStore> =
                    Arc::new(InMemoryIdempotencyStore::new());
                (orders, idempotency, "memory")
            }
        };

    let backends = Backends {
        orders,
        idempotency,
        pricing: Arc::new(HttpPricingService::new(
            config.pricing_url.clone(),
            config.collaborator_timeout,
        )?),
        inventory: Arc::new(HttpInventoryService::new(
            config.inventory_url.clone(),
            config.collaborator_timeout,
        )?),
        payment: Arc::new(HttpPaymentService::new(
            config.payment_url.clone(),
            config.payment_timeout,
        )?),
        storage,
    };

    Ok(create_state(backends, config.retry_failed_keys))
}
