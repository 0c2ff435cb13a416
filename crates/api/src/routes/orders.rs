//! Order creation and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use common::{CustomerId, LineItemId, Money, OrderId, ProductId, RequestedItem};
use saga::{CreateOrder, SagaOrchestrator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{Order, OrderLineItem, OrderStatus, OrderStore};

use crate::error::ApiError;
use crate::idempotency::{Admission, IdempotencyGate, extract_key, request_hash};

/// Resource path recorded with every idempotency key.
pub const ORDERS_PATH: &str = "/v1/orders";

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orders: Arc<dyn OrderStore>,
    pub orchestrator: SagaOrchestrator,
    pub gate: IdempotencyGate,
    /// Name of the storage backend, reported by the health check.
    pub storage: &'static str,
}

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(alias = "user_id")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    #[serde(alias = "product_id")]
    pub product_id: Option<i64>,
    pub quantity: Option<i64>,
    /// Accepted for compatibility and ignored; prices come from the catalog.
    #[serde(alias = "unit_price")]
    pub unit_price: Option<Value>,
}

impl CreateOrderRequest {
    /// Validates the request and turns it into a saga command.
    pub fn into_command(self) -> Result<CreateOrder, ApiError> {
        let user_id = self
            .user_id
            .ok_or_else(|| ApiError::Validation("userId is required".to_string()))?;
        if self.items.is_empty() {
            return Err(ApiError::Validation(
                "items must contain at least one item".to_string(),
            ));
        }

        let items = self
            .items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let product_id = item.product_id.ok_or_else(|| {
                    ApiError::Validation(format!("items[{index}].productId is required"))
                })?;
                let quantity = item
                    .quantity
                    .filter(|q| *q >= 1)
                    .and_then(|q| u32::try_from(q).ok())
                    .ok_or_else(|| {
                        ApiError::Validation(format!(
                            "items[{index}].quantity must be a positive integer"
                        ))
                    })?;
                Ok(RequestedItem::new(ProductId::new(product_id), quantity))
            })
            .collect::<Result<Vec<_>, ApiError>>()?;

        Ok(CreateOrder::new(CustomerId::new(user_id), items))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    #[serde(alias = "user_id")]
    pub user_id: Option<i64>,
    pub limit: Option<usize>,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub user_id: CustomerId,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub id: LineItemId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub status: OrderStatus,
}

impl From<&OrderLineItem> for OrderItemResponse {
    fn from(item: &OrderLineItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
            status: item.status,
        }
    }
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            user_id: order.customer_id,
            total_amount: order.total_amount,
            status: order.status,
            items: order.items.iter().map(OrderItemResponse::from).collect(),
            failure_reason: order.failure_reason,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

// -- Handlers --

/// POST /v1/orders: create an order through the idempotency gate and saga.
///
/// The saga runs on its own task so that a client disconnect cannot abort
/// it halfway. A supervising task finalizes the key even if the saga
/// panics.
#[tracing::instrument(skip(state, headers, body), fields(key = tracing::field::Empty))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let key = extract_key(&headers)?;
    tracing::Span::current().record("key", key.as_str());

    let request: CreateOrderRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid request body: {e}")))?;
    let command = request.into_command()?;

    match state
        .gate
        .admit(&key, ORDERS_PATH, &request_hash(&body))
        .await?
    {
        Admission::Admitted => {}
        Admission::Replay { status, body } => {
            tracing::info!("replaying stored response");
            return Ok((status, Json(body)).into_response());
        }
        Admission::Conflict => return Err(ApiError::IdempotencyConflict),
    }

    let orchestrator = state.orchestrator.clone();
    let gate = state.gate.clone();
    let saga = tokio::spawn(async move {
        let (status, body) = match tokio::spawn(run_saga(orchestrator, command)).await {
            Ok(response) => response,
            Err(e) => {
                let error = ApiError::Internal(format!("saga task failed: {e}"));
                tracing::error!(error = %error, "saga task aborted");
                error.status_and_body()
            }
        };
        gate.finalize(&key, status, &body).await;
        (status, body)
    });

    let (status, body) = saga
        .await
        .map_err(|e| ApiError::Internal(format!("saga task failed: {e}")))?;
    Ok((status, Json(body)).into_response())
}

async fn run_saga(orchestrator: SagaOrchestrator, command: CreateOrder) -> (StatusCode, Value) {
    let result = match orchestrator.execute(command).await {
        Ok(order) => serde_json::to_value(OrderResponse::from(order))
            .map(|body| (StatusCode::CREATED, body))
            .map_err(|e| ApiError::Internal(format!("failed to encode order: {e}"))),
        Err(failure) => Err(ApiError::Saga(failure)),
    };

    result.unwrap_or_else(|error| {
        tracing::error!(error = %error, code = error.code(), "order creation failed");
        error.status_and_body()
    })
}

/// GET /v1/orders/{id}: load an order with its line items.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .orders
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;

    Ok(Json(OrderResponse::from(order)))
}

/// GET /v1/orders: list orders newest first, optionally for one user.
#[tracing::instrument(skip(state))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let orders = state
        .orders
        .list_orders(query.user_id.map(CustomerId::new), limit)
        .await?;

    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse::<i64>()
        .map(OrderId::new)
        .map_err(|_| ApiError::Validation(format!("Invalid order id: {id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: Value) -> Result<CreateOrder, ApiError> {
        serde_json::from_value::<CreateOrderRequest>(body)
            .unwrap()
            .into_command()
    }

    #[test]
    fn test_accepts_camel_and_snake_case() {
        let camel = parse(json!({"userId": 1, "items": [{"productId": 9, "quantity": 2, "unitPrice": 9.99}]}))
            .unwrap();
        let snake = parse(json!({"user_id": 1, "items": [{"product_id": 9, "quantity": 2}]})).unwrap();

        assert_eq!(camel, snake);
        assert_eq!(camel.customer_id, CustomerId::new(1));
        assert_eq!(camel.items, vec![RequestedItem::new(ProductId::new(9), 2)]);
    }

    #[test]
    fn test_rejects_missing_user() {
        let result = parse(json!({"items": [{"productId": 9, "quantity": 2}]}));
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_rejects_empty_items() {
        assert!(matches!(
            parse(json!({"userId": 1, "items": []})),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            parse(json!({"userId": 1})),
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_quantity() {
        for quantity in [0, -3] {
            let result = parse(json!({"userId": 1, "items": [{"productId": 9, "quantity": quantity}]}));
            match result {
                Err(ApiError::Validation(msg)) => assert!(msg.contains("items[0].quantity")),
                other => panic!("expected validation error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_order_id() {
        assert_eq!(parse_order_id("17").unwrap(), OrderId::new(17));
        assert!(matches!(
            parse_order_id("abc"),
            Err(ApiError::Validation(_))
        ));
    }
}
