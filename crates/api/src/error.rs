//! API error types with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaFailure;
use serde_json::{Value, json};
use storage::StoreError;
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable idempotency key was sent.
    #[error("Idempotency-Key header is required")]
    MissingIdempotencyKey,

    /// The request failed validation.
    #[error("{0}")]
    Validation(String),

    /// The key is in flight or its request already failed.
    #[error("A request with this idempotency key is in progress or has already failed")]
    IdempotencyConflict,

    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// The saga ended without approving the order.
    #[error(transparent)]
    Saga(#[from] SagaFailure),

    /// A store failed outside the saga.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the stable error code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Saga(failure) => failure.error.code(),
            ApiError::Store(_) => "PERSISTENCE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingIdempotencyKey | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::IdempotencyConflict => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Saga(_) | ApiError::Store(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Builds the status and JSON body sent to the client.
    ///
    /// Saga failures carry the created order id, if any.
    pub fn status_and_body(&self) -> (StatusCode, Value) {
        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let ApiError::Saga(SagaFailure {
            order_id: Some(order_id),
            ..
        }) = self
        {
            body["order_id"] = json!(order_id);
        }
        (self.status(), body)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP client initialization failed: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use saga::{SagaError, SagaState};

    #[test]
    fn test_client_errors() {
        let (status, body) = ApiError::MissingIdempotencyKey.status_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_IDEMPOTENCY_KEY");

        let (status, body) = ApiError::Validation("items must not be empty".into()).status_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "items must not be empty");

        let (status, body) = ApiError::IdempotencyConflict.status_and_body();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "IDEMPOTENCY_CONFLICT");
    }

    #[test]
    fn test_saga_failure_carries_order_id() {
        let error = ApiError::Saga(SagaFailure {
            error: SagaError::PaymentFailed("card declined".into()),
            order_id: Some(OrderId::new(42)),
            state: SagaState::Failed,
            manual_intervention: false,
        });

        let (status, body) = error.status_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "PAYMENT_FAILED");
        assert_eq!(body["error"], "Payment failed: card declined");
        assert_eq!(body["order_id"], 42);
    }

    #[test]
    fn test_rejected_saga_has_no_order_id() {
        let error = ApiError::Saga(SagaFailure {
            error: SagaError::PricingUnavailable("catalog down".into()),
            order_id: None,
            state: SagaState::Rejected,
            manual_intervention: false,
        });

        let (_, body) = error.status_and_body();
        assert_eq!(body["code"], "PRICING_UNAVAILABLE");
        assert!(body.get("order_id").is_none());
    }
}
