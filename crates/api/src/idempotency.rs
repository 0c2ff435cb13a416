//! Idempotency gate: at most one saga per client key.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use storage::{IdempotencyRecord, IdempotencyStore, InsertOutcome, NewIdempotencyRecord};

use crate::error::ApiError;

/// Header names accepted for the idempotency key. Lookups are
/// case-insensitive.
pub const IDEMPOTENCY_KEY_HEADERS: [&str; 2] = ["idempotency-key", "x-idempotency-key"];

/// Longest key accepted.
pub const MAX_KEY_LENGTH: usize = 255;

/// Reads the idempotency key from the request headers.
pub fn extract_key(headers: &HeaderMap) -> Result<String, ApiError> {
    let value = IDEMPOTENCY_KEY_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .ok_or(ApiError::MissingIdempotencyKey)?;

    let key = value
        .to_str()
        .map_err(|_| ApiError::Validation("Idempotency-Key must be visible ASCII".to_string()))?
        .trim();

    if key.is_empty() {
        return Err(ApiError::MissingIdempotencyKey);
    }
    if key.chars().count() > MAX_KEY_LENGTH {
        return Err(ApiError::Validation(format!(
            "Idempotency-Key must be at most {MAX_KEY_LENGTH} characters"
        )));
    }

    Ok(key.to_string())
}

/// Hex SHA-256 of the raw request body.
pub fn request_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// What the gate decided for a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The caller owns the key and must finalize it.
    Admitted,
    /// The key already completed; answer with the stored response.
    Replay { status: StatusCode, body: Value },
    /// The key is in flight or failed.
    Conflict,
}

/// Admits or rejects requests by idempotency key.
///
/// Uniqueness comes from the store's insert-if-absent; the gate holds no
/// locks of its own.
#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn IdempotencyStore>,
    retry_failed: bool,
}

impl IdempotencyGate {
    /// Creates a gate. With `retry_failed`, a key whose request failed may
    /// be claimed again.
    pub fn new(store: Arc<dyn IdempotencyStore>, retry_failed: bool) -> Self {
        Self {
            store,
            retry_failed,
        }
    }

    #[tracing::instrument(skip(self, request_hash))]
    pub async fn admit(
        &self,
        key: &str,
        resource_path: &str,
        request_hash: &str,
    ) -> Result<Admission, ApiError> {
        let outcome = self
            .store
            .insert_if_absent(NewIdempotencyRecord::new(key, resource_path, request_hash))
            .await?;

        let admission = match outcome {
            InsertOutcome::Inserted(_) => ("admitted", Admission::Admitted),
            InsertOutcome::Exists(record) => self.existing(record, request_hash).await?,
        };

        metrics::counter!("idempotency_admissions_total", "outcome" => admission.0).increment(1);
        tracing::debug!(outcome = admission.0, "idempotency key checked");
        Ok(admission.1)
    }

    async fn existing(
        &self,
        record: IdempotencyRecord,
        request_hash: &str,
    ) -> Result<(&'static str, Admission), ApiError> {
        if record.request_hash != request_hash {
            tracing::info!(key = %record.key, "repeated key with a different body");
        }

        if record.is_replayable() {
            let status = record
                .response_status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .ok_or_else(|| {
                    ApiError::Internal(format!("stored status for key {} is invalid", record.key))
                })?;
            let body = record.response_body.unwrap_or(Value::Null);
            return Ok(("replay", Admission::Replay { status, body }));
        }

        if record.is_failed()
            && self.retry_failed
            && self.store.reclaim_failed(&record.key, request_hash).await?
        {
            return Ok(("reclaimed", Admission::Admitted));
        }

        Ok(("conflict", Admission::Conflict))
    }

    /// Stores the final response for an admitted key.
    ///
    /// Failures are logged and swallowed; the client still gets its answer.
    pub async fn finalize(&self, key: &str, status: StatusCode, body: &Value) {
        if let Err(e) = self.store.finalize(key, status.as_u16(), body).await {
            tracing::error!(key, status = status.as_u16(), error = %e, "failed to finalize idempotency key");
        }
    }
}
