use async_trait::async_trait;

use crate::Result;
use crate::models::{IdempotencyRecord, NewIdempotencyRecord};

/// Outcome of an insert-if-absent.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The key was new; the caller now owns it and must finalize it.
    Inserted(IdempotencyRecord),
    /// A record already existed for the key.
    Exists(IdempotencyRecord),
}

/// Persistence for idempotency records.
///
/// Key uniqueness is enforced by the store itself: concurrent inserts of
/// the same key must produce exactly one `Inserted`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Inserts an in-flight record unless one already exists for the key.
    async fn insert_if_absent(&self, record: NewIdempotencyRecord) -> Result<InsertOutcome>;

    /// Records the final response for an in-flight key.
    async fn finalize(&self, key: &str, status: u16, body: &serde_json::Value) -> Result<()>;

    /// Loads the record for a key.
    async fn get_record(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Resets a key whose stored response is an error back to in-flight.
    ///
    /// Returns true if this caller won the reclaim.
    async fn reclaim_failed(&self, key: &str, request_hash: &str) -> Result<bool>;
}
