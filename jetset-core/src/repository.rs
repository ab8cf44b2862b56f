use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::effects::SideEffect;
use crate::payment::Payment;
use crate::quote::Quote;
use crate::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Record no longer in the expected state: {0}")]
    Conflict(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => CoreError::NotFoundError(what),
            StoreError::VersionConflict { expected, actual } => CoreError::StateConflict(format!(
                "record changed underneath the request (expected version {}, found {})",
                expected, actual
            )),
            StoreError::Duplicate(what) => CoreError::StateConflict(format!("duplicate {}", what)),
            StoreError::Conflict(what) => CoreError::StateConflict(what),
            StoreError::Backend(msg) => CoreError::InternalError(msg),
        }
    }
}

/// Quote/booking record store with optimistic versioning.
#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Fails with `Duplicate` when the reference number is already taken.
    async fn insert_quote(&self, quote: &Quote) -> StoreResult<()>;

    async fn get_quote(&self, id: Uuid) -> StoreResult<Option<Quote>>;

    async fn find_by_reference(&self, reference_number: &str) -> StoreResult<Option<Quote>>;

    /// Compare-and-swap: persists `quote` only if the stored version equals
    /// `expected_version`. `quote.version` must already be the new version.
    ///
    /// `effects` are written to the outbox atomically with the record: both
    /// land or neither does. Effects whose idempotency key already exists are
    /// skipped.
    async fn update_quote_with_effects(
        &self,
        quote: &Quote,
        expected_version: u64,
        effects: &[SideEffect],
    ) -> StoreResult<()>;

    async fn update_quote(&self, quote: &Quote, expected_version: u64) -> StoreResult<()> {
        self.update_quote_with_effects(quote, expected_version, &[]).await
    }

    /// `Approved` records past their payment deadline and `Pending` records
    /// created before `pending_created_before`.
    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        pending_created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Quote>>;

    /// Sum of `seats_requested` over seat-consuming bookings of a flight.
    async fn committed_seats(&self, flight_id: Uuid) -> StoreResult<u32>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fails with `Duplicate` when the transaction reference was already recorded.
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    /// Persists a `Pending` -> `Success` settlement. Fails with `Conflict` when
    /// the stored payment is no longer pending, so a settled payment is never
    /// rewritten.
    async fn settle_payment(&self, payment: &Payment) -> StoreResult<()>;

    async fn list_for_quote(&self, quote_id: Uuid) -> StoreResult<Vec<Payment>>;

    async fn find_by_transaction_ref(&self, transaction_ref: &str) -> StoreResult<Option<Payment>>;
}

/// Durable queue of side effects drained by the dispatcher. Rows are written
/// by `QuoteRepository::update_quote_with_effects`.
#[async_trait]
pub trait EffectOutbox: Send + Sync {
    /// Claims up to `limit` due effects, marking them in flight until `lease_until`
    /// and counting the attempt.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<Vec<SideEffect>>;

    async fn record_document(&self, id: Uuid, document_url: &str) -> StoreResult<()>;

    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()>;

    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> StoreResult<()>;

    async fn list_for_quote(&self, quote_id: Uuid) -> StoreResult<Vec<SideEffect>>;
}
