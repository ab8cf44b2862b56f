//! In-process record stores backing the lifecycle, dispatcher and router
//! tests. The quote store writes outbox rows under its own lock, mirroring
//! the single transaction the Postgres store uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jetset_core::effects::{EffectStatus, SideEffect};
use jetset_core::repository::{
    EffectOutbox, PaymentRepository, QuoteRepository, StoreError, StoreResult,
};
use jetset_core::{Payment, PaymentStatus, Quote, QuoteStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub struct InMemoryQuoteRepository {
    quotes: RwLock<HashMap<Uuid, Quote>>,
    outbox: Arc<InMemoryEffectOutbox>,
}

impl InMemoryQuoteRepository {
    /// Effects committed with a transition land in `outbox`.
    pub fn new(outbox: Arc<InMemoryEffectOutbox>) -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            outbox,
        }
    }
}

#[async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn insert_quote(&self, quote: &Quote) -> StoreResult<()> {
        let mut quotes = self.quotes.write().await;
        if quotes.values().any(|q| q.reference_number == quote.reference_number) {
            return Err(StoreError::Duplicate(format!("reference {}", quote.reference_number)));
        }
        if quotes.contains_key(&quote.id) {
            return Err(StoreError::Duplicate(format!("quote {}", quote.id)));
        }
        quotes.insert(quote.id, quote.clone());
        Ok(())
    }

    async fn get_quote(&self, id: Uuid) -> StoreResult<Option<Quote>> {
        Ok(self.quotes.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference_number: &str) -> StoreResult<Option<Quote>> {
        Ok(self
            .quotes
            .read()
            .await
            .values()
            .find(|q| q.reference_number == reference_number)
            .cloned())
    }

    async fn update_quote_with_effects(
        &self,
        quote: &Quote,
        expected_version: u64,
        effects: &[SideEffect],
    ) -> StoreResult<()> {
        let mut quotes = self.quotes.write().await;
        let stored = quotes
            .get_mut(&quote.id)
            .ok_or_else(|| StoreError::NotFound(format!("quote {}", quote.id)))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: stored.version,
            });
        }
        // Quote lock is still held: no reader sees the new version without its effects.
        self.outbox.append(effects).await;
        *stored = quote.clone();
        Ok(())
    }

    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        pending_created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Quote>> {
        let mut due: Vec<Quote> = self
            .quotes
            .read()
            .await
            .values()
            .filter(|q| match q.status {
                QuoteStatus::Approved => q.payment_deadline.map(|d| d < now).unwrap_or(false),
                QuoteStatus::Pending => q.created_at < pending_created_before,
                _ => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(|q| q.created_at);
        Ok(due)
    }

    async fn committed_seats(&self, flight_id: Uuid) -> StoreResult<u32> {
        Ok(self
            .quotes
            .read()
            .await
            .values()
            .filter(|q| q.flight_id == Some(flight_id) && q.status.holds_seats())
            .map(|q| q.seats_requested)
            .sum())
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    payments: RwLock<HashMap<Uuid, Payment>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        if let Some(txn) = &payment.transaction_ref {
            if payments.values().any(|p| p.transaction_ref.as_ref() == Some(txn)) {
                return Err(StoreError::Duplicate(format!("transaction {}", txn)));
            }
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn settle_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .get_mut(&payment.id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.id)))?;

        if stored.status != PaymentStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "payment {} is already {}",
                payment.id,
                stored.status.as_str()
            )));
        }
        stored.status = PaymentStatus::Success;
        stored.paid_at = payment.paid_at;
        stored.receipt_ref = payment.receipt_ref.clone();
        Ok(())
    }

    async fn list_for_quote(&self, quote_id: Uuid) -> StoreResult<Vec<Payment>> {
        let mut payments: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.quote_id == quote_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn find_by_transaction_ref(&self, transaction_ref: &str) -> StoreResult<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.transaction_ref.as_deref() == Some(transaction_ref))
            .cloned())
    }
}

/// Outbox held in a single mutex so a claim is atomic across workers.
#[derive(Default)]
pub struct InMemoryEffectOutbox {
    effects: Mutex<Vec<SideEffect>>,
}

impl InMemoryEffectOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `effects`, skipping idempotency keys already present. Returns how
    /// many were added.
    pub(crate) async fn append(&self, effects: &[SideEffect]) -> usize {
        let mut queued = self.effects.lock().await;
        let mut added = 0;
        for effect in effects {
            if queued.iter().any(|e| e.idempotency_key == effect.idempotency_key) {
                continue;
            }
            queued.push(effect.clone());
            added += 1;
        }
        added
    }

    async fn with_effect<F>(&self, id: Uuid, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut SideEffect),
    {
        let mut effects = self.effects.lock().await;
        let effect = effects
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("side effect {}", id)))?;
        apply(effect);
        Ok(())
    }
}

#[async_trait]
impl EffectOutbox for InMemoryEffectOutbox {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<Vec<SideEffect>> {
        let mut effects = self.effects.lock().await;
        let mut claimed = Vec::new();

        for effect in effects.iter_mut().filter(|e| e.is_due(now)).take(limit) {
            effect.status = EffectStatus::InFlight;
            effect.lease_until = Some(lease_until);
            effect.attempts += 1;
            effect.updated_at = now;
            claimed.push(effect.clone());
        }
        Ok(claimed)
    }

    async fn record_document(&self, id: Uuid, document_url: &str) -> StoreResult<()> {
        self.with_effect(id, |e| e.document_url = Some(document_url.to_string()))
            .await
    }

    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        self.with_effect(id, |e| {
            e.status = EffectStatus::Delivered;
            e.lease_until = None;
            e.last_error = None;
            e.updated_at = now;
        })
        .await
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.with_effect(id, |e| {
            e.status = EffectStatus::Pending;
            e.lease_until = None;
            e.next_attempt_at = next_attempt_at;
            e.last_error = Some(error.to_string());
            e.updated_at = now;
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> StoreResult<()> {
        self.with_effect(id, |e| {
            e.status = EffectStatus::Failed;
            e.lease_until = None;
            e.last_error = Some(error.to_string());
            e.updated_at = now;
        })
        .await
    }

    async fn list_for_quote(&self, quote_id: Uuid) -> StoreResult<Vec<SideEffect>> {
        Ok(self
            .effects
            .lock()
            .await
            .iter()
            .filter(|e| e.quote_id == quote_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jetset_core::documents::{DocumentKind, DocumentRequest};
    use jetset_core::{ClientContact, QuoteKind};
    use jetset_shared::Masked;
    use rust_decimal::Decimal;

    fn quote(flight_id: Uuid, seats: u32, reference: &str) -> Quote {
        Quote::pending(
            reference.into(),
            QuoteKind::EmptyLeg,
            seats,
            ClientContact {
                name: "Lena Park".into(),
                email: Some(Masked::new("lena@example.com".into())),
                phone: None,
            },
            Some(flight_id),
            None,
            None,
            Utc::now(),
        )
    }

    fn request(quote_id: Uuid) -> DocumentRequest {
        DocumentRequest {
            kind: DocumentKind::QuoteConfirmation,
            quote_id,
            reference_number: "EL-260101-AAAAA".into(),
            client_contact: ClientContact {
                name: "Lena Park".into(),
                email: Some(Masked::new("lena@example.com".into())),
                phone: None,
            },
            origin: None,
            destination: None,
            aircraft: None,
            departure_at: None,
            seats: 1,
            total_price_usd: None,
            payment_deadline: None,
            bank_details: None,
            rejection_reason: None,
            rejection_note: None,
        }
    }

    #[tokio::test]
    async fn test_update_requires_expected_version() {
        let repo = InMemoryQuoteRepository::new(Arc::new(InMemoryEffectOutbox::new()));
        let mut q = quote(Uuid::new_v4(), 2, "EL-260101-AAAAA");
        repo.insert_quote(&q).await.unwrap();

        q.touch(Utc::now());
        repo.update_quote(&q, 1).await.unwrap();

        // Second writer still thinks version 1 is current
        let err = repo.update_quote(&q, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2 }));
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let repo = InMemoryQuoteRepository::new(Arc::new(InMemoryEffectOutbox::new()));
        repo.insert_quote(&quote(Uuid::new_v4(), 1, "EL-260101-DUPED")).await.unwrap();
        let err = repo
            .insert_quote(&quote(Uuid::new_v4(), 1, "EL-260101-DUPED"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_committed_seats_counts_consuming_states() {
        let repo = InMemoryQuoteRepository::new(Arc::new(InMemoryEffectOutbox::new()));
        let flight = Uuid::new_v4();

        repo.insert_quote(&quote(flight, 2, "EL-260101-AAAA2")).await.unwrap();
        let mut rejected = quote(flight, 3, "EL-260101-AAAA3");
        rejected.status = QuoteStatus::Rejected;
        repo.insert_quote(&rejected).await.unwrap();

        assert_eq!(repo.committed_seats(flight).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_outbox_dedupes_and_leases() {
        let outbox = InMemoryEffectOutbox::new();
        let now = Utc::now();
        let effect = SideEffect::new(request(Uuid::new_v4()), 2, now);

        assert_eq!(outbox.append(&[effect.clone()]).await, 1);
        assert_eq!(outbox.append(&[SideEffect::new(effect.payload.clone(), 2, now)]).await, 0);

        let lease = now + Duration::seconds(30);
        let claimed = outbox.claim_due(now, 10, lease).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        // Leased, not claimable again until the lease lapses
        assert!(outbox.claim_due(now, 10, lease).await.unwrap().is_empty());
        let reclaimed = outbox.claim_due(lease, 10, lease + Duration::seconds(30)).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_effects_land_only_with_the_winning_update() {
        let outbox = Arc::new(InMemoryEffectOutbox::new());
        let repo = InMemoryQuoteRepository::new(outbox.clone());
        let mut q = quote(Uuid::new_v4(), 2, "EL-260101-AAAA4");
        repo.insert_quote(&q).await.unwrap();

        q.touch(Utc::now());
        let effect = SideEffect::new(request(q.id), q.version, Utc::now());
        repo.update_quote_with_effects(&q, 1, &[effect.clone()]).await.unwrap();

        // Same transition retried by a second writer: record and outbox both untouched
        let err = repo
            .update_quote_with_effects(&q, 1, &[SideEffect::new(request(q.id), 3, Utc::now())])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 1, actual: 2 }));

        let queued = outbox.list_for_quote(q.id).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].idempotency_key, effect.idempotency_key);
        assert_eq!(repo.get_quote(q.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_settled_payment_is_never_rewritten() {
        let repo = InMemoryPaymentRepository::new();
        let opened = Utc::now();
        let receipt = Payment::from_receipt(Uuid::new_v4(), Decimal::new(9_000, 0), "s3://r/7.pdf".into(), opened);
        repo.insert_payment(&receipt).await.unwrap();

        let mut first = receipt.clone();
        first.mark_succeeded(opened + Duration::minutes(5)).unwrap();
        let mut second = receipt.clone();
        second.mark_succeeded(opened + Duration::minutes(9)).unwrap();

        repo.settle_payment(&first).await.unwrap();
        let err = repo.settle_payment(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = repo.list_for_quote(receipt.quote_id).await.unwrap();
        assert_eq!(stored[0].status, PaymentStatus::Success);
        assert_eq!(stored[0].paid_at, first.paid_at);
    }
}
