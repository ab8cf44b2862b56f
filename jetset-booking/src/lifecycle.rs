use chrono::Duration;
use jetset_catalog::{InventoryError, SeatAllocator};
use jetset_core::documents::{DocumentKind, DocumentRequest};
use jetset_core::effects::SideEffect;
use jetset_core::events::{EventPublisher, NoopEventPublisher};
use jetset_core::repository::{PaymentRepository, QuoteRepository, StoreError};
use jetset_core::{
    Actor, CharterRequest, ClientContact, Clock, CoreError, CoreResult, FlightInventory,
    InventoryAudit, NewFlight, Payment, PaymentStatus, Quote, QuoteKind, QuoteStatus,
    RejectionReason, SeatHold,
};
use jetset_shared::models::events::{InventoryChangedEvent, QuoteTransitionedEvent};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::DispatchHandle;
use crate::reference::ReferenceGenerator;
use crate::transitions::{self, ApprovalTerms, ExpiryCheck, SeatAdjustment};

const INVENTORY_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    /// A `Pending` hold older than this is reclaimed by the reaper.
    pub unconfirmed_hold_ttl: Duration,
    pub max_reference_attempts: u32,
    pub expire_retries: u32,
    pub release_retries: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            unconfirmed_hold_ttl: Duration::minutes(30),
            max_reference_attempts: 5,
            expire_retries: 3,
            release_retries: 3,
        }
    }
}

/// A client submission.
#[derive(Debug, Clone)]
pub enum SubmitQuote {
    EmptyLeg {
        flight_id: Uuid,
        seats_requested: u32,
        contact: ClientContact,
    },
    Charter {
        charter: CharterRequest,
        departure_date_time: Option<chrono::DateTime<chrono::Utc>>,
        contact: ClientContact,
    },
}

/// A payment-gateway callback.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub quote_id: Uuid,
    pub transaction_ref: String,
    pub amount_usd: Decimal,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireOutcome {
    Expired,
    AlreadyExpired,
    NotEligible,
}

/// Orchestrates every quote/booking transition: the record (version-guarded),
/// the seat allocator, the outbox and the event sinks.
///
/// Ordering rules:
/// - seats are held before a record exists and given back if it cannot be stored;
/// - seats are released only after the compare-and-swap that ends the hold wins;
/// - side effects are written in the same store operation as the record, so a
///   committed transition always has its documents queued.
pub struct QuoteLifecycle {
    quotes: Arc<dyn QuoteRepository>,
    payments: Arc<dyn PaymentRepository>,
    allocator: Arc<dyn SeatAllocator>,
    effects: DispatchHandle,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    references: ReferenceGenerator,
    inventory_tx: broadcast::Sender<InventoryChangedEvent>,
    policy: LifecyclePolicy,
}

impl QuoteLifecycle {
    pub fn new(
        quotes: Arc<dyn QuoteRepository>,
        payments: Arc<dyn PaymentRepository>,
        allocator: Arc<dyn SeatAllocator>,
        effects: DispatchHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (inventory_tx, _) = broadcast::channel(INVENTORY_CHANNEL_CAPACITY);
        Self {
            quotes,
            payments,
            allocator,
            effects,
            publisher: Arc::new(NoopEventPublisher),
            clock,
            references: ReferenceGenerator::new(),
            inventory_tx,
            policy: LifecyclePolicy::default(),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn publish_flight(&self, flight: NewFlight) -> CoreResult<FlightInventory> {
        flight.validate()?;
        let inventory = self
            .allocator
            .publish(flight.into_inventory(self.clock.now()))
            .await?;
        self.broadcast_inventory(&inventory);
        Ok(inventory)
    }

    pub async fn flight_inventory(&self, flight_id: Uuid) -> CoreResult<FlightInventory> {
        Ok(self.allocator.snapshot(flight_id).await?)
    }

    /// Published flights by departure.
    pub async fn list_flights(&self) -> CoreResult<Vec<FlightInventory>> {
        Ok(self.allocator.list_flights().await?)
    }

    /// Allocator counters against the bookings that consume seats. Read-only:
    /// correcting drift while holds are in flight could oversell.
    pub async fn audit_flight(&self, flight_id: Uuid) -> CoreResult<InventoryAudit> {
        let inventory = self.allocator.snapshot(flight_id).await?;
        let committed = self.quotes.committed_seats(flight_id).await?;
        let audit = InventoryAudit::new(&inventory, committed);
        if !audit.consistent {
            warn!(
                flight_id = %flight_id,
                total = audit.total_seats,
                available = audit.available_seats,
                committed_by_bookings = audit.committed_by_bookings,
                "Inventory counters disagree with bookings"
            );
        }
        Ok(audit)
    }

    pub fn subscribe_inventory(&self) -> broadcast::Receiver<InventoryChangedEvent> {
        self.inventory_tx.subscribe()
    }

    pub async fn get_quote(&self, id: Uuid) -> CoreResult<Quote> {
        self.quotes
            .get_quote(id)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("quote {}", id)))
    }

    pub async fn find_by_reference(&self, reference_number: &str) -> CoreResult<Quote> {
        self.quotes
            .find_by_reference(reference_number)
            .await?
            .ok_or_else(|| CoreError::NotFoundError(format!("quote {}", reference_number)))
    }

    pub async fn payments_for(&self, quote_id: Uuid) -> CoreResult<Vec<Payment>> {
        Ok(self.payments.list_for_quote(quote_id).await?)
    }

    pub async fn deliveries_for(&self, quote_id: Uuid) -> CoreResult<Vec<SideEffect>> {
        Ok(self.effects.outbox().list_for_quote(quote_id).await?)
    }

    pub async fn submit(&self, request: SubmitQuote) -> CoreResult<Quote> {
        let now = self.clock.now();

        match request {
            SubmitQuote::EmptyLeg {
                flight_id,
                seats_requested,
                contact,
            } => {
                if seats_requested == 0 {
                    return Err(CoreError::ValidationError("seatsRequested must be at least 1".into()));
                }
                contact.validate()?;

                let inventory = self.allocator.hold(flight_id, seats_requested).await?;
                self.broadcast_inventory(&inventory);

                let hold = SeatHold {
                    flight_id,
                    seats: seats_requested,
                };
                let quote = match self
                    .insert_with_reference(QuoteKind::EmptyLeg, |reference| {
                        Quote::pending(
                            reference,
                            QuoteKind::EmptyLeg,
                            seats_requested,
                            contact.clone(),
                            Some(flight_id),
                            None,
                            Some(inventory.departure_at),
                            now,
                        )
                    })
                    .await
                {
                    Ok(quote) => quote,
                    Err(e) => {
                        self.release_seats(hold).await;
                        return Err(e);
                    }
                };

                self.after_transition(None, &quote, &Actor::Client, &[]).await;
                Ok(quote)
            }
            SubmitQuote::Charter {
                charter,
                departure_date_time,
                contact,
            } => {
                charter.validate()?;
                contact.validate()?;
                if let Some(departure) = departure_date_time {
                    if departure <= now {
                        return Err(CoreError::ValidationError(
                            "departureDateTime must be in the future".into(),
                        ));
                    }
                }

                let quote = self
                    .insert_with_reference(QuoteKind::Charter, |reference| {
                        Quote::pending(
                            reference,
                            QuoteKind::Charter,
                            charter.passengers,
                            contact.clone(),
                            None,
                            Some(charter.clone()),
                            departure_date_time,
                            now,
                        )
                    })
                    .await?;

                self.after_transition(None, &quote, &Actor::Client, &[]).await;
                Ok(quote)
            }
        }
    }

    pub async fn approve(
        &self,
        id: Uuid,
        terms: ApprovalTerms,
        expected_version: u64,
        actor: &Actor,
    ) -> CoreResult<Quote> {
        let mut quote = self.get_quote(id).await?;
        let from = quote.status;
        let adjustment = transitions::approve(&mut quote, terms, expected_version, self.clock.now())?;

        match adjustment {
            SeatAdjustment::Hold(extra) => {
                let inventory = self.allocator.hold(extra.flight_id, extra.seats).await?;
                self.broadcast_inventory(&inventory);
            }
            SeatAdjustment::Commit(hold) => {
                if let Err(e) = self.allocator.commit(hold.flight_id, hold.seats).await {
                    warn!(quote = %quote.reference_number, error = %e, "Approving against drifted inventory");
                }
            }
            SeatAdjustment::Release(_) | SeatAdjustment::None => {}
        }

        let effects = self.side_effects(&quote, &[DocumentKind::QuoteConfirmation]).await;
        if let Err(e) = self
            .quotes
            .update_quote_with_effects(&quote, expected_version, &effects)
            .await
        {
            if let SeatAdjustment::Hold(extra) = adjustment {
                self.release_seats(extra).await;
            }
            return Err(e.into());
        }

        if let SeatAdjustment::Release(surplus) = adjustment {
            self.release_seats(surplus).await;
        }

        self.after_transition(Some(from), &quote, actor, &effects).await;
        Ok(quote)
    }

    pub async fn reject(
        &self,
        id: Uuid,
        reason: RejectionReason,
        note: Option<String>,
        expected_version: u64,
        actor: &Actor,
    ) -> CoreResult<Quote> {
        let mut quote = self.get_quote(id).await?;
        let from = quote.status;
        let hold = transitions::reject(&mut quote, reason, note, expected_version, self.clock.now())?;

        let effects = self.side_effects(&quote, &[DocumentKind::RejectionNotice]).await;
        self.quotes
            .update_quote_with_effects(&quote, expected_version, &effects)
            .await?;
        if let Some(hold) = hold {
            self.release_seats(hold).await;
        }

        self.after_transition(Some(from), &quote, actor, &effects).await;
        Ok(quote)
    }

    pub async fn resend(
        &self,
        id: Uuid,
        new_total_price_usd: Decimal,
        expected_version: u64,
        actor: &Actor,
    ) -> CoreResult<Quote> {
        let mut quote = self.get_quote(id).await?;
        let from = quote.status;
        transitions::resend(&mut quote, new_total_price_usd, expected_version, self.clock.now())?;

        let effects = self.side_effects(&quote, &[DocumentKind::UpdatedQuote]).await;
        self.quotes
            .update_quote_with_effects(&quote, expected_version, &effects)
            .await?;

        self.after_transition(Some(from), &quote, actor, &effects).await;
        Ok(quote)
    }

    /// Client proof of a bank transfer. Recorded as a pending payment for
    /// staff to verify through `confirm_payment`.
    pub async fn submit_receipt(&self, id: Uuid, receipt_ref: String) -> CoreResult<Quote> {
        let now = self.clock.now();
        let mut quote = self.get_quote(id).await?;
        let from = quote.status;
        let expected_version = quote.version;
        transitions::attach_receipt(&mut quote, receipt_ref, now)?;

        self.quotes.update_quote(&quote, expected_version).await?;

        let receipt = quote.receipt_ref.clone().unwrap_or_default();
        let amount = quote.total_price_usd.unwrap_or(Decimal::ZERO);
        if let Err(e) = self
            .payments
            .insert_payment(&Payment::from_receipt(quote.id, amount, receipt, now))
            .await
        {
            // confirm_payment settles from the quote's receipt when no row exists.
            error!(quote = %quote.reference_number, error = %e, "Failed to record receipt payment");
        }

        self.after_transition(Some(from), &quote, &Actor::Client, &[]).await;
        Ok(quote)
    }

    /// Gateway callback. Replaying a transaction returns the stored payment.
    pub async fn record_gateway_payment(&self, callback: GatewayPayment) -> CoreResult<Payment> {
        if callback.transaction_ref.trim().is_empty() {
            return Err(CoreError::ValidationError("transactionRef is required".into()));
        }
        if callback.amount_usd <= Decimal::ZERO {
            return Err(CoreError::ValidationError("amountUsd must be greater than zero".into()));
        }

        if let Some(existing) = self.existing_payment(&callback).await? {
            return Ok(existing);
        }

        let quote = self.get_quote(callback.quote_id).await?;
        if callback.succeeded && quote.status != QuoteStatus::Approved {
            warn!(
                quote = %quote.reference_number,
                status = %quote.status,
                transaction_ref = %callback.transaction_ref,
                "Gateway payment succeeded for a quote that is not awaiting payment"
            );
        }

        let payment = Payment::from_gateway(
            quote.id,
            callback.amount_usd,
            callback.transaction_ref.clone(),
            callback.succeeded,
            self.clock.now(),
        );
        match self.payments.insert_payment(&payment).await {
            Ok(()) => {
                info!(
                    quote = %quote.reference_number,
                    status = payment.status.as_str(),
                    amount_usd = %payment.amount_usd,
                    "Gateway payment recorded"
                );
                Ok(payment)
            }
            // Lost a race with a concurrent replay of the same callback.
            Err(StoreError::Duplicate(_)) => self
                .existing_payment(&callback)
                .await?
                .ok_or_else(|| CoreError::InternalError("duplicate payment vanished".into())),
            Err(e) => Err(e.into()),
        }
    }

    async fn existing_payment(&self, callback: &GatewayPayment) -> CoreResult<Option<Payment>> {
        match self.payments.find_by_transaction_ref(&callback.transaction_ref).await? {
            Some(existing) if existing.quote_id != callback.quote_id => Err(CoreError::StateConflict(format!(
                "transaction {} belongs to another quote",
                callback.transaction_ref
            ))),
            Some(existing) => {
                debug!(transaction_ref = %callback.transaction_ref, "Gateway callback replayed");
                Ok(Some(existing))
            }
            None => Ok(None),
        }
    }

    pub async fn confirm_payment(&self, id: Uuid, expected_version: u64, actor: &Actor) -> CoreResult<Quote> {
        let now = self.clock.now();
        let mut quote = self.get_quote(id).await?;
        let from = quote.status;
        let payments = self.payments.list_for_quote(id).await?;
        let settled = payments.iter().any(Payment::is_settled);

        transitions::confirm_payment(&mut quote, expected_version, settled, now)?;

        // Staff verified the transfer: settle the receipt before the record moves.
        if !settled {
            let pending = payments
                .into_iter()
                .find(|p| p.status == PaymentStatus::Pending && p.receipt_ref.is_some());
            match pending {
                Some(mut payment) => {
                    payment.mark_succeeded(now)?;
                    self.payments.settle_payment(&payment).await?;
                }
                None => {
                    let mut payment = Payment::from_receipt(
                        quote.id,
                        quote.total_price_usd.unwrap_or(Decimal::ZERO),
                        quote.receipt_ref.clone().unwrap_or_default(),
                        now,
                    );
                    payment.mark_succeeded(now)?;
                    self.payments.insert_payment(&payment).await?;
                }
            }
        }

        let effects = self
            .side_effects(&quote, &[DocumentKind::FlightConfirmation, DocumentKind::PaymentReceipt])
            .await;
        self.quotes
            .update_quote_with_effects(&quote, expected_version, &effects)
            .await?;

        self.after_transition(Some(from), &quote, actor, &effects).await;
        Ok(quote)
    }

    /// Post-flight. Seats stay committed.
    pub async fn complete(&self, id: Uuid, expected_version: u64, actor: &Actor) -> CoreResult<Quote> {
        let mut quote = self.get_quote(id).await?;
        let from = quote.status;
        transitions::complete(&mut quote, expected_version, self.clock.now())?;

        self.quotes.update_quote(&quote, expected_version).await?;

        self.after_transition(Some(from), &quote, actor, &[]).await;
        Ok(quote)
    }

    /// System-only. Idempotent: a second call reports `AlreadyExpired`.
    pub async fn expire(&self, id: Uuid) -> CoreResult<ExpireOutcome> {
        for attempt in 0..=self.policy.expire_retries {
            let now = self.clock.now();
            let mut quote = self.get_quote(id).await?;

            match transitions::expiry_check(&quote, now, self.policy.unconfirmed_hold_ttl) {
                ExpiryCheck::AlreadyExpired => return Ok(ExpireOutcome::AlreadyExpired),
                ExpiryCheck::NotEligible => return Ok(ExpireOutcome::NotEligible),
                ExpiryCheck::Eligible => {}
            }

            let from = quote.status;
            let expected_version = quote.version;
            let hold = transitions::expire(&mut quote, now)?;

            match self.quotes.update_quote(&quote, expected_version).await {
                Ok(()) => {
                    if let Some(hold) = hold {
                        self.release_seats(hold).await;
                    }
                    self.after_transition(Some(from), &quote, &Actor::System, &[]).await;
                    return Ok(ExpireOutcome::Expired);
                }
                Err(StoreError::VersionConflict { expected, actual }) => {
                    debug!(
                        quote = %quote.reference_number,
                        expected,
                        actual,
                        attempt,
                        "Expire raced a concurrent transition, re-reading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::StateConflict(format!(
            "quote {} kept changing while expiring",
            id
        )))
    }

    pub async fn expiry_candidates(&self) -> CoreResult<Vec<Quote>> {
        let now = self.clock.now();
        Ok(self
            .quotes
            .list_expirable(now, now - self.policy.unconfirmed_hold_ttl)
            .await?)
    }

    async fn insert_with_reference<F>(&self, kind: QuoteKind, build: F) -> CoreResult<Quote>
    where
        F: Fn(String) -> Quote,
    {
        for _ in 0..self.policy.max_reference_attempts {
            let quote = build(self.references.generate(kind, self.clock.now()));
            match self.quotes.insert_quote(&quote).await {
                Ok(()) => return Ok(quote),
                Err(StoreError::Duplicate(what)) => {
                    debug!(duplicate = %what, "Reference number collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CoreError::InternalError(
            "could not allocate a unique reference number".into(),
        ))
    }

    /// Gives seats back, retrying transient backend failures. A release that
    /// still fails shows up in the flight's audit.
    async fn release_seats(&self, hold: SeatHold) {
        for attempt in 1..=self.policy.release_retries {
            match self.allocator.release(hold.flight_id, hold.seats).await {
                Ok(inventory) => {
                    self.broadcast_inventory(&inventory);
                    return;
                }
                Err(InventoryError::NotFound(flight_id)) => {
                    warn!(flight_id = %flight_id, seats = hold.seats, "Released seats on an unknown flight");
                    return;
                }
                Err(e) if attempt < self.policy.release_retries => {
                    warn!(flight_id = %hold.flight_id, attempt, error = %e, "Seat release failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => {
                    error!(
                        flight_id = %hold.flight_id,
                        seats = hold.seats,
                        error = %e,
                        "Seat release failed, inventory needs reconciliation"
                    );
                }
            }
        }
    }

    fn broadcast_inventory(&self, inventory: &FlightInventory) {
        // No subscribers is fine.
        let _ = self.inventory_tx.send(InventoryChangedEvent {
            flight_id: inventory.flight_id,
            total_seats: inventory.total_seats,
            available_seats: inventory.available_seats,
            timestamp: inventory.updated_at.timestamp(),
        });
    }

    /// Documents owed by the transition `quote` is about to commit, keyed by
    /// its new version.
    async fn side_effects(&self, quote: &Quote, documents: &[DocumentKind]) -> Vec<SideEffect> {
        let now = self.clock.now();
        let mut effects = Vec::with_capacity(documents.len());
        for kind in documents {
            let request = self.document_request(*kind, quote).await;
            effects.push(SideEffect::new(request, quote.version, now));
        }
        effects
    }

    async fn after_transition(
        &self,
        from: Option<QuoteStatus>,
        quote: &Quote,
        actor: &Actor,
        effects: &[SideEffect],
    ) {
        info!(
            quote = %quote.reference_number,
            from = from.map(|s| s.as_str()).unwrap_or("NONE"),
            to = %quote.status,
            version = quote.version,
            actor = %actor,
            queued = effects.len(),
            "Quote transitioned"
        );

        let event = QuoteTransitionedEvent {
            quote_id: quote.id,
            reference_number: quote.reference_number.clone(),
            kind: quote.kind.as_str().to_string(),
            from_status: from.map(|s| s.as_str()).unwrap_or("NONE").to_string(),
            to_status: quote.status.as_str().to_string(),
            version: quote.version,
            actor: actor.to_string(),
            flight_id: quote.flight_id,
            seats: quote.seats_requested,
            timestamp: quote.updated_at.timestamp(),
        };
        if let Err(e) = self.publisher.publish_transition(&event).await {
            warn!(quote = %quote.reference_number, error = %e, "Failed to publish transition event");
        }

        if !effects.is_empty() {
            self.effects.wake();
        }
    }

    async fn document_request(&self, kind: DocumentKind, quote: &Quote) -> DocumentRequest {
        let (origin, destination, aircraft, flight_departure) = match (&quote.charter, quote.flight_id) {
            (Some(charter), _) => (
                Some(charter.origin.clone()),
                Some(charter.destination.clone()),
                charter.aircraft_id.map(|id| id.to_string()),
                None,
            ),
            (None, Some(flight_id)) => match self.allocator.snapshot(flight_id).await {
                Ok(flight) => (
                    Some(flight.origin),
                    Some(flight.destination),
                    Some(flight.aircraft),
                    Some(flight.departure_at),
                ),
                Err(e) => {
                    warn!(flight_id = %flight_id, error = %e, "Flight details unavailable for document");
                    (None, None, None, None)
                }
            },
            (None, None) => (None, None, None, None),
        };

        DocumentRequest {
            kind,
            quote_id: quote.id,
            reference_number: quote.reference_number.clone(),
            client_contact: quote.client_contact.clone(),
            origin,
            destination,
            aircraft,
            departure_at: quote.departure_date_time.or(flight_departure),
            seats: quote.seats_requested,
            total_price_usd: quote.total_price_usd,
            payment_deadline: quote.payment_deadline,
            bank_details: quote.bank_details.clone(),
            rejection_reason: quote.rejection_reason,
            rejection_note: quote.rejection_note.clone(),
        }
    }
}
