use chrono::Duration;
use jetset_core::documents::{DocumentGenerator, Notifier, RenderedDocument};
use jetset_core::effects::SideEffect;
use jetset_core::repository::EffectOutbox;
use jetset_core::{Clock, CoreError, CoreResult};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

/// Shared by the lifecycle and the dispatcher. The lifecycle commits effects
/// through the quote store and then wakes the dispatcher here, so committing
/// never waits on document or notification I/O.
#[derive(Clone)]
pub struct DispatchHandle {
    outbox: Arc<dyn EffectOutbox>,
    wake: Arc<Notify>,
}

impl DispatchHandle {
    pub fn new(outbox: Arc<dyn EffectOutbox>) -> Self {
        Self {
            outbox,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Called after new effects are committed. The poll interval still picks
    /// them up if no worker is waiting.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn outbox(&self) -> Arc<dyn EffectOutbox> {
        self.outbox.clone()
    }
}

#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub lease: Duration,
    pub batch_size: usize,
    pub poll_interval: std::time::Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::seconds(2),
            max_backoff: Duration::minutes(5),
            lease: Duration::seconds(60),
            batch_size: 16,
            poll_interval: std::time::Duration::from_secs(5),
        }
    }
}

impl DispatchPolicy {
    /// `base * 2^(attempts - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.base_backoff * 2i32.pow(exponent);
        delay.min(self.max_backoff)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Drains the outbox: render, deliver, then record the outcome.
pub struct SideEffectDispatcher {
    handle: DispatchHandle,
    documents: Arc<dyn DocumentGenerator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    policy: DispatchPolicy,
}

impl SideEffectDispatcher {
    pub fn new(
        handle: DispatchHandle,
        documents: Arc<dyn DocumentGenerator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            handle,
            documents,
            notifier,
            clock,
            policy,
        }
    }

    pub async fn run_once(&self) -> CoreResult<DispatchReport> {
        let now = self.clock.now();
        let claimed = self
            .handle
            .outbox
            .claim_due(now, self.policy.batch_size, now + self.policy.lease)
            .await?;

        let mut report = DispatchReport::default();
        for effect in claimed {
            match self.deliver(&effect).await {
                Ok(()) => {
                    self.handle.outbox.mark_delivered(effect.id, self.clock.now()).await?;
                    info!(
                        quote_id = %effect.quote_id,
                        kind = effect.kind.as_str(),
                        attempts = effect.attempts,
                        "Side effect delivered"
                    );
                    report.delivered += 1;
                }
                Err(e) if effect.attempts >= self.policy.max_attempts => {
                    self.handle
                        .outbox
                        .mark_failed(effect.id, &e.to_string(), self.clock.now())
                        .await?;
                    error!(
                        quote_id = %effect.quote_id,
                        kind = effect.kind.as_str(),
                        attempts = effect.attempts,
                        error = %e,
                        "Side effect failed permanently"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    let now = self.clock.now();
                    let next = now + self.policy.backoff(effect.attempts);
                    self.handle
                        .outbox
                        .schedule_retry(effect.id, &e.to_string(), next, now)
                        .await?;
                    warn!(
                        quote_id = %effect.quote_id,
                        kind = effect.kind.as_str(),
                        attempts = effect.attempts,
                        next_attempt_at = %next,
                        error = %e,
                        "Side effect failed, retry scheduled"
                    );
                    report.retried += 1;
                }
            }
        }
        Ok(report)
    }

    async fn deliver(&self, effect: &SideEffect) -> CoreResult<()> {
        let document = match &effect.document_url {
            Some(url) => RenderedDocument {
                kind: effect.kind,
                url: url.clone(),
            },
            None => {
                let rendered = self.documents.render(&effect.payload).await?;
                self.handle.outbox.record_document(effect.id, &rendered.url).await?;
                rendered
            }
        };

        let receipts = self
            .notifier
            .deliver(&effect.payload.client_contact, &document, &effect.payload)
            .await?;
        if receipts.is_empty() {
            return Err(CoreError::ExternalServiceError("notifier reached no channel".into()));
        }
        Ok(())
    }

    /// Worker loop. Wakes on commit, on the poll interval, or on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.policy.poll_interval.as_secs(),
            max_attempts = self.policy.max_attempts,
            "Side-effect dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(report) if report != DispatchReport::default() => {
                    debug!(
                        delivered = report.delivered,
                        retried = report.retried,
                        failed = report.failed,
                        "Dispatch pass finished"
                    );
                    // A full batch likely means more work is due.
                    continue;
                }
                Ok(_) => {}
                Err(e) => error!("Dispatch pass failed: {}", e),
            }

            tokio::select! {
                _ = self.handle.wake.notified() => {}
                _ = tokio::time::sleep(self.policy.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Side-effect dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryEffectOutbox;
    use async_trait::async_trait;
    use chrono::Utc;
    use jetset_core::documents::{DeliveryReceipt, DocumentKind, DocumentRequest};
    use jetset_core::effects::EffectStatus;
    use jetset_core::{ClientContact, ManualClock};
    use jetset_shared::Masked;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct CountingGenerator {
        renders: AtomicU32,
    }

    #[async_trait]
    impl DocumentGenerator for CountingGenerator {
        async fn render(&self, request: &DocumentRequest) -> CoreResult<RenderedDocument> {
            let n = self.renders.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(RenderedDocument {
                kind: request.kind,
                url: format!("https://docs.example.com/{}/{}.pdf", request.reference_number, n),
            })
        }
    }

    /// Fails the first `failures` deliveries.
    struct FlakyNotifier {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn deliver(
            &self,
            _contact: &ClientContact,
            _document: &RenderedDocument,
            _request: &DocumentRequest,
        ) -> CoreResult<Vec<DeliveryReceipt>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CoreError::ExternalServiceError("smtp timeout".into()));
            }
            Ok(vec![DeliveryReceipt {
                channel: "email".into(),
                provider_ref: Some(format!("msg-{}", call)),
            }])
        }
    }

    fn request() -> DocumentRequest {
        DocumentRequest {
            kind: DocumentKind::QuoteConfirmation,
            quote_id: Uuid::new_v4(),
            reference_number: "EL-260101-AAAAA".into(),
            client_contact: ClientContact {
                name: "Lena Park".into(),
                email: Some(Masked::new("lena@example.com".into())),
                phone: None,
            },
            origin: Some("OMDB".into()),
            destination: Some("LFMN".into()),
            aircraft: Some("Gulfstream G650".into()),
            departure_at: None,
            seats: 2,
            total_price_usd: None,
            payment_deadline: None,
            bank_details: None,
            rejection_reason: None,
            rejection_note: None,
        }
    }

    struct Fixture {
        outbox: Arc<InMemoryEffectOutbox>,
        handle: DispatchHandle,
        generator: Arc<CountingGenerator>,
        notifier: Arc<FlakyNotifier>,
        clock: Arc<ManualClock>,
        dispatcher: SideEffectDispatcher,
    }

    fn fixture(failures: u32, max_attempts: u32) -> Fixture {
        let outbox = Arc::new(InMemoryEffectOutbox::new());
        let handle = DispatchHandle::new(outbox.clone());
        let generator = Arc::new(CountingGenerator { renders: AtomicU32::new(0) });
        let notifier = Arc::new(FlakyNotifier {
            failures,
            calls: AtomicU32::new(0),
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let policy = DispatchPolicy {
            max_attempts,
            ..DispatchPolicy::default()
        };
        let dispatcher =
            SideEffectDispatcher::new(handle.clone(), generator.clone(), notifier.clone(), clock.clone(), policy);
        Fixture {
            outbox,
            handle,
            generator,
            notifier,
            clock,
            dispatcher,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.backoff(1), Duration::seconds(2));
        assert_eq!(policy.backoff(2), Duration::seconds(4));
        assert_eq!(policy.backoff(4), Duration::seconds(16));
        assert_eq!(policy.backoff(30), Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_retry_then_success_without_rerender() {
        let f = fixture(1, 5);
        let effect = SideEffect::new(request(), 2, f.clock.now());
        f.outbox.append(&[effect.clone()]).await;

        let first = f.dispatcher.run_once().await.unwrap();
        assert_eq!(first.retried, 1);

        // Not due yet
        assert_eq!(f.dispatcher.run_once().await.unwrap(), DispatchReport::default());

        f.clock.advance(Duration::seconds(3));
        let second = f.dispatcher.run_once().await.unwrap();
        assert_eq!(second.delivered, 1);

        let stored = f.outbox.list_for_quote(effect.quote_id).await.unwrap();
        assert_eq!(stored[0].status, EffectStatus::Delivered);
        assert_eq!(stored[0].attempts, 2);
        assert_eq!(f.generator.renders.load(Ordering::SeqCst), 1);
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_failure_marked_failed() {
        let f = fixture(u32::MAX, 2);
        let effect = SideEffect::new(request(), 2, f.clock.now());
        f.outbox.append(&[effect.clone()]).await;

        assert_eq!(f.dispatcher.run_once().await.unwrap().retried, 1);
        f.clock.advance(Duration::minutes(1));
        assert_eq!(f.dispatcher.run_once().await.unwrap().failed, 1);

        let stored = f.outbox.list_for_quote(effect.quote_id).await.unwrap();
        assert_eq!(stored[0].status, EffectStatus::Failed);
        assert_eq!(stored[0].last_error.as_deref(), Some("External service error: smtp timeout"));

        // Nothing left to do
        f.clock.advance(Duration::hours(1));
        assert_eq!(f.dispatcher.run_once().await.unwrap(), DispatchReport::default());
    }

    #[tokio::test]
    async fn test_duplicate_effect_delivered_once() {
        let f = fixture(0, 5);
        let now = f.clock.now();
        let payload = request();
        let added = f
            .outbox
            .append(&[SideEffect::new(payload.clone(), 3, now), SideEffect::new(payload, 3, now)])
            .await;
        assert_eq!(added, 1);

        assert_eq!(f.dispatcher.run_once().await.unwrap().delivered, 1);
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wake_starts_a_pass_before_the_poll_interval() {
        let f = fixture(0, 5);
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(f.dispatcher.run(rx));
        // Let the first empty pass finish so the worker is parked
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        f.outbox.append(&[SideEffect::new(request(), 2, f.clock.now())]).await;
        f.handle.wake();

        let notifier = f.notifier.clone();
        tokio::time::timeout(std::time::Duration::from_secs(2), async move {
            while notifier.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("woken dispatcher should deliver");

        tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(0, 5);
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(f.dispatcher.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), worker)
            .await
            .expect("dispatcher should stop")
            .unwrap();
    }
}
