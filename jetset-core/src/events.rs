use async_trait::async_trait;
use jetset_shared::models::events::QuoteTransitionedEvent;

use crate::CoreResult;

/// Outbound stream of lifecycle transitions for downstream consumers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_transition(&self, event: &QuoteTransitionedEvent) -> CoreResult<()>;
}

/// Used when no broker is configured.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish_transition(&self, event: &QuoteTransitionedEvent) -> CoreResult<()> {
        tracing::debug!(
            quote = %event.reference_number,
            to = %event.to_status,
            "No event broker configured, dropping transition event"
        );
        Ok(())
    }
}
