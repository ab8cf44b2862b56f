use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::lifecycle::{ExpireOutcome, QuoteLifecycle};
use jetset_core::CoreResult;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub scanned: usize,
    pub expired: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Periodically expires approved quotes past their payment deadline and
/// abandoned pending holds. Several reapers may run at once; `expire` is
/// idempotent and version-guarded.
pub struct DeadlineReaper {
    lifecycle: Arc<QuoteLifecycle>,
    interval: Duration,
}

impl DeadlineReaper {
    pub fn new(lifecycle: Arc<QuoteLifecycle>, interval: Duration) -> Self {
        Self { lifecycle, interval }
    }

    pub async fn sweep_once(&self) -> CoreResult<ReapReport> {
        let candidates = self.lifecycle.expiry_candidates().await?;
        let mut report = ReapReport {
            scanned: candidates.len(),
            ..ReapReport::default()
        };

        for quote in candidates {
            match self.lifecycle.expire(quote.id).await {
                Ok(ExpireOutcome::Expired) => report.expired += 1,
                Ok(ExpireOutcome::AlreadyExpired | ExpireOutcome::NotEligible) => report.skipped += 1,
                Err(e) => {
                    warn!(quote = %quote.reference_number, error = %e, "Failed to expire quote");
                    report.failed += 1;
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "Reaper sweep finished"
            );
        }
        Ok(report)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Deadline reaper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!("Reaper sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Deadline reaper stopped");
    }
}
