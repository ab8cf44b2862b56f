use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::documents::{DocumentKind, DocumentRequest};
use crate::CoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectStatus {
    Pending,
    InFlight,
    Delivered,
    Failed,
}

impl EffectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectStatus::Pending => "PENDING",
            EffectStatus::InFlight => "IN_FLIGHT",
            EffectStatus::Delivered => "DELIVERED",
            EffectStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for EffectStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(EffectStatus::Pending),
            "IN_FLIGHT" => Ok(EffectStatus::InFlight),
            "DELIVERED" => Ok(EffectStatus::Delivered),
            "FAILED" => Ok(EffectStatus::Failed),
            other => Err(CoreError::ValidationError(format!("unknown effect status {}", other))),
        }
    }
}

/// One unit of follow-up work (render + notify) queued by a committed transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SideEffect {
    pub id: Uuid,
    pub quote_id: Uuid,
    pub kind: DocumentKind,
    pub idempotency_key: String,
    pub payload: DocumentRequest,
    pub status: EffectStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub document_url: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SideEffect {
    /// `version` is the quote version the transition produced; together with the
    /// kind it makes re-enqueueing the same transition a no-op.
    pub fn new(payload: DocumentRequest, version: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            quote_id: payload.quote_id,
            kind: payload.kind,
            idempotency_key: idempotency_key(payload.quote_id, payload.kind, version),
            payload,
            status: EffectStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            lease_until: None,
            document_url: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claimable: pending and due, or in flight with a lapsed lease.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            EffectStatus::Pending => self.next_attempt_at <= now,
            EffectStatus::InFlight => self.lease_until.map(|lease| lease <= now).unwrap_or(true),
            EffectStatus::Delivered | EffectStatus::Failed => false,
        }
    }
}

pub fn idempotency_key(quote_id: Uuid, kind: DocumentKind, version: u64) -> String {
    format!("{}:{}:{}", quote_id, kind.as_str(), version)
}
