use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::quote::{BankDetails, ClientContact, RejectionReason};
use crate::{CoreError, CoreResult};

/// Which document a transition asks the external generator to render.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentKind {
    QuoteConfirmation,
    UpdatedQuote,
    RejectionNotice,
    FlightConfirmation,
    PaymentReceipt,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::QuoteConfirmation => "QUOTE_CONFIRMATION",
            DocumentKind::UpdatedQuote => "UPDATED_QUOTE",
            DocumentKind::RejectionNotice => "REJECTION_NOTICE",
            DocumentKind::FlightConfirmation => "FLIGHT_CONFIRMATION",
            DocumentKind::PaymentReceipt => "PAYMENT_RECEIPT",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUOTE_CONFIRMATION" => Ok(DocumentKind::QuoteConfirmation),
            "UPDATED_QUOTE" => Ok(DocumentKind::UpdatedQuote),
            "REJECTION_NOTICE" => Ok(DocumentKind::RejectionNotice),
            "FLIGHT_CONFIRMATION" => Ok(DocumentKind::FlightConfirmation),
            "PAYMENT_RECEIPT" => Ok(DocumentKind::PaymentReceipt),
            other => Err(CoreError::ValidationError(format!("unknown document kind {}", other))),
        }
    }
}

/// Everything the document generator needs, snapshotted when the transition commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRequest {
    pub kind: DocumentKind,
    pub quote_id: Uuid,
    pub reference_number: String,
    pub client_contact: ClientContact,
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub aircraft: Option<String>,
    pub departure_at: Option<DateTime<Utc>>,
    pub seats: u32,
    pub total_price_usd: Option<Decimal>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub bank_details: Option<BankDetails>,
    pub rejection_reason: Option<RejectionReason>,
    pub rejection_note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDocument {
    pub kind: DocumentKind,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub channel: String,
    pub provider_ref: Option<String>,
}

/// External PDF rendering service.
#[async_trait]
pub trait DocumentGenerator: Send + Sync {
    async fn render(&self, request: &DocumentRequest) -> CoreResult<RenderedDocument>;
}

/// External client messaging (email / WhatsApp).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(
        &self,
        contact: &ClientContact,
        document: &RenderedDocument,
        request: &DocumentRequest,
    ) -> CoreResult<Vec<DeliveryReceipt>>;
}
