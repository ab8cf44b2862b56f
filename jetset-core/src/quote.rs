use chrono::{DateTime, Utc};
use jetset_shared::Masked;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::inventory::SeatHold;
use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteKind {
    Charter,
    EmptyLeg,
}

impl QuoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteKind::Charter => "CHARTER",
            QuoteKind::EmptyLeg => "EMPTY_LEG",
        }
    }

    pub fn reference_prefix(&self) -> &'static str {
        match self {
            QuoteKind::Charter => "CH",
            QuoteKind::EmptyLeg => "EL",
        }
    }

    /// Maps the `{kind}` URL segment (`empty-leg`, `charter`).
    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "empty-leg" => Some(QuoteKind::EmptyLeg),
            "charter" => Some(QuoteKind::Charter),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHARTER" => Ok(QuoteKind::Charter),
            "EMPTY_LEG" => Ok(QuoteKind::EmptyLeg),
            other => Err(CoreError::ValidationError(format!("unknown quote kind {}", other))),
        }
    }
}

/// Quote/booking status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Pending,
    Approved,
    Paid,
    Completed,
    Rejected,
    Expired,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 6] = [
        QuoteStatus::Pending,
        QuoteStatus::Approved,
        QuoteStatus::Paid,
        QuoteStatus::Completed,
        QuoteStatus::Rejected,
        QuoteStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "PENDING",
            QuoteStatus::Approved => "APPROVED",
            QuoteStatus::Paid => "PAID",
            QuoteStatus::Completed => "COMPLETED",
            QuoteStatus::Rejected => "REJECTED",
            QuoteStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Rejected | QuoteStatus::Expired | QuoteStatus::Completed
        )
    }

    /// Whether a booking in this state counts against its flight's inventory.
    /// Completed bookings keep their seats: a flown leg never reopens.
    pub fn holds_seats(&self) -> bool {
        matches!(
            self,
            QuoteStatus::Pending | QuoteStatus::Approved | QuoteStatus::Paid | QuoteStatus::Completed
        )
    }

    /// The transition table. `Approved -> Approved` is the resend self-loop.
    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        use QuoteStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Expired)
                | (Approved, Approved)
                | (Approved, Paid)
                | (Approved, Rejected)
                | (Approved, Expired)
                | (Paid, Completed)
        )
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuoteStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::ValidationError(format!("unknown quote status {}", s)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    AircraftUnavailable,
    CrewUnavailable,
    RouteNotServiceable,
    PriceNotAgreed,
    ScheduleConflict,
    ClientRequest,
    DuplicateRequest,
    Other,
}

pub const REJECTION_REASONS: [RejectionReason; 8] = [
    RejectionReason::AircraftUnavailable,
    RejectionReason::CrewUnavailable,
    RejectionReason::RouteNotServiceable,
    RejectionReason::PriceNotAgreed,
    RejectionReason::ScheduleConflict,
    RejectionReason::ClientRequest,
    RejectionReason::DuplicateRequest,
    RejectionReason::Other,
];

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::AircraftUnavailable => "AIRCRAFT_UNAVAILABLE",
            RejectionReason::CrewUnavailable => "CREW_UNAVAILABLE",
            RejectionReason::RouteNotServiceable => "ROUTE_NOT_SERVICEABLE",
            RejectionReason::PriceNotAgreed => "PRICE_NOT_AGREED",
            RejectionReason::ScheduleConflict => "SCHEDULE_CONFLICT",
            RejectionReason::ClientRequest => "CLIENT_REQUEST",
            RejectionReason::DuplicateRequest => "DUPLICATE_REQUEST",
            RejectionReason::Other => "OTHER",
        }
    }

    pub fn requires_note(&self) -> bool {
        matches!(self, RejectionReason::Other)
    }
}

impl FromStr for RejectionReason {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REJECTION_REASONS
            .iter()
            .copied()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "rejection reason must be one of {}",
                    REJECTION_REASONS
                        .iter()
                        .map(|r| r.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientContact {
    pub name: String,
    #[serde(default)]
    pub email: Option<Masked<String>>,
    #[serde(default)]
    pub phone: Option<Masked<String>>,
}

impl ClientContact {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ValidationError("contact name is required".into()));
        }

        let email = self.email.as_ref().map(|e| e.expose().trim()).filter(|e| !e.is_empty());
        let phone = self.phone.as_ref().map(|p| p.expose().trim()).filter(|p| !p.is_empty());

        if email.is_none() && phone.is_none() {
            return Err(CoreError::ValidationError(
                "contact needs an email or a phone number".into(),
            ));
        }

        if let Some(email) = email {
            let valid = email
                .split_once('@')
                .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
                .unwrap_or(false);
            if !valid {
                return Err(CoreError::ValidationError("contact email is malformed".into()));
            }
        }

        if let Some(phone) = phone {
            let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
            let allowed = phone
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
            if digits < 7 || !allowed {
                return Err(CoreError::ValidationError("contact phone is malformed".into()));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub account_name: String,
    pub bank_name: String,
    pub account_number: String,
    #[serde(default)]
    pub iban: Option<String>,
    #[serde(default)]
    pub swift_code: Option<String>,
}

impl BankDetails {
    pub fn validate(&self) -> CoreResult<()> {
        for (field, value) in [
            ("accountName", &self.account_name),
            ("bankName", &self.bank_name),
            ("accountNumber", &self.account_number),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::ValidationError(format!("bankDetails.{} is required", field)));
            }
        }
        Ok(())
    }
}

/// Route request for a full charter. Charters have no shared inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CharterRequest {
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub aircraft_id: Option<Uuid>,
    pub passengers: u32,
}

impl CharterRequest {
    pub fn validate(&self) -> CoreResult<()> {
        let origin = self.origin.trim();
        let destination = self.destination.trim();
        if origin.is_empty() || destination.is_empty() {
            return Err(CoreError::ValidationError("origin and destination are required".into()));
        }
        if origin.eq_ignore_ascii_case(destination) {
            return Err(CoreError::ValidationError("origin and destination must differ".into()));
        }
        if self.passengers == 0 {
            return Err(CoreError::ValidationError("passengers must be at least 1".into()));
        }
        Ok(())
    }
}

/// A charter quote or an empty-leg booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: Uuid,
    pub reference_number: String,
    pub kind: QuoteKind,
    pub status: QuoteStatus,
    pub flight_id: Option<Uuid>,
    pub charter: Option<CharterRequest>,
    pub seats_requested: u32,
    pub total_price_usd: Option<Decimal>,
    pub payment_deadline: Option<DateTime<Utc>>,
    pub bank_details: Option<BankDetails>,
    pub departure_date_time: Option<DateTime<Utc>>,
    pub client_contact: ClientContact,
    pub receipt_ref: Option<String>,
    pub rejection_reason: Option<RejectionReason>,
    pub rejection_note: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    /// A freshly submitted record, entered in `Pending` at version 1.
    pub fn pending(
        reference_number: String,
        kind: QuoteKind,
        seats_requested: u32,
        client_contact: ClientContact,
        flight_id: Option<Uuid>,
        charter: Option<CharterRequest>,
        departure_date_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            reference_number,
            kind,
            status: QuoteStatus::Pending,
            flight_id,
            charter,
            seats_requested,
            total_price_usd: None,
            payment_deadline: None,
            bank_details: None,
            departure_date_time,
            client_contact,
            receipt_ref: None,
            rejection_reason: None,
            rejection_note: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The seats this record keeps against a flight, if any.
    pub fn seat_hold(&self) -> Option<SeatHold> {
        self.flight_id.map(|flight_id| SeatHold {
            flight_id,
            seats: self.seats_requested,
        })
    }

    pub fn ensure_version(&self, expected_version: u64) -> CoreResult<()> {
        if self.version != expected_version {
            return Err(CoreError::StateConflict(format!(
                "quote {} is at version {}, expected {}",
                self.reference_number, self.version, expected_version
            )));
        }
        Ok(())
    }

    pub fn ensure_transition(&self, next: QuoteStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::StateConflict(format!(
                "quote {} is {}, cannot move to {}",
                self.reference_number, self.status, next
            )));
        }
        Ok(())
    }

    /// Bump the optimistic concurrency token after a mutation.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> ClientContact {
        ClientContact {
            name: "Jane Doe".into(),
            email: Some(Masked::new("jane@example.com".into())),
            phone: None,
        }
    }

    #[test]
    fn test_transition_table() {
        use QuoteStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Completed));

        assert!(!Pending.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Rejected));
        assert!(!Paid.can_transition_to(Expired));
        for terminal in [Rejected, Expired, Completed] {
            assert!(terminal.is_terminal());
            for next in QuoteStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_seat_consuming_states() {
        assert!(QuoteStatus::Pending.holds_seats());
        assert!(QuoteStatus::Paid.holds_seats());
        assert!(!QuoteStatus::Rejected.holds_seats());
        assert!(!QuoteStatus::Expired.holds_seats());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in QuoteStatus::ALL {
            assert_eq!(status.as_str().parse::<QuoteStatus>().unwrap(), status);
        }
        assert!("CANCELLED".parse::<QuoteStatus>().is_err());
    }

    #[test]
    fn test_rejection_reason_parsing() {
        assert_eq!(
            "AIRCRAFT_UNAVAILABLE".parse::<RejectionReason>().unwrap(),
            RejectionReason::AircraftUnavailable
        );
        let err = "BAD_VIBES".parse::<RejectionReason>().unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert!(RejectionReason::Other.requires_note());
    }

    #[test]
    fn test_contact_validation() {
        assert!(contact().validate().is_ok());

        let mut no_channel = contact();
        no_channel.email = None;
        assert!(no_channel.validate().is_err());

        let mut bad_email = contact();
        bad_email.email = Some(Masked::new("jane.example.com".into()));
        assert!(bad_email.validate().is_err());

        let mut phone_only = contact();
        phone_only.email = None;
        phone_only.phone = Some(Masked::new("+971 50 123 4567".into()));
        assert!(phone_only.validate().is_ok());
    }

    #[test]
    fn test_stale_version_is_a_conflict() {
        let quote = Quote::pending(
            "EL-260101-ABCDE".into(),
            QuoteKind::EmptyLeg,
            2,
            contact(),
            Some(Uuid::new_v4()),
            None,
            None,
            Utc::now(),
        );
        assert!(quote.ensure_version(1).is_ok());
        assert!(matches!(quote.ensure_version(2), Err(CoreError::StateConflict(_))));
        assert_eq!(quote.seat_hold().unwrap().seats, 2);
    }
}
