//! Pure state-machine steps over a [`Quote`]. Each function validates the
//! requested transition against the current record, mutates it in place and
//! reports the inventory work the caller must perform. Nothing here touches
//! storage or the allocator.

use chrono::{DateTime, Duration, Utc};
use jetset_core::{
    BankDetails, ClientContact, CoreError, CoreResult, Quote, QuoteStatus, RejectionReason,
    SeatHold,
};
use rust_decimal::Decimal;

/// Staff-supplied terms for `Pending -> Approved`.
#[derive(Debug, Clone)]
pub struct ApprovalTerms {
    pub total_price_usd: Decimal,
    pub payment_deadline: DateTime<Utc>,
    pub bank_details: BankDetails,
    pub client_contact: Option<ClientContact>,
    pub departure_date_time: Option<DateTime<Utc>>,
    pub seats_requested: Option<u32>,
}

/// Inventory work implied by an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatAdjustment {
    /// Charter quote, nothing to do.
    None,
    /// Seat count unchanged: confirm the existing hold.
    Commit(SeatHold),
    /// Staff raised the seat count: hold the extra seats.
    Hold(SeatHold),
    /// Staff lowered the seat count: give the difference back.
    Release(SeatHold),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryCheck {
    Eligible,
    AlreadyExpired,
    NotEligible,
}

fn ensure_positive_price(price: Decimal) -> CoreResult<()> {
    if price <= Decimal::ZERO {
        return Err(CoreError::ValidationError("totalPriceUsd must be greater than zero".into()));
    }
    Ok(())
}

pub fn approve(
    quote: &mut Quote,
    terms: ApprovalTerms,
    expected_version: u64,
    now: DateTime<Utc>,
) -> CoreResult<SeatAdjustment> {
    ensure_positive_price(terms.total_price_usd)?;
    if terms.payment_deadline <= now {
        return Err(CoreError::ValidationError("paymentDeadline must be in the future".into()));
    }
    terms.bank_details.validate()?;
    if let Some(contact) = &terms.client_contact {
        contact.validate()?;
    }
    if terms.seats_requested == Some(0) {
        return Err(CoreError::ValidationError("seatsRequested must be at least 1".into()));
    }

    quote.ensure_transition(QuoteStatus::Approved)?;
    // Approved -> Approved is resend, not approve.
    if quote.status != QuoteStatus::Pending {
        return Err(CoreError::StateConflict(format!(
            "quote {} is {}, only pending quotes can be approved",
            quote.reference_number, quote.status
        )));
    }
    quote.ensure_version(expected_version)?;

    let previous_seats = quote.seats_requested;
    let seats = terms.seats_requested.unwrap_or(previous_seats);

    let adjustment = match quote.flight_id {
        None => SeatAdjustment::None,
        Some(flight_id) if seats > previous_seats => SeatAdjustment::Hold(SeatHold {
            flight_id,
            seats: seats - previous_seats,
        }),
        Some(flight_id) if seats < previous_seats => SeatAdjustment::Release(SeatHold {
            flight_id,
            seats: previous_seats - seats,
        }),
        Some(flight_id) => SeatAdjustment::Commit(SeatHold { flight_id, seats }),
    };

    quote.status = QuoteStatus::Approved;
    quote.seats_requested = seats;
    quote.total_price_usd = Some(terms.total_price_usd);
    quote.payment_deadline = Some(terms.payment_deadline);
    quote.bank_details = Some(terms.bank_details);
    if let Some(contact) = terms.client_contact {
        quote.client_contact = contact;
    }
    if let Some(departure) = terms.departure_date_time {
        quote.departure_date_time = Some(departure);
    }
    if let Some(charter) = quote.charter.as_mut() {
        charter.passengers = seats;
    }
    quote.touch(now);

    Ok(adjustment)
}

/// Returns the seats to release, if the quote held any.
pub fn reject(
    quote: &mut Quote,
    reason: RejectionReason,
    note: Option<String>,
    expected_version: u64,
    now: DateTime<Utc>,
) -> CoreResult<Option<SeatHold>> {
    let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    if reason.requires_note() && note.is_none() {
        return Err(CoreError::ValidationError(
            "rejectionNote is required when the reason is OTHER".into(),
        ));
    }

    quote.ensure_transition(QuoteStatus::Rejected)?;
    quote.ensure_version(expected_version)?;

    quote.status = QuoteStatus::Rejected;
    quote.rejection_reason = Some(reason);
    quote.rejection_note = note;
    quote.touch(now);

    Ok(quote.seat_hold())
}

/// The `Approved` self-loop: new price, same hold, same deadline.
pub fn resend(
    quote: &mut Quote,
    new_total_price_usd: Decimal,
    expected_version: u64,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    ensure_positive_price(new_total_price_usd)?;
    if quote.status != QuoteStatus::Approved {
        return Err(CoreError::StateConflict(format!(
            "quote {} is {}, only approved quotes can be resent",
            quote.reference_number, quote.status
        )));
    }
    quote.ensure_version(expected_version)?;

    quote.total_price_usd = Some(new_total_price_usd);
    quote.touch(now);
    Ok(())
}

/// Client uploaded proof of a bank transfer.
pub fn attach_receipt(quote: &mut Quote, receipt_ref: String, now: DateTime<Utc>) -> CoreResult<()> {
    if receipt_ref.trim().is_empty() {
        return Err(CoreError::ValidationError("receiptRef is required".into()));
    }
    if quote.status != QuoteStatus::Approved {
        return Err(CoreError::StateConflict(format!(
            "quote {} is {}, receipts are only accepted for approved quotes",
            quote.reference_number, quote.status
        )));
    }

    quote.receipt_ref = Some(receipt_ref.trim().to_string());
    quote.touch(now);
    Ok(())
}

pub fn confirm_payment(
    quote: &mut Quote,
    expected_version: u64,
    payment_present: bool,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    quote.ensure_transition(QuoteStatus::Paid)?;
    quote.ensure_version(expected_version)?;

    if !payment_present && quote.receipt_ref.is_none() {
        return Err(CoreError::PaymentMissing(format!(
            "quote {} has no successful payment or submitted receipt",
            quote.reference_number
        )));
    }

    quote.status = QuoteStatus::Paid;
    quote.touch(now);
    Ok(())
}

pub fn complete(quote: &mut Quote, expected_version: u64, now: DateTime<Utc>) -> CoreResult<()> {
    quote.ensure_transition(QuoteStatus::Completed)?;
    quote.ensure_version(expected_version)?;

    quote.status = QuoteStatus::Completed;
    quote.touch(now);
    Ok(())
}

/// Reads the record and the clock; never mutates.
pub fn expiry_check(quote: &Quote, now: DateTime<Utc>, unconfirmed_hold_ttl: Duration) -> ExpiryCheck {
    match quote.status {
        QuoteStatus::Expired => ExpiryCheck::AlreadyExpired,
        QuoteStatus::Pending if quote.created_at + unconfirmed_hold_ttl < now => ExpiryCheck::Eligible,
        QuoteStatus::Approved => match quote.payment_deadline {
            Some(deadline) if now > deadline => ExpiryCheck::Eligible,
            _ => ExpiryCheck::NotEligible,
        },
        _ => ExpiryCheck::NotEligible,
    }
}

/// Returns the seats to release, if the quote held any.
pub fn expire(quote: &mut Quote, now: DateTime<Utc>) -> CoreResult<Option<SeatHold>> {
    quote.ensure_transition(QuoteStatus::Expired)?;

    quote.status = QuoteStatus::Expired;
    quote.touch(now);
    Ok(quote.seat_hold())
}
