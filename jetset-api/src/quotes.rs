use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use jetset_booking::{ApprovalTerms, SubmitQuote};
use jetset_core::effects::SideEffect;
use jetset_core::{BankDetails, CharterRequest, ClientContact, Quote, QuoteKind, RejectionReason};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::StaffActor;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyLegQuoteRequest {
    pub empty_leg_id: Uuid,
    pub seats_requested: u32,
    pub contact_info: ClientContact,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharterQuoteRequest {
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub aircraft_id: Option<Uuid>,
    #[serde(default)]
    pub departure_date_time: Option<DateTime<Utc>>,
    pub passengers: u32,
    pub contact_info: ClientContact,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedQuoteResponse {
    pub reference_number: String,
    pub quote_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub total_price_usd: Decimal,
    pub payment_deadline: DateTime<Utc>,
    pub bank_details: BankDetails,
    #[serde(default)]
    pub client_contact: Option<ClientContact>,
    #[serde(default)]
    pub departure_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub seats_requested: Option<u32>,
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub rejection_reason: String,
    #[serde(default)]
    pub rejection_note: Option<String>,
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendRequest {
    pub total_price_usd: Decimal,
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptRequest {
    pub receipt_ref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedRequest {
    pub expected_version: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/quotes/empty-leg", post(submit_empty_leg))
        .route("/quotes/charter", post(submit_charter))
        .route("/quotes/by-reference/{reference_number}", get(get_quote_by_reference))
        .route("/quotes/{kind}/{id}", get(get_quote))
        .route("/quotes/{kind}/{id}/approve", post(approve_quote))
        .route("/quotes/{kind}/{id}/reject", post(reject_quote))
        .route("/quotes/{kind}/{id}/resend", post(resend_quote))
        .route("/quotes/{kind}/{id}/receipt", post(submit_receipt))
        .route("/quotes/{kind}/{id}/confirm-payment", post(confirm_payment))
        .route("/quotes/{kind}/{id}/complete", post(complete_quote))
        .route("/quotes/{kind}/{id}/deliveries", get(list_deliveries))
}

/// Loads the quote and checks the `{kind}` path segment matches it.
async fn load_quote(state: &AppState, kind: &str, id: Uuid) -> Result<Quote, AppError> {
    let kind = QuoteKind::from_path_segment(kind)
        .ok_or_else(|| AppError::NotFound(format!("unknown quote kind {}", kind)))?;
    let quote = state.lifecycle.get_quote(id).await?;
    if quote.kind != kind {
        return Err(AppError::NotFound(format!("quote {} not found", id)));
    }
    Ok(quote)
}

/// POST /quotes/empty-leg
pub async fn submit_empty_leg(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<EmptyLegQuoteRequest>,
) -> Result<(StatusCode, Json<SubmittedQuoteResponse>), AppError> {
    let quote = state
        .lifecycle
        .submit(SubmitQuote::EmptyLeg {
            flight_id: req.empty_leg_id,
            seats_requested: req.seats_requested,
            contact: req.contact_info,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmittedQuoteResponse {
            reference_number: quote.reference_number,
            quote_id: quote.id,
        }),
    ))
}

/// POST /quotes/charter
pub async fn submit_charter(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CharterQuoteRequest>,
) -> Result<(StatusCode, Json<SubmittedQuoteResponse>), AppError> {
    let quote = state
        .lifecycle
        .submit(SubmitQuote::Charter {
            charter: CharterRequest {
                origin: req.origin,
                destination: req.destination,
                aircraft_id: req.aircraft_id,
                passengers: req.passengers,
            },
            departure_date_time: req.departure_date_time,
            contact: req.contact_info,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmittedQuoteResponse {
            reference_number: quote.reference_number,
            quote_id: quote.id,
        }),
    ))
}

/// GET /quotes/{kind}/{id}
pub async fn get_quote(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<Quote>, AppError> {
    Ok(Json(load_quote(&state, &kind, id).await?))
}

/// GET /quotes/by-reference/{reference_number}
pub async fn get_quote_by_reference(
    State(state): State<AppState>,
    Path(reference_number): Path<String>,
) -> Result<Json<Quote>, AppError> {
    Ok(Json(state.lifecycle.find_by_reference(&reference_number).await?))
}

/// POST /quotes/{kind}/{id}/approve
pub async fn approve_quote(
    State(state): State<AppState>,
    staff: StaffActor,
    Path((kind, id)): Path<(String, Uuid)>,
    ApiJson(req): ApiJson<ApproveRequest>,
) -> Result<Json<Quote>, AppError> {
    load_quote(&state, &kind, id).await?;

    let terms = ApprovalTerms {
        total_price_usd: req.total_price_usd,
        payment_deadline: req.payment_deadline,
        bank_details: req.bank_details,
        client_contact: req.client_contact,
        departure_date_time: req.departure_date_time,
        seats_requested: req.seats_requested,
    };
    let quote = state
        .lifecycle
        .approve(id, terms, req.expected_version, &staff.actor())
        .await?;

    Ok(Json(quote))
}

/// POST /quotes/{kind}/{id}/reject
pub async fn reject_quote(
    State(state): State<AppState>,
    staff: StaffActor,
    Path((kind, id)): Path<(String, Uuid)>,
    ApiJson(req): ApiJson<RejectRequest>,
) -> Result<Json<Quote>, AppError> {
    load_quote(&state, &kind, id).await?;

    let reason: RejectionReason = req.rejection_reason.parse()?;
    let quote = state
        .lifecycle
        .reject(id, reason, req.rejection_note, req.expected_version, &staff.actor())
        .await?;

    Ok(Json(quote))
}

/// POST /quotes/{kind}/{id}/resend
pub async fn resend_quote(
    State(state): State<AppState>,
    staff: StaffActor,
    Path((kind, id)): Path<(String, Uuid)>,
    ApiJson(req): ApiJson<ResendRequest>,
) -> Result<Json<Quote>, AppError> {
    load_quote(&state, &kind, id).await?;

    let quote = state
        .lifecycle
        .resend(id, req.total_price_usd, req.expected_version, &staff.actor())
        .await?;

    Ok(Json(quote))
}

/// POST /quotes/{kind}/{id}/receipt
/// Client uploads the bank-transfer receipt reference.
pub async fn submit_receipt(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, Uuid)>,
    ApiJson(req): ApiJson<ReceiptRequest>,
) -> Result<Json<Quote>, AppError> {
    load_quote(&state, &kind, id).await?;
    Ok(Json(state.lifecycle.submit_receipt(id, req.receipt_ref).await?))
}

/// POST /quotes/{kind}/{id}/confirm-payment
pub async fn confirm_payment(
    State(state): State<AppState>,
    staff: StaffActor,
    Path((kind, id)): Path<(String, Uuid)>,
    ApiJson(req): ApiJson<VersionedRequest>,
) -> Result<Json<Quote>, AppError> {
    load_quote(&state, &kind, id).await?;

    let quote = state
        .lifecycle
        .confirm_payment(id, req.expected_version, &staff.actor())
        .await?;

    Ok(Json(quote))
}

/// POST /quotes/{kind}/{id}/complete
pub async fn complete_quote(
    State(state): State<AppState>,
    staff: StaffActor,
    Path((kind, id)): Path<(String, Uuid)>,
    ApiJson(req): ApiJson<VersionedRequest>,
) -> Result<Json<Quote>, AppError> {
    load_quote(&state, &kind, id).await?;

    let quote = state
        .lifecycle
        .complete(id, req.expected_version, &staff.actor())
        .await?;

    Ok(Json(quote))
}

/// GET /quotes/{kind}/{id}/deliveries
/// Document and notification side effects queued for the quote.
pub async fn list_deliveries(
    State(state): State<AppState>,
    _staff: StaffActor,
    Path((kind, id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<SideEffect>>, AppError> {
    load_quote(&state, &kind, id).await?;
    Ok(Json(state.lifecycle.deliveries_for(id).await?))
}
