use axum::{extract::State, routing::post, Json, Router};
use jetset_booking::GatewayPayment;
use jetset_core::Payment;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    #[serde(alias = "SUCCEEDED")]
    Success,
    Failed,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    pub quote_id: Uuid,
    pub transaction_ref: String,
    pub amount_usd: Decimal,
    pub status: GatewayStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(handle_payment_webhook))
}

/// POST /payments/webhook
/// Gateway callback. Replays of the same transaction return the stored payment.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<PaymentWebhook>,
) -> Result<Json<Payment>, AppError> {
    tracing::info!(
        quote_id = %payload.quote_id,
        transaction_ref = %payload.transaction_ref,
        status = ?payload.status,
        "Received payment webhook"
    );

    let payment = state
        .lifecycle
        .record_gateway_payment(GatewayPayment {
            quote_id: payload.quote_id,
            transaction_ref: payload.transaction_ref,
            amount_usd: payload.amount_usd,
            succeeded: matches!(payload.status, GatewayStatus::Success),
        })
        .await?;

    Ok(Json(payment))
}
