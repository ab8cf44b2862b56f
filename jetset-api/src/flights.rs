use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, Stream, StreamExt};
use jetset_core::{FlightInventory, InventoryAudit, NewFlight};
use jetset_shared::models::events::InventoryChangedEvent;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::auth::StaffActor;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

const INVENTORY_EVENT: &str = "inventory_changed";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishInventoryRequest {
    pub origin: String,
    pub destination: String,
    pub aircraft: String,
    pub departure_at: DateTime<Utc>,
    pub total_seats: u32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/flights", get(list_flights))
        .route("/flights/{id}/inventory", get(get_inventory).post(publish_inventory))
        .route("/flights/{id}/inventory/audit", get(audit_inventory))
        .route("/flights/{id}/inventory/stream", get(stream_inventory))
}

/// POST /flights/{id}/inventory
pub async fn publish_inventory(
    State(state): State<AppState>,
    staff: StaffActor,
    Path(flight_id): Path<Uuid>,
    ApiJson(req): ApiJson<PublishInventoryRequest>,
) -> Result<(StatusCode, Json<FlightInventory>), AppError> {
    let inventory = state
        .lifecycle
        .publish_flight(NewFlight {
            flight_id,
            origin: req.origin,
            destination: req.destination,
            aircraft: req.aircraft,
            departure_at: req.departure_at,
            total_seats: req.total_seats,
        })
        .await?;

    tracing::info!(flight_id = %flight_id, staff = %staff.staff_id, "Empty leg published");
    Ok((StatusCode::CREATED, Json(inventory)))
}

/// GET /flights
pub async fn list_flights(State(state): State<AppState>) -> Result<Json<Vec<FlightInventory>>, AppError> {
    Ok(Json(state.lifecycle.list_flights().await?))
}

/// GET /flights/{id}/inventory
pub async fn get_inventory(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Json<FlightInventory>, AppError> {
    Ok(Json(state.lifecycle.flight_inventory(flight_id).await?))
}

/// GET /flights/{id}/inventory/audit
pub async fn audit_inventory(
    State(state): State<AppState>,
    _staff: StaffActor,
    Path(flight_id): Path<Uuid>,
) -> Result<Json<InventoryAudit>, AppError> {
    Ok(Json(state.lifecycle.audit_flight(flight_id).await?))
}

/// GET /flights/{id}/inventory/stream
/// Current counters first, then every change for this flight.
pub async fn stream_inventory(
    State(state): State<AppState>,
    Path(flight_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe before the snapshot so no change falls in between.
    let rx = state.lifecycle.subscribe_inventory();
    let current = state.lifecycle.flight_inventory(flight_id).await?;

    let initial = InventoryChangedEvent {
        flight_id,
        total_seats: current.total_seats,
        available_seats: current.available_seats,
        timestamp: current.updated_at.timestamp(),
    };

    let updates = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.flight_id == flight_id => Some(event),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(flight_id = %flight_id, error = %e, "Inventory stream lagged");
                None
            }
        }
    });

    let events = stream::once(async move { initial })
        .chain(updates)
        .filter_map(|event| async move {
            match Event::default().event(INVENTORY_EVENT).json_data(&event) {
                Ok(sse) => Some(Ok(sse)),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode inventory event");
                    None
                }
            }
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
