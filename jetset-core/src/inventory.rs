use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Seat counters for one published empty-leg flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlightInventory {
    pub flight_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub aircraft: String,
    pub departure_at: DateTime<Utc>,
    pub total_seats: u32,
    pub available_seats: u32,
    pub updated_at: DateTime<Utc>,
}

impl FlightInventory {
    pub fn committed_seats(&self) -> u32 {
        self.total_seats.saturating_sub(self.available_seats)
    }
}

/// Payload for publishing a flight's inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlight {
    pub flight_id: Uuid,
    pub origin: String,
    pub destination: String,
    pub aircraft: String,
    pub departure_at: DateTime<Utc>,
    pub total_seats: u32,
}

impl NewFlight {
    pub fn validate(&self) -> CoreResult<()> {
        if self.total_seats == 0 {
            return Err(CoreError::ValidationError("totalSeats must be at least 1".into()));
        }
        if self.origin.trim().is_empty() || self.destination.trim().is_empty() {
            return Err(CoreError::ValidationError("origin and destination are required".into()));
        }
        if self.aircraft.trim().is_empty() {
            return Err(CoreError::ValidationError("aircraft is required".into()));
        }
        Ok(())
    }

    pub fn into_inventory(self, now: DateTime<Utc>) -> FlightInventory {
        FlightInventory {
            flight_id: self.flight_id,
            origin: self.origin,
            destination: self.destination,
            aircraft: self.aircraft,
            departure_at: self.departure_at,
            total_seats: self.total_seats,
            available_seats: self.total_seats,
            updated_at: now,
        }
    }
}

/// Seats a single booking keeps against a flight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatHold {
    pub flight_id: Uuid,
    pub seats: u32,
}

/// Cross-check of allocator counters against the bookings that consume seats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryAudit {
    pub flight_id: Uuid,
    pub total_seats: u32,
    pub available_seats: u32,
    pub committed_by_bookings: u32,
    pub consistent: bool,
}

impl InventoryAudit {
    pub fn new(inventory: &FlightInventory, committed_by_bookings: u32) -> Self {
        let consistent = inventory.available_seats <= inventory.total_seats
            && inventory.committed_seats() == committed_by_bookings;
        Self {
            flight_id: inventory.flight_id,
            total_seats: inventory.total_seats,
            available_seats: inventory.available_seats,
            committed_by_bookings,
            consistent,
        }
    }
}
