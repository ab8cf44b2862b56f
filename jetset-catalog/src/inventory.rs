use async_trait::async_trait;
use chrono::Utc;
use jetset_core::{CoreError, FlightInventory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Seat inventory per empty-leg flight. Every mutation of a given flight is
/// serialized; `hold` is the commit, `release` saturates at `total_seats`.
#[async_trait]
pub trait SeatAllocator: Send + Sync {
    async fn publish(&self, inventory: FlightInventory) -> Result<FlightInventory, InventoryError>;

    async fn hold(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError>;

    async fn release(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError>;

    /// No quantity change: verifies that `seats` are already held on the flight.
    async fn commit(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError>;

    async fn snapshot(&self, flight_id: Uuid) -> Result<FlightInventory, InventoryError>;

    /// Every published flight, earliest departure first.
    async fn list_flights(&self) -> Result<Vec<FlightInventory>, InventoryError>;
}

/// In-memory allocator: one async mutex per flight.
#[derive(Default)]
pub struct InMemorySeatAllocator {
    flights: RwLock<HashMap<Uuid, Arc<Mutex<FlightInventory>>>>,
}

impl InMemorySeatAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    async fn flight(&self, flight_id: Uuid) -> Result<Arc<Mutex<FlightInventory>>, InventoryError> {
        self.flights
            .read()
            .await
            .get(&flight_id)
            .cloned()
            .ok_or(InventoryError::NotFound(flight_id))
    }
}

#[async_trait]
impl SeatAllocator for InMemorySeatAllocator {
    async fn publish(&self, inventory: FlightInventory) -> Result<FlightInventory, InventoryError> {
        if inventory.available_seats > inventory.total_seats {
            return Err(InventoryError::InvalidQuantity(inventory.available_seats));
        }

        let mut flights = self.flights.write().await;
        if flights.contains_key(&inventory.flight_id) {
            return Err(InventoryError::AlreadyPublished(inventory.flight_id));
        }
        flights.insert(inventory.flight_id, Arc::new(Mutex::new(inventory.clone())));

        tracing::info!(
            flight_id = %inventory.flight_id,
            total_seats = inventory.total_seats,
            "Flight inventory published"
        );
        Ok(inventory)
    }

    async fn hold(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError> {
        if seats == 0 {
            return Err(InventoryError::InvalidQuantity(seats));
        }

        let flight = self.flight(flight_id).await?;
        let mut item = flight.lock().await;

        if item.available_seats < seats {
            return Err(InventoryError::InsufficientInventory {
                requested: seats,
                available: item.available_seats,
            });
        }

        item.available_seats -= seats;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn release(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError> {
        let flight = self.flight(flight_id).await?;
        let mut item = flight.lock().await;

        let restored = item.available_seats.saturating_add(seats);
        if restored > item.total_seats {
            tracing::warn!(
                flight_id = %flight_id,
                requested = seats,
                available = item.available_seats,
                total = item.total_seats,
                "Release would exceed total seats, saturating"
            );
        }
        item.available_seats = restored.min(item.total_seats);
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn commit(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError> {
        let flight = self.flight(flight_id).await?;
        let item = flight.lock().await;

        if item.committed_seats() < seats {
            return Err(InventoryError::Inconsistent {
                flight_id,
                requested: seats,
                committed: item.committed_seats(),
            });
        }
        Ok(item.clone())
    }

    async fn snapshot(&self, flight_id: Uuid) -> Result<FlightInventory, InventoryError> {
        let flight = self.flight(flight_id).await?;
        let item = flight.lock().await;
        Ok(item.clone())
    }

    async fn list_flights(&self) -> Result<Vec<FlightInventory>, InventoryError> {
        let handles: Vec<_> = self.flights.read().await.values().cloned().collect();
        let mut flights = Vec::with_capacity(handles.len());
        for handle in handles {
            flights.push(handle.lock().await.clone());
        }
        flights.sort_by_key(|f| f.departure_at);
        Ok(flights)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("Flight inventory not found: {0}")]
    NotFound(Uuid),

    #[error("Flight inventory already published: {0}")]
    AlreadyPublished(Uuid),

    #[error("Invalid seat quantity: {0}")]
    InvalidQuantity(u32),

    #[error("Insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: u32, available: u32 },

    #[error("Flight {flight_id} has {committed} committed seats, cannot commit {requested}")]
    Inconsistent {
        flight_id: Uuid,
        requested: u32,
        committed: u32,
    },

    #[error("Inventory backend error: {0}")]
    Backend(String),
}

impl From<InventoryError> for CoreError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::NotFound(id) => CoreError::NotFoundError(format!("flight {}", id)),
            InventoryError::AlreadyPublished(id) => {
                CoreError::StateConflict(format!("flight {} is already published", id))
            }
            InventoryError::InvalidQuantity(n) => {
                CoreError::ValidationError(format!("invalid seat quantity {}", n))
            }
            InventoryError::InsufficientInventory { requested, available } => {
                CoreError::InventoryUnavailable { requested, available }
            }
            err @ InventoryError::Inconsistent { .. } => CoreError::InternalError(err.to_string()),
            InventoryError::Backend(msg) => CoreError::InternalError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn flight(total: u32) -> FlightInventory {
        FlightInventory {
            flight_id: Uuid::new_v4(),
            origin: "OMDB".into(),
            destination: "LFMN".into(),
            aircraft: "Gulfstream G650".into(),
            departure_at: Utc::now() + Duration::days(3),
            total_seats: total,
            available_seats: total,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inventory_lifecycle() {
        let allocator = InMemorySeatAllocator::new();
        let published = allocator.publish(flight(8)).await.unwrap();
        let id = published.flight_id;

        // Hold
        let after_hold = allocator.hold(id, 3).await.unwrap();
        assert_eq!(after_hold.available_seats, 5);

        // Commit does not move counters
        let after_commit = allocator.commit(id, 3).await.unwrap();
        assert_eq!(after_commit.available_seats, 5);

        // Release
        let after_release = allocator.release(id, 3).await.unwrap();
        assert_eq!(after_release.available_seats, 8);
    }

    #[tokio::test]
    async fn test_hold_beyond_availability_fails() {
        let allocator = InMemorySeatAllocator::new();
        let id = allocator.publish(flight(2)).await.unwrap().flight_id;

        let err = allocator.hold(id, 3).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientInventory { requested: 3, available: 2 }
        ));
        assert_eq!(allocator.snapshot(id).await.unwrap().available_seats, 2);
    }

    #[tokio::test]
    async fn test_double_release_saturates() {
        let allocator = InMemorySeatAllocator::new();
        let id = allocator.publish(flight(4)).await.unwrap().flight_id;

        allocator.hold(id, 2).await.unwrap();
        allocator.release(id, 2).await.unwrap();
        let again = allocator.release(id, 2).await.unwrap();

        assert_eq!(again.available_seats, 4);
        assert!(again.available_seats <= again.total_seats);
    }

    #[tokio::test]
    async fn test_commit_more_than_held_is_inconsistent() {
        let allocator = InMemorySeatAllocator::new();
        let id = allocator.publish(flight(4)).await.unwrap().flight_id;
        allocator.hold(id, 1).await.unwrap();

        assert!(matches!(
            allocator.commit(id, 2).await,
            Err(InventoryError::Inconsistent { .. })
        ));
    }

    #[tokio::test]
    async fn test_publish_twice_and_unknown_flight() {
        let allocator = InMemorySeatAllocator::new();
        let inventory = flight(4);
        allocator.publish(inventory.clone()).await.unwrap();

        assert!(matches!(
            allocator.publish(inventory).await,
            Err(InventoryError::AlreadyPublished(_))
        ));
        assert!(matches!(
            allocator.hold(Uuid::new_v4(), 1).await,
            Err(InventoryError::NotFound(_))
        ));
        assert!(matches!(allocator.hold(Uuid::new_v4(), 0).await, Err(InventoryError::InvalidQuantity(0))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holds_never_oversell() {
        let allocator = Arc::new(InMemorySeatAllocator::new());
        let id = allocator.publish(flight(10)).await.unwrap().flight_id;

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let allocator = allocator.clone();
            tasks.push(tokio::spawn(async move { allocator.hold(id, 1).await.is_ok() }));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(allocator.snapshot(id).await.unwrap().available_seats, 0);
    }

    #[test]
    fn test_error_maps_to_inventory_unavailable() {
        let err: CoreError = InventoryError::InsufficientInventory { requested: 2, available: 1 }.into();
        assert!(matches!(err, CoreError::InventoryUnavailable { requested: 2, available: 1 }));
    }
}
