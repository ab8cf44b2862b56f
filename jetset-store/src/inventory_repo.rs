use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jetset_catalog::{InventoryError, SeatAllocator};
use jetset_core::FlightInventory;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

/// Postgres-backed allocator. Each mutation is a single-row atomic UPDATE;
/// the `available_seats_in_range` CHECK constraint backs the WHERE guards.
pub struct PgSeatAllocator {
    pool: PgPool,
}

impl PgSeatAllocator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find(&self, flight_id: Uuid) -> Result<Option<FlightInventory>, InventoryError> {
        let row: Option<InventoryRow> = sqlx::query_as(
            r#"
            SELECT flight_id, origin, destination, aircraft, departure_at,
                   total_seats, available_seats, updated_at
            FROM flight_inventory
            WHERE flight_id = $1
            "#,
        )
        .bind(flight_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(FlightInventory::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct InventoryRow {
    flight_id: Uuid,
    origin: String,
    destination: String,
    aircraft: String,
    departure_at: DateTime<Utc>,
    total_seats: i32,
    available_seats: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InventoryRow> for FlightInventory {
    type Error = InventoryError;

    fn try_from(row: InventoryRow) -> Result<Self, Self::Error> {
        let flight_id = row.flight_id;
        let seats = |n: i32| {
            u32::try_from(n).map_err(|_| {
                InventoryError::Backend(format!("flight {} has negative seat count {}", flight_id, n))
            })
        };

        Ok(FlightInventory {
            total_seats: seats(row.total_seats)?,
            available_seats: seats(row.available_seats)?,
            flight_id,
            origin: row.origin,
            destination: row.destination,
            aircraft: row.aircraft,
            departure_at: row.departure_at,
            updated_at: row.updated_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> InventoryError {
    InventoryError::Backend(e.to_string())
}

fn quantity(seats: u32) -> Result<i32, InventoryError> {
    match i32::try_from(seats) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(InventoryError::InvalidQuantity(seats)),
    }
}

#[async_trait]
impl SeatAllocator for PgSeatAllocator {
    async fn publish(&self, inventory: FlightInventory) -> Result<FlightInventory, InventoryError> {
        let total = quantity(inventory.total_seats)?;
        if inventory.available_seats > inventory.total_seats {
            return Err(InventoryError::InvalidQuantity(inventory.available_seats));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO flight_inventory (
                flight_id, origin, destination, aircraft, departure_at,
                total_seats, available_seats, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (flight_id) DO NOTHING
            "#,
        )
        .bind(inventory.flight_id)
        .bind(&inventory.origin)
        .bind(&inventory.destination)
        .bind(&inventory.aircraft)
        .bind(inventory.departure_at)
        .bind(total)
        .bind(inventory.available_seats as i32)
        .bind(inventory.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(InventoryError::AlreadyPublished(inventory.flight_id));
        }

        info!(
            flight_id = %inventory.flight_id,
            total_seats = inventory.total_seats,
            "Flight inventory published"
        );
        Ok(inventory)
    }

    async fn hold(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError> {
        let n = quantity(seats)?;

        let row: Option<InventoryRow> = sqlx::query_as(
            r#"
            UPDATE flight_inventory
            SET available_seats = available_seats - $2, updated_at = NOW()
            WHERE flight_id = $1 AND available_seats >= $2
            RETURNING flight_id, origin, destination, aircraft, departure_at,
                      total_seats, available_seats, updated_at
            "#,
        )
        .bind(flight_id)
        .bind(n)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => FlightInventory::try_from(row),
            // Guard failed: unknown flight or not enough seats.
            None => match self.find(flight_id).await? {
                Some(current) => Err(InventoryError::InsufficientInventory {
                    requested: seats,
                    available: current.available_seats,
                }),
                None => Err(InventoryError::NotFound(flight_id)),
            },
        }
    }

    async fn release(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError> {
        let n = quantity(seats)?;

        let row: Option<(i32, InventoryRow)> = sqlx::query_as::<_, ReleasedRow>(
            r#"
            WITH before AS (
                SELECT available_seats FROM flight_inventory WHERE flight_id = $1 FOR UPDATE
            )
            UPDATE flight_inventory
            SET available_seats = LEAST(total_seats, available_seats + $2), updated_at = NOW()
            WHERE flight_id = $1
            RETURNING (SELECT available_seats FROM before) AS previous_available,
                      flight_id, origin, destination, aircraft, departure_at,
                      total_seats, available_seats, updated_at
            "#,
        )
        .bind(flight_id)
        .bind(n)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .map(|r| (r.previous_available, r.inventory));

        let (previous, row) = row.ok_or(InventoryError::NotFound(flight_id))?;
        let inventory = FlightInventory::try_from(row)?;

        if i64::from(previous) + i64::from(n) > i64::from(inventory.total_seats) {
            warn!(
                flight_id = %flight_id,
                requested = seats,
                available = previous,
                total = inventory.total_seats,
                "Release would exceed total seats, saturating"
            );
        }
        Ok(inventory)
    }

    async fn commit(&self, flight_id: Uuid, seats: u32) -> Result<FlightInventory, InventoryError> {
        let inventory = self.snapshot(flight_id).await?;
        if inventory.committed_seats() < seats {
            return Err(InventoryError::Inconsistent {
                flight_id,
                requested: seats,
                committed: inventory.committed_seats(),
            });
        }
        Ok(inventory)
    }

    async fn snapshot(&self, flight_id: Uuid) -> Result<FlightInventory, InventoryError> {
        self.find(flight_id).await?.ok_or(InventoryError::NotFound(flight_id))
    }

    async fn list_flights(&self) -> Result<Vec<FlightInventory>, InventoryError> {
        let rows: Vec<InventoryRow> = sqlx::query_as(
            r#"
            SELECT flight_id, origin, destination, aircraft, departure_at,
                   total_seats, available_seats, updated_at
            FROM flight_inventory
            ORDER BY departure_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(FlightInventory::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ReleasedRow {
    previous_available: i32,
    #[sqlx(flatten)]
    inventory: InventoryRow,
}
