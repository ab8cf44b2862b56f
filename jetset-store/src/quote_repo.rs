use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jetset_core::effects::SideEffect;
use jetset_core::repository::{QuoteRepository, StoreError, StoreResult};
use jetset_core::{BankDetails, CharterRequest, ClientContact, Quote, QuoteStatus};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::outbox_repo::insert_effect;
use crate::{backend, is_unique_violation};

/// Cap per reaper pass; the next sweep picks up the rest.
const EXPIRABLE_BATCH: i64 = 500;

pub struct PgQuoteRepository {
    pool: PgPool,
}

impl PgQuoteRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct QuoteRow {
    id: Uuid,
    reference_number: String,
    kind: String,
    status: String,
    flight_id: Option<Uuid>,
    charter: Option<Json<CharterRequest>>,
    seats_requested: i32,
    total_price_usd: Option<Decimal>,
    payment_deadline: Option<DateTime<Utc>>,
    bank_details: Option<Json<BankDetails>>,
    departure_date_time: Option<DateTime<Utc>>,
    client_contact: Json<ClientContact>,
    receipt_ref: Option<String>,
    rejection_reason: Option<String>,
    rejection_note: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QuoteRow> for Quote {
    type Error = StoreError;

    fn try_from(row: QuoteRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |field: &str| StoreError::Backend(format!("quote {} has invalid {}", id, field));

        Ok(Quote {
            id,
            kind: row.kind.parse().map_err(|_| corrupt("kind"))?,
            status: row.status.parse().map_err(|_| corrupt("status"))?,
            flight_id: row.flight_id,
            charter: row.charter.map(|c| c.0),
            seats_requested: u32::try_from(row.seats_requested).map_err(|_| corrupt("seats_requested"))?,
            total_price_usd: row.total_price_usd,
            payment_deadline: row.payment_deadline,
            bank_details: row.bank_details.map(|b| b.0),
            departure_date_time: row.departure_date_time,
            client_contact: row.client_contact.0,
            receipt_ref: row.receipt_ref,
            rejection_reason: row
                .rejection_reason
                .map(|r| r.parse())
                .transpose()
                .map_err(|_| corrupt("rejection_reason"))?,
            rejection_note: row.rejection_note,
            version: u64::try_from(row.version).map_err(|_| corrupt("version"))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            reference_number: row.reference_number,
        })
    }
}

const SELECT_QUOTE: &str = r#"
    SELECT id, reference_number, kind, status, flight_id, charter, seats_requested,
           total_price_usd, payment_deadline, bank_details, departure_date_time,
           client_contact, receipt_ref, rejection_reason, rejection_note,
           version, created_at, updated_at
    FROM quotes
"#;

#[async_trait]
impl QuoteRepository for PgQuoteRepository {
    async fn insert_quote(&self, quote: &Quote) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quotes (
                id, reference_number, kind, status, flight_id, charter, seats_requested,
                total_price_usd, payment_deadline, bank_details, departure_date_time,
                client_contact, receipt_ref, rejection_reason, rejection_note,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(quote.id)
        .bind(&quote.reference_number)
        .bind(quote.kind.as_str())
        .bind(quote.status.as_str())
        .bind(quote.flight_id)
        .bind(quote.charter.as_ref().map(Json))
        .bind(quote.seats_requested as i32)
        .bind(quote.total_price_usd)
        .bind(quote.payment_deadline)
        .bind(quote.bank_details.as_ref().map(Json))
        .bind(quote.departure_date_time)
        .bind(Json(&quote.client_contact))
        .bind(&quote.receipt_ref)
        .bind(quote.rejection_reason.map(|r| r.as_str()))
        .bind(&quote.rejection_note)
        .bind(quote.version as i64)
        .bind(quote.created_at)
        .bind(quote.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!("reference {}", quote.reference_number))
            } else {
                backend(e)
            }
        })?;

        Ok(())
    }

    async fn get_quote(&self, id: Uuid) -> StoreResult<Option<Quote>> {
        let row: Option<QuoteRow> = sqlx::query_as(&format!("{} WHERE id = $1", SELECT_QUOTE))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Quote::try_from).transpose()
    }

    async fn find_by_reference(&self, reference_number: &str) -> StoreResult<Option<Quote>> {
        let row: Option<QuoteRow> = sqlx::query_as(&format!("{} WHERE reference_number = $1", SELECT_QUOTE))
            .bind(reference_number)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Quote::try_from).transpose()
    }

    async fn update_quote_with_effects(
        &self,
        quote: &Quote,
        expected_version: u64,
        effects: &[SideEffect],
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let result = sqlx::query(
            r#"
            UPDATE quotes
            SET status = $3,
                seats_requested = $4,
                charter = $5,
                total_price_usd = $6,
                payment_deadline = $7,
                bank_details = $8,
                departure_date_time = $9,
                client_contact = $10,
                receipt_ref = $11,
                rejection_reason = $12,
                rejection_note = $13,
                version = $14,
                updated_at = $15
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(quote.id)
        .bind(expected_version as i64)
        .bind(quote.status.as_str())
        .bind(quote.seats_requested as i32)
        .bind(quote.charter.as_ref().map(Json))
        .bind(quote.total_price_usd)
        .bind(quote.payment_deadline)
        .bind(quote.bank_details.as_ref().map(Json))
        .bind(quote.departure_date_time)
        .bind(Json(&quote.client_contact))
        .bind(&quote.receipt_ref)
        .bind(quote.rejection_reason.map(|r| r.as_str()))
        .bind(&quote.rejection_note)
        .bind(quote.version as i64)
        .bind(quote.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            for effect in effects {
                if !insert_effect(&mut *tx, effect).await? {
                    debug!(key = %effect.idempotency_key, "Side effect already queued");
                }
            }
            tx.commit().await.map_err(backend)?;
            return Ok(());
        }

        // Lost the compare-and-swap, or the row is gone. Dropping `tx` rolls back.
        let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM quotes WHERE id = $1")
            .bind(quote.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        match actual {
            Some(actual) => Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: actual as u64,
            }),
            None => Err(StoreError::NotFound(format!("quote {}", quote.id))),
        }
    }

    async fn list_expirable(
        &self,
        now: DateTime<Utc>,
        pending_created_before: DateTime<Utc>,
    ) -> StoreResult<Vec<Quote>> {
        let rows: Vec<QuoteRow> = sqlx::query_as(&format!(
            r#"{}
            WHERE (status = 'APPROVED' AND payment_deadline < $1)
               OR (status = 'PENDING' AND created_at < $2)
            ORDER BY created_at
            LIMIT $3"#,
            SELECT_QUOTE
        ))
        .bind(now)
        .bind(pending_created_before)
        .bind(EXPIRABLE_BATCH)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(Quote::try_from).collect()
    }

    async fn committed_seats(&self, flight_id: Uuid) -> StoreResult<u32> {
        let consuming: Vec<String> = QuoteStatus::ALL
            .iter()
            .filter(|s| s.holds_seats())
            .map(|s| s.as_str().to_string())
            .collect();

        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(seats_requested), 0)::BIGINT FROM quotes WHERE flight_id = $1 AND status = ANY($2)",
        )
        .bind(flight_id)
        .bind(consuming)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        u32::try_from(total).map_err(|_| StoreError::Backend(format!("committed seat sum {} out of range", total)))
    }
}
