use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jetset_core::documents::DocumentRequest;
use jetset_core::effects::SideEffect;
use jetset_core::repository::{EffectOutbox, StoreError, StoreResult};
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres};
use uuid::Uuid;

use crate::backend;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// `side_effects` table drained by the dispatcher. Claims use
/// `FOR UPDATE SKIP LOCKED` so several dispatchers can share it.
pub struct PgEffectOutbox {
    pool: PgPool,
}

impl PgEffectOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn execute_one(&self, id: Uuid, query: PgQuery<'_>) -> StoreResult<()> {
        let result = query.execute(&self.pool).await.map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("side effect {}", id)));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EffectRow {
    id: Uuid,
    quote_id: Uuid,
    kind: String,
    idempotency_key: String,
    payload: Json<DocumentRequest>,
    status: String,
    attempts: i32,
    next_attempt_at: DateTime<Utc>,
    lease_until: Option<DateTime<Utc>>,
    document_url: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EffectRow> for SideEffect {
    type Error = StoreError;

    fn try_from(row: EffectRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |field: &str| StoreError::Backend(format!("side effect {} has invalid {}", id, field));

        Ok(SideEffect {
            id,
            quote_id: row.quote_id,
            kind: row.kind.parse().map_err(|_| corrupt("kind"))?,
            idempotency_key: row.idempotency_key,
            payload: row.payload.0,
            status: row.status.parse().map_err(|_| corrupt("status"))?,
            attempts: u32::try_from(row.attempts).map_err(|_| corrupt("attempts"))?,
            next_attempt_at: row.next_attempt_at,
            lease_until: row.lease_until,
            document_url: row.document_url,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const EFFECT_COLUMNS: &str = "id, quote_id, kind, idempotency_key, payload, status, attempts, \
    next_attempt_at, lease_until, document_url, last_error, created_at, updated_at";

/// Writes one outbox row on `conn`, normally inside the transaction that
/// moves the quote. Returns `false` when the idempotency key already exists.
pub(crate) async fn insert_effect(conn: &mut PgConnection, effect: &SideEffect) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO side_effects (
            id, quote_id, kind, idempotency_key, payload, status, attempts,
            next_attempt_at, lease_until, document_url, last_error, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(effect.id)
    .bind(effect.quote_id)
    .bind(effect.kind.as_str())
    .bind(&effect.idempotency_key)
    .bind(Json(&effect.payload))
    .bind(effect.status.as_str())
    .bind(effect.attempts as i32)
    .bind(effect.next_attempt_at)
    .bind(effect.lease_until)
    .bind(&effect.document_url)
    .bind(&effect.last_error)
    .bind(effect.created_at)
    .bind(effect.updated_at)
    .execute(conn)
    .await
    .map_err(backend)?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl EffectOutbox for PgEffectOutbox {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease_until: DateTime<Utc>,
    ) -> StoreResult<Vec<SideEffect>> {
        let rows: Vec<EffectRow> = sqlx::query_as(&format!(
            r#"
            UPDATE side_effects
            SET status = 'IN_FLIGHT', lease_until = $3, attempts = attempts + 1, updated_at = $1
            WHERE id IN (
                SELECT id FROM side_effects
                WHERE (status = 'PENDING' AND next_attempt_at <= $1)
                   OR (status = 'IN_FLIGHT' AND (lease_until IS NULL OR lease_until <= $1))
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            EFFECT_COLUMNS
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(SideEffect::try_from).collect()
    }

    async fn record_document(&self, id: Uuid, document_url: &str) -> StoreResult<()> {
        self.execute_one(
            id,
            sqlx::query("UPDATE side_effects SET document_url = $2 WHERE id = $1")
                .bind(id)
                .bind(document_url),
        )
        .await
    }

    async fn mark_delivered(&self, id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        self.execute_one(
            id,
            sqlx::query(
                "UPDATE side_effects SET status = 'DELIVERED', lease_until = NULL, last_error = NULL, updated_at = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(now),
        )
        .await
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.execute_one(
            id,
            sqlx::query(
                r#"
                UPDATE side_effects
                SET status = 'PENDING', lease_until = NULL, next_attempt_at = $3, last_error = $2, updated_at = $4
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(error)
            .bind(next_attempt_at)
            .bind(now),
        )
        .await
    }

    async fn mark_failed(&self, id: Uuid, error: &str, now: DateTime<Utc>) -> StoreResult<()> {
        self.execute_one(
            id,
            sqlx::query(
                "UPDATE side_effects SET status = 'FAILED', lease_until = NULL, last_error = $2, updated_at = $3 WHERE id = $1",
            )
            .bind(id)
            .bind(error)
            .bind(now),
        )
        .await
    }

    async fn list_for_quote(&self, quote_id: Uuid) -> StoreResult<Vec<SideEffect>> {
        let rows: Vec<EffectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM side_effects WHERE quote_id = $1 ORDER BY created_at",
            EFFECT_COLUMNS
        ))
        .bind(quote_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(SideEffect::try_from).collect()
    }
}
