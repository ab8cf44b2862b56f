use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jetset_core::repository::{PaymentRepository, StoreError, StoreResult};
use jetset_core::Payment;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{backend, is_unique_violation};

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    quote_id: Uuid,
    status: String,
    amount_usd: Decimal,
    paid_at: Option<DateTime<Utc>>,
    transaction_ref: Option<String>,
    receipt_ref: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|_| StoreError::Backend(format!("payment {} has invalid status {}", row.id, row.status)))?;

        Ok(Payment {
            id: row.id,
            quote_id: row.quote_id,
            status,
            amount_usd: row.amount_usd,
            paid_at: row.paid_at,
            transaction_ref: row.transaction_ref,
            receipt_ref: row.receipt_ref,
            created_at: row.created_at,
        })
    }
}

const SELECT_PAYMENT: &str =
    "SELECT id, quote_id, status, amount_usd, paid_at, transaction_ref, receipt_ref, created_at FROM payments";

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, quote_id, status, amount_usd, paid_at, transaction_ref, receipt_ref, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id)
        .bind(payment.quote_id)
        .bind(payment.status.as_str())
        .bind(payment.amount_usd)
        .bind(payment.paid_at)
        .bind(&payment.transaction_ref)
        .bind(&payment.receipt_ref)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Duplicate(format!(
                    "transaction {}",
                    payment.transaction_ref.as_deref().unwrap_or("<none>")
                ))
            } else {
                backend(e)
            }
        })?;

        Ok(())
    }

    async fn settle_payment(&self, payment: &Payment) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'SUCCESS', paid_at = $2, receipt_ref = $3
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(payment.id)
        .bind(payment.paid_at)
        .bind(&payment.receipt_ref)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Settled by a concurrent confirmation, or the row is gone.
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
            .bind(payment.id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match status {
            Some(status) => Err(StoreError::Conflict(format!("payment {} is already {}", payment.id, status))),
            None => Err(StoreError::NotFound(format!("payment {}", payment.id))),
        }
    }

    async fn list_for_quote(&self, quote_id: Uuid) -> StoreResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> =
            sqlx::query_as(&format!("{} WHERE quote_id = $1 ORDER BY created_at", SELECT_PAYMENT))
                .bind(quote_id)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;

        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn find_by_transaction_ref(&self, transaction_ref: &str) -> StoreResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!("{} WHERE transaction_ref = $1", SELECT_PAYMENT))
            .bind(transaction_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(Payment::try_from).transpose()
    }
}
