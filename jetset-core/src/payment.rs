use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "SUCCESS" => Ok(PaymentStatus::Success),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(CoreError::ValidationError(format!("unknown payment status {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub quote_id: Uuid,
    pub status: PaymentStatus,
    pub amount_usd: Decimal,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_ref: Option<String>,
    pub receipt_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// A bank-transfer receipt uploaded by the client, awaiting staff verification.
    pub fn from_receipt(quote_id: Uuid, amount_usd: Decimal, receipt_ref: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            quote_id,
            status: PaymentStatus::Pending,
            amount_usd,
            paid_at: None,
            transaction_ref: None,
            receipt_ref: Some(receipt_ref),
            created_at: now,
        }
    }

    /// A settled (or declined) gateway charge.
    pub fn from_gateway(
        quote_id: Uuid,
        amount_usd: Decimal,
        transaction_ref: String,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            quote_id,
            status: if succeeded { PaymentStatus::Success } else { PaymentStatus::Failed },
            amount_usd,
            paid_at: succeeded.then_some(now),
            transaction_ref: Some(transaction_ref),
            receipt_ref: None,
            created_at: now,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Success
    }

    /// Pending -> Success. A successful payment is immutable.
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Success;
                self.paid_at = Some(now);
                Ok(())
            }
            other => Err(CoreError::StateConflict(format!(
                "payment {} is {}, cannot be marked successful",
                self.id,
                other.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receipt_payment_lifecycle() {
        let now = Utc::now();
        let mut payment = Payment::from_receipt(Uuid::new_v4(), Decimal::new(5000, 0), "s3://r/1.pdf".into(), now);
        assert!(!payment.is_settled());

        payment.mark_succeeded(now).unwrap();
        assert!(payment.is_settled());
        assert_eq!(payment.paid_at, Some(now));

        // Success is immutable
        let later = now + chrono::Duration::minutes(1);
        assert!(payment.mark_succeeded(later).is_err());
        assert_eq!(payment.paid_at, Some(now));
    }

    #[test]
    fn test_failed_gateway_payment_stays_failed() {
        let mut payment = Payment::from_gateway(Uuid::new_v4(), Decimal::new(100, 0), "txn_1".into(), false, Utc::now());
        assert_eq!(payment.status, PaymentStatus::Failed);
        assert!(payment.paid_at.is_none());
        assert!(payment.mark_succeeded(Utc::now()).is_err());
    }
}
