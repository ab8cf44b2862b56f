pub mod actor;
pub mod clock;
pub mod documents;
pub mod effects;
pub mod events;
pub mod inventory;
pub mod payment;
pub mod quote;
pub mod repository;

pub use actor::Actor;
pub use clock::{Clock, ManualClock, SystemClock};
pub use inventory::{FlightInventory, InventoryAudit, NewFlight, SeatHold};
pub use payment::{Payment, PaymentStatus};
pub use quote::{
    BankDetails, CharterRequest, ClientContact, Quote, QuoteKind, QuoteStatus, RejectionReason,
    REJECTION_REASONS,
};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Not enough seats available: requested {requested}, available {available}")]
    InventoryUnavailable { requested: u32, available: u32 },
    #[error("State conflict: {0}")]
    StateConflict(String),
    #[error("Payment missing: {0}")]
    PaymentMissing(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("External service error: {0}")]
    ExternalServiceError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ValidationError(_) => "VALIDATION_ERROR",
            CoreError::InventoryUnavailable { .. } => "INVENTORY_UNAVAILABLE",
            CoreError::StateConflict(_) => "STATE_CONFLICT",
            CoreError::PaymentMissing(_) => "PAYMENT_MISSING",
            CoreError::NotFoundError(_) => "NOT_FOUND",
            CoreError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            CoreError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
