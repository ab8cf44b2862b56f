pub mod app_config;
pub mod database;
pub mod events;
pub mod http_services;
pub mod inventory_repo;
pub mod outbox_repo;
pub mod payment_repo;
pub mod quote_repo;
pub mod redis_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use events::EventProducer;
pub use http_services::{HttpDocumentGenerator, HttpNotifier};
pub use inventory_repo::PgSeatAllocator;
pub use outbox_repo::PgEffectOutbox;
pub use payment_repo::PgPaymentRepository;
pub use quote_repo::PgQuoteRepository;
pub use redis_repo::RedisClient;

use jetset_core::repository::StoreError;

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
