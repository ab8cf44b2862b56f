use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::LifecycleConfig;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Rows look like `("reaper_interval_seconds", {"value": 30})`.
    pub async fn fetch_lifecycle_rules(&self, defaults: LifecycleConfig) -> Result<LifecycleConfig, sqlx::Error> {
        let rows: Vec<(String, Value)> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for (key, value) in rows {
            match value.get("value") {
                Some(v) => apply_rule(&mut rules, &key, v),
                None => warn!(rule = %key, "Business rule without a value field, ignoring"),
            }
        }
        Ok(rules)
    }
}

fn apply_rule(rules: &mut LifecycleConfig, key: &str, v: &Value) {
    let applied = match key {
        "unconfirmed_hold_minutes" => v.as_i64().filter(|m| *m > 0).map(|m| rules.unconfirmed_hold_minutes = m),
        "reaper_interval_seconds" => v.as_u64().filter(|s| *s > 0).map(|s| rules.reaper_interval_seconds = s),
        "dispatch_poll_seconds" => v.as_u64().filter(|s| *s > 0).map(|s| rules.dispatch_poll_seconds = s),
        "dispatch_max_attempts" => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .map(|n| rules.dispatch_max_attempts = n),
        "dispatch_base_backoff_seconds" => v.as_i64().filter(|s| *s > 0).map(|s| rules.dispatch_base_backoff_seconds = s),
        "dispatch_max_backoff_seconds" => v.as_i64().filter(|s| *s > 0).map(|s| rules.dispatch_max_backoff_seconds = s),
        // Rules owned by other services share the table.
        _ => return,
    };

    match applied {
        Some(()) => info!(rule = %key, value = %v, "Business rule override applied"),
        None => warn!(rule = %key, value = %v, "Business rule has an unusable value, keeping default"),
    }
}
