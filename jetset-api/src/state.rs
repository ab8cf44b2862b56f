use jetset_booking::QuoteLifecycle;
use jetset_store::RedisClient;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub issuer: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<QuoteLifecycle>,
    pub auth: AuthConfig,
    /// Per-IP limiter; requests pass through unchecked when unset.
    pub rate_limiter: Option<Arc<RedisClient>>,
}
