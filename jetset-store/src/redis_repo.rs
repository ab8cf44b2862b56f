use redis::RedisResult;
use tracing::debug;

/// Fixed-window request counter per client, used to throttle the public
/// submission endpoints.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    limit_per_window: i64,
    window_seconds: i64,
}

impl RedisClient {
    pub fn new(connection_string: &str, limit_per_minute: i64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            limit_per_window: limit_per_minute,
            window_seconds: 60,
        })
    }

    /// `true` while the client is within its budget for the current window.
    pub async fn check_rate_limit(&self, client_key: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = rate_limit_key(client_key);

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(&key, 1)
            .expire(&key, self.window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        if count > self.limit_per_window {
            debug!(client = %client_key, count, limit = self.limit_per_window, "Rate limit exceeded");
        }
        Ok(count <= self.limit_per_window)
    }
}

fn rate_limit_key(client_key: &str) -> String {
    format!("jetset:ratelimit:{}", client_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_keys_are_namespaced() {
        assert_eq!(rate_limit_key("10.0.0.7"), "jetset:ratelimit:10.0.0.7");
    }

    #[test]
    fn test_rejects_malformed_url() {
        assert!(RedisClient::new("not a url", 60).is_err());
    }
}
