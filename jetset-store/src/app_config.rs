use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    /// Rate limiting is off when absent.
    pub redis: Option<RedisConfig>,
    /// Transition events go nowhere when absent.
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub lifecycle: LifecycleConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "quotes.transitioned".into()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
}

/// Timing rules for holds, the reaper and the dispatcher. Overridable at
/// startup from the `business_rules` table.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub unconfirmed_hold_minutes: i64,
    pub reaper_interval_seconds: u64,
    pub dispatch_poll_seconds: u64,
    pub dispatch_max_attempts: u32,
    pub dispatch_base_backoff_seconds: i64,
    pub dispatch_max_backoff_seconds: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            unconfirmed_hold_minutes: 30,
            reaper_interval_seconds: 60,
            dispatch_poll_seconds: 5,
            dispatch_max_attempts: 5,
            dispatch_base_backoff_seconds: 2,
            dispatch_max_backoff_seconds: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub document_generator_url: String,
    pub notifier_url: String,
    #[serde(default = "default_service_timeout")]
    pub timeout_seconds: u64,
}

fn default_service_timeout() -> u64 {
    10
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `JETSET__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("JETSET").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> Result<Config, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn test_default_config_file_parses() {
        let config = from_toml(include_str!("../../config/default.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.lifecycle, LifecycleConfig::default());
        assert!(config.redis.is_none());
        assert!(config.kafka.is_none());
    }

    #[test]
    fn test_optional_sections() {
        let toml = r#"
            [server]
            port = 8080

            [database]
            url = "postgres://jetset@localhost/jetset"

            [redis]
            url = "redis://127.0.0.1/"

            [kafka]
            brokers = "localhost:9092"

            [auth]
            jwt_secret = "dev-secret"

            [lifecycle]
            unconfirmed_hold_minutes = 15
            reaper_interval_seconds = 30
            dispatch_poll_seconds = 5
            dispatch_max_attempts = 8
            dispatch_base_backoff_seconds = 1
            dispatch_max_backoff_seconds = 60

            [services]
            document_generator_url = "http://docs.internal"
            notifier_url = "http://notify.internal"
        "#;
        let config = from_toml(toml).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.redis.unwrap().rate_limit_per_minute, 60);
        assert_eq!(config.kafka.unwrap().topic, "quotes.transitioned");
        assert_eq!(config.lifecycle.unconfirmed_hold_minutes, 15);
        assert_eq!(config.services.timeout_seconds, 10);
    }
}
