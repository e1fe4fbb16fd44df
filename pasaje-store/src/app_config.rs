use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    /// Seats in Redis, tickets and payment records in Postgres
    Persistent,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub seat_hold_seconds: u64,
    #[serde(default = "default_max_hold")]
    pub max_hold_seconds: u64,
    /// ITBMS as a decimal string, e.g. "0.07"
    #[serde(default = "default_itbms_rate")]
    pub itbms_rate: String,
    #[serde(default = "default_cutoff")]
    pub cancellation_cutoff_minutes: i64,
    #[serde(default)]
    pub allow_passenger_refunds: bool,
    #[serde(default)]
    pub decline_releases_seat: bool,
    #[serde(default = "default_lease")]
    pub settlement_lease_seconds: i64,
    #[serde(default = "default_sweep")]
    pub sweep_interval_seconds: u64,
}

fn default_max_hold() -> u64 { 1800 }
fn default_itbms_rate() -> String { "0.07".to_string() }
fn default_cutoff() -> i64 { 60 }
fn default_lease() -> i64 { 30 }
fn default_sweep() -> u64 { 15 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

fn default_pool_size() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub ticket_topic: String,
}

fn default_topic() -> String { "tickets.events".to_string() }

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    pub card: Option<CardProviderConfig>,
    pub wallet: Option<WalletProviderConfig>,
    pub mock: Option<MockProviderConfig>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CardProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    #[serde(default = "default_tolerance")]
    pub tolerance_seconds: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_tolerance() -> i64 { 300 }
fn default_currency() -> String { "USD".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct WalletProviderConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub secret_key: String,
    pub domain: String,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: i64,
}

fn default_session_ttl() -> i64 { 3600 }

#[derive(Debug, Deserialize, Clone)]
pub struct MockProviderConfig {
    pub shared_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 30,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // PASAJE__BUSINESS_RULES__SEAT_HOLD_SECONDS=600
            .add_source(config::Environment::with_prefix("PASAJE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_rules() {
        let raw = r#"
            [server]
            port = 8080

            [auth]
            jwt_secret = "dev"
            jwt_expiration_seconds = 3600

            [business_rules]
            seat_hold_seconds = 300
        "#;

        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.business_rules.itbms_rate, "0.07");
        assert_eq!(cfg.business_rules.max_hold_seconds, 1800);
        assert!(!cfg.business_rules.decline_releases_seat);
        assert!(cfg.providers.card.is_none());
        assert_eq!(cfg.providers.circuit_breaker.failure_threshold, 5);
    }
}
