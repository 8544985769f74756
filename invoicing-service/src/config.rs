//! Configuration for invoicing-service.

use service_core::config::Config as CoreConfig;
use service_core::error::AppError;

/// PostgreSQL connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Periodic biller settings.
#[derive(Debug, Clone)]
pub struct BillingRunConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct InvoicingConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub billing_run: BillingRunConfig,
}

impl InvoicingConfig {
    /// Load configuration from the environment (and a `.env` file if present).
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let common = CoreConfig::load()?;

        let database = DatabaseConfig {
            url: require_env("DATABASE_URL")?,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
        };

        let billing_run = BillingRunConfig {
            enabled: parse_env("BILLING_RUN_ENABLED", true)?,
            interval_secs: parse_env("BILLING_RUN_INTERVAL_SECS", 3600)?,
        };

        Ok(Self {
            common,
            service_name: env_or("SERVICE_NAME", "invoicing-service"),
            log_level: env_or("LOG_LEVEL", "info"),
            otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok(),
            database,
            billing_run,
        })
    }
}

fn require_env(key: &str) -> Result<String, AppError> {
    std::env::var(key).map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is not set", key)))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is not a valid value", key))),
        Err(_) => Ok(default),
    }
}
