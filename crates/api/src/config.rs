//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::StripeConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables (a `.env` file is loaded first if present):
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs in memory
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `PAYMENT_SECRET_KEY`: provider API key; unset uses the in-memory gateway
/// - `PAYMENT_API_BASE`: provider base URL (default: `"https://api.stripe.com"`)
/// - `PAYMENT_WEBHOOK_SECRET`: webhook signing secret
/// - `PAYMENT_CURRENCY`: ISO currency code (default: `"usd"`)
/// - `PAYMENT_TIMEOUT_SECS`: authorization deadline (default: `10`)
/// - `WEBHOOK_TOLERANCE_SECS`: accepted signature age (default: `300`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub payment: PaymentConfig,
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Payment provider settings.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub api_base: String,
    pub secret_key: Option<String>,
    pub webhook_secret: String,
    pub currency: String,
    pub timeout: Duration,
    pub webhook_tolerance: Duration,
}

impl PaymentConfig {
    /// Returns provider settings if an API key is configured.
    pub fn stripe(&self) -> Option<StripeConfig> {
        self.secret_key.as_ref().map(|secret_key| StripeConfig {
            api_base: self.api_base.clone(),
            secret_key: secret_key.clone(),
            webhook_secret: self.webhook_secret.clone(),
            currency: self.currency.clone(),
            timeout: self.timeout,
            webhook_tolerance: self.webhook_tolerance,
        })
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.stripe.com".to_string(),
            secret_key: None,
            webhook_secret: "whsec_dev".to_string(),
            currency: "usd".to_string(),
            timeout: Duration::from_secs(10),
            webhook_tolerance: Duration::from_secs(300),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let payment_defaults = defaults.payment;
        Self {
            host: var("HOST").unwrap_or(defaults.host),
            port: parsed("PORT", defaults.port),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match var("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: var("DATABASE_URL"),
            database_max_connections: parsed(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            payment: PaymentConfig {
                api_base: var("PAYMENT_API_BASE").unwrap_or(payment_defaults.api_base),
                secret_key: var("PAYMENT_SECRET_KEY"),
                webhook_secret: var("PAYMENT_WEBHOOK_SECRET")
                    .unwrap_or(payment_defaults.webhook_secret),
                currency: var("PAYMENT_CURRENCY").unwrap_or(payment_defaults.currency),
                timeout: Duration::from_secs(parsed(
                    "PAYMENT_TIMEOUT_SECS",
                    payment_defaults.timeout.as_secs(),
                )),
                webhook_tolerance: Duration::from_secs(parsed(
                    "WEBHOOK_TOLERANCE_SECS",
                    payment_defaults.webhook_tolerance.as_secs(),
                )),
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 5,
            payment: PaymentConfig::default(),
        }
    }
}
