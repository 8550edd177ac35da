use std::{env, fmt, net::SocketAddr, time::Duration};

use super::{database_url, server_bind_address};

const DEFAULT_SCAN_INTERVAL_SECS: u64 = 3600;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 300;
const DEFAULT_GRACE_SPAN_SECS: u64 = 3600;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Cadence settings for the policy expiration worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpirySettings {
    /// Delay between two successful scans.
    pub scan_interval: Duration,
    /// Delay before retrying after a failed scan.
    pub retry_backoff: Duration,
    /// How long a lapsed policy stays eligible for notification.
    pub grace_span: Duration,
}

impl Default for ExpirySettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
            grace_span: Duration::from_secs(DEFAULT_GRACE_SPAN_SECS),
        }
    }
}

impl ExpirySettings {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            scan_interval: seconds_var("EXPIRY_SCAN_INTERVAL_SECS", DEFAULT_SCAN_INTERVAL_SECS)?,
            retry_backoff: seconds_var("EXPIRY_RETRY_BACKOFF_SECS", DEFAULT_RETRY_BACKOFF_SECS)?,
            grace_span: seconds_var("EXPIRY_GRACE_SPAN_SECS", DEFAULT_GRACE_SPAN_SECS)?,
        })
    }
}

fn seconds_var(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let Ok(raw) = env::var(name) else {
        return Ok(Duration::from_secs(default));
    };

    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidSeconds { name, value: raw }),
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub expiry: ExpirySettings,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;
        let expiry = ExpirySettings::from_env()?;

        Ok(Self {
            bind_addr,
            environment,
            database_url: database_url(),
            expiry,
        })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidSeconds { name: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidSeconds { name, value } => {
                write!(f, "{name} must be a positive number of seconds (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
