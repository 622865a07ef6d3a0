use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryPolicy;

/// Upper bound for day-valued settings (about ten years).
const MAX_DAYS: i64 = 3650;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string. When set, the send-rate gate is shared through Redis.
    pub redis_url: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Google Air Quality API key
    pub google_air_quality_api_key: String,

    /// Census geocoder base URL
    pub geocoder_base_url: String,

    /// Google Air Quality API base URL
    pub air_quality_base_url: String,

    /// Timeout for a single outbound provider call in milliseconds (default: 5000)
    pub provider_timeout_ms: u64,

    /// Days a geocoded ZIP code stays fresh before background refresh (default: 30)
    pub coordinate_refresh_days: i64,

    /// Resend API key; without it messages are only logged
    pub resend_api_key: Option<String>,

    /// Resend API base URL
    pub resend_base_url: String,

    /// Email sender address
    pub email_from: String,

    /// Public site URL used to build unsubscribe links
    pub site_url: String,

    /// HMAC secret for unsubscribe tokens
    pub unsubscribe_secret: String,

    /// Unsubscribe token lifetime in days (default: 365)
    pub unsubscribe_token_ttl_days: i64,

    /// Send attempts allowed to start per second (default: 2)
    pub send_rate_per_second: u32,

    /// Maximum send attempts per message (default: 4)
    pub send_max_attempts: u32,

    /// First backoff delay after provider backpressure in milliseconds (default: 1000)
    pub send_backoff_base_ms: u64,

    /// Backoff growth factor (default: 2.0)
    pub send_backoff_multiplier: f64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| anyhow::anyhow!("{key} environment variable is required"))
        };
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Self {
            database_url: required("DATABASE_URL")?,
            redis_url: lookup("REDIS_URL"),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
            google_air_quality_api_key: required("GOOGLE_AIR_QUALITY_API_KEY")?,
            geocoder_base_url: or_default(
                "GEOCODER_BASE_URL",
                "https://geocoding.geo.census.gov/geocoder",
            ),
            air_quality_base_url: or_default(
                "AIR_QUALITY_BASE_URL",
                "https://airquality.googleapis.com/v1",
            ),
            provider_timeout_ms: parse_or(&lookup, "PROVIDER_TIMEOUT_MS", 5000)?,
            coordinate_refresh_days: parse_or(&lookup, "COORDINATE_REFRESH_DAYS", 30)?,
            resend_api_key: lookup("RESEND_API_KEY"),
            resend_base_url: or_default("RESEND_BASE_URL", "https://api.resend.com"),
            email_from: or_default("EMAIL_FROM", "AQI Monitor <notifications@airwatch.local>"),
            site_url: required("SITE_URL")?.trim_end_matches('/').to_string(),
            unsubscribe_secret: required("UNSUBSCRIBE_SECRET")?,
            unsubscribe_token_ttl_days: parse_or(&lookup, "UNSUBSCRIBE_TOKEN_TTL_DAYS", 365)?,
            send_rate_per_second: parse_or(&lookup, "SEND_RATE_PER_SECOND", 2)?,
            send_max_attempts: parse_or(&lookup, "SEND_MAX_ATTEMPTS", 4)?,
            send_backoff_base_ms: parse_or(&lookup, "SEND_BACKOFF_BASE_MS", 1000)?,
            send_backoff_multiplier: parse_or(&lookup, "SEND_BACKOFF_MULTIPLIER", 2.0)?,
        };

        check_days("COORDINATE_REFRESH_DAYS", config.coordinate_refresh_days)?;
        check_days("UNSUBSCRIBE_TOKEN_TTL_DAYS", config.unsubscribe_token_ttl_days)?;
        if config.send_rate_per_second == 0 {
            anyhow::bail!("SEND_RATE_PER_SECOND must be at least 1");
        }
        config
            .send_retry_policy()
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid send retry settings: {e}"))?;

        Ok(config)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    /// How long a geocoded ZIP code stays fresh.
    pub fn coordinate_refresh_after(&self) -> anyhow::Result<chrono::Duration> {
        days("COORDINATE_REFRESH_DAYS", self.coordinate_refresh_days)
    }

    pub fn unsubscribe_token_ttl(&self) -> anyhow::Result<chrono::Duration> {
        days("UNSUBSCRIBE_TOKEN_TTL_DAYS", self.unsubscribe_token_ttl_days)
    }

    /// Retry policy applied to provider backpressure when sending.
    pub fn send_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.send_max_attempts,
            Duration::from_millis(self.send_backoff_base_ms),
            self.send_backoff_multiplier,
        )
    }
}

fn check_days(key: &str, value: i64) -> anyhow::Result<()> {
    if !(1..=MAX_DAYS).contains(&value) {
        anyhow::bail!("{key} must be between 1 and {MAX_DAYS}, got {value}");
    }
    Ok(())
}

fn days(key: &str, value: i64) -> anyhow::Result<chrono::Duration> {
    check_days(key, value)?;
    chrono::Duration::try_days(value).ok_or_else(|| anyhow::anyhow!("{key} is out of range"))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{key} must be a valid {}",
                std::any::type_name::<T>()
            )
        }),
        None => Ok(default),
    }
}
