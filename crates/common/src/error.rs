use std::time::Duration;

use thiserror::Error;

/// Message shown to end users when a downstream service misbehaves.
pub const TRY_LATER_MESSAGE: &str = "Air quality service is temporarily unavailable, please try again later";

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Human-facing message; raw storage errors never reach end users.
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(msg) | AppError::Validation(msg) => msg.clone(),
            AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Config(_)
            | AppError::Internal(_) => TRY_LATER_MESSAGE.to_string(),
        }
    }
}

/// Failures resolving a ZIP code to coordinates.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeoError {
    /// The provider answered but had no match for the ZIP code. Permanent.
    #[error("No coordinates found for ZIP code {0}")]
    NotFound(String),

    /// Non-2xx or malformed provider response.
    #[error("Geocoding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Geocoding request timed out after {0:?}")]
    Timeout(Duration),

    /// The coordinate cache could not be read or written.
    #[error("Coordinate cache error: {0}")]
    Storage(String),
}

impl GeoError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeoError::ProviderUnavailable(_) | GeoError::Timeout(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            GeoError::NotFound(zip) => format!("Invalid ZIP code: {zip}"),
            _ => TRY_LATER_MESSAGE.to_string(),
        }
    }
}

impl From<AppError> for GeoError {
    fn from(err: AppError) -> Self {
        GeoError::Storage(err.to_string())
    }
}

/// Failures fetching current conditions from the AQI provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AirQualityError {
    #[error("Air quality provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Air quality request timed out")]
    Timeout,

    /// The response had no US EPA index for the location.
    #[error("US EPA AQI not available for this location")]
    IndexUnavailable,
}

impl AirQualityError {
    pub fn user_message(&self) -> String {
        match self {
            AirQualityError::IndexUnavailable => {
                "Air quality data is not available for this location".to_string()
            }
            _ => TRY_LATER_MESSAGE.to_string(),
        }
    }
}

/// Outcome of a single failed send attempt, as reported by a notification provider.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// Provider backpressure ("too many requests"). The only retryable kind.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// The provider refused the message (invalid recipient, bad payload, ...).
    #[error("Rejected by provider: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SendError {
    pub fn is_backpressure(&self) -> bool {
        matches!(self, SendError::RateLimited(_))
    }
}
