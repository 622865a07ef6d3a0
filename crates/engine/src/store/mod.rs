//! Persistence seams for the update pipeline.
//!
//! `PgStore` backs production runs; `MemoryStore` backs tests and local
//! dry runs. Both honor the same uniqueness rules: one coordinate entry per
//! ZIP code and one reading per ZIP code per hour.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use uuid::Uuid;

use airwatch_common::error::AppError;
use airwatch_common::types::{
    AirQualityReading, AirQualityRecord, CoordinateCacheEntry, Coordinates, Subscription,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait CoordinateStore: Send + Sync {
    async fn find_coordinates(&self, zip_code: &str)
    -> Result<Option<CoordinateCacheEntry>, AppError>;

    /// Insert or replace the entry for `zip_code`.
    async fn upsert_coordinates(
        &self,
        zip_code: &str,
        coordinates: Coordinates,
        refresh_after: DateTime<Utc>,
    ) -> Result<CoordinateCacheEntry, AppError>;
}

#[async_trait]
pub trait AirQualityStore: Send + Sync {
    /// Insert or overwrite the reading keyed by (`zip_code`, `observed_at`).
    /// Callers pass an hour-truncated `observed_at`, see [`hour_bucket`].
    async fn upsert_reading(
        &self,
        zip_code: &str,
        observed_at: DateTime<Utc>,
        reading: &AirQualityReading,
    ) -> Result<AirQualityRecord, AppError>;

    async fn latest_reading(&self, zip_code: &str) -> Result<Option<AirQualityRecord>, AppError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Distinct ZIP codes with at least one active subscription, sorted.
    async fn active_zip_codes(&self) -> Result<Vec<String>, AppError>;

    async fn active_subscriptions(&self, zip_code: &str) -> Result<Vec<Subscription>, AppError>;

    async fn find_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError>;

    /// Mark a subscription inactive. Returns `false` when no row matched.
    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError>;
}

/// Truncate a timestamp to the start of its UTC hour.
pub fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// Serialize a reading's pollutant breakdown for the JSONB column.
pub(crate) fn pollutant_json(
    reading: &AirQualityReading,
) -> Result<Option<serde_json::Value>, AppError> {
    reading
        .pollutants
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| AppError::Internal(format!("Failed to encode pollutant data: {e}")))
}
