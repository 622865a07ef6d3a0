use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use airwatch_common::error::AppError;
use airwatch_common::types::{
    AirQualityReading, AirQualityRecord, CoordinateCacheEntry, Coordinates, Subscription,
};

use super::{AirQualityStore, CoordinateStore, SubscriptionStore, pollutant_json};

/// Postgres-backed store for coordinates, readings and subscriptions.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CoordinateStore for PgStore {
    async fn find_coordinates(
        &self,
        zip_code: &str,
    ) -> Result<Option<CoordinateCacheEntry>, AppError> {
        let entry = sqlx::query_as::<_, CoordinateCacheEntry>(
            r#"
            SELECT zip_code, latitude, longitude, refresh_after, updated_at
            FROM zip_coordinates
            WHERE zip_code = $1
            "#,
        )
        .bind(zip_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn upsert_coordinates(
        &self,
        zip_code: &str,
        coordinates: Coordinates,
        refresh_after: DateTime<Utc>,
    ) -> Result<CoordinateCacheEntry, AppError> {
        let entry = sqlx::query_as::<_, CoordinateCacheEntry>(
            r#"
            INSERT INTO zip_coordinates (zip_code, latitude, longitude, refresh_after, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (zip_code) DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                refresh_after = EXCLUDED.refresh_after,
                updated_at = NOW()
            RETURNING zip_code, latitude, longitude, refresh_after, updated_at
            "#,
        )
        .bind(zip_code)
        .bind(coordinates.latitude)
        .bind(coordinates.longitude)
        .bind(refresh_after)
        .fetch_one(&self.pool)
        .await?;

        Ok(entry)
    }
}

#[async_trait]
impl AirQualityStore for PgStore {
    async fn upsert_reading(
        &self,
        zip_code: &str,
        observed_at: DateTime<Utc>,
        reading: &AirQualityReading,
    ) -> Result<AirQualityRecord, AppError> {
        let pollutant_data = pollutant_json(reading)?;

        let record = sqlx::query_as::<_, AirQualityRecord>(
            r#"
            INSERT INTO air_quality_records
                (zip_code, observed_at, aqi, category, dominant_pollutant, pollutant_data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (zip_code, observed_at) DO UPDATE SET
                aqi = EXCLUDED.aqi,
                category = EXCLUDED.category,
                dominant_pollutant = EXCLUDED.dominant_pollutant,
                pollutant_data = EXCLUDED.pollutant_data,
                updated_at = NOW()
            RETURNING zip_code, observed_at, aqi, category, dominant_pollutant, pollutant_data, updated_at
            "#,
        )
        .bind(zip_code)
        .bind(observed_at)
        .bind(reading.aqi)
        .bind(&reading.category)
        .bind(&reading.dominant_pollutant)
        .bind(pollutant_data)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn latest_reading(&self, zip_code: &str) -> Result<Option<AirQualityRecord>, AppError> {
        let record = sqlx::query_as::<_, AirQualityRecord>(
            r#"
            SELECT zip_code, observed_at, aqi, category, dominant_pollutant, pollutant_data, updated_at
            FROM air_quality_records
            WHERE zip_code = $1
            ORDER BY observed_at DESC
            LIMIT 1
            "#,
        )
        .bind(zip_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn active_zip_codes(&self) -> Result<Vec<String>, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT zip_code
            FROM user_subscriptions
            WHERE active = true
            ORDER BY zip_code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(zip,)| zip).collect())
    }

    async fn active_subscriptions(&self, zip_code: &str) -> Result<Vec<Subscription>, AppError> {
        let subs = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, email, zip_code, active, activated_at, created_at
            FROM user_subscriptions
            WHERE zip_code = $1 AND active = true
            ORDER BY created_at
            "#,
        )
        .bind(zip_code)
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    async fn find_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT id, email, zip_code, active, activated_at, created_at
            FROM user_subscriptions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE user_subscriptions SET active = false WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
