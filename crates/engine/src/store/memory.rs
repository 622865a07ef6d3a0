use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use airwatch_common::error::AppError;
use airwatch_common::types::{
    AirQualityReading, AirQualityRecord, CoordinateCacheEntry, Coordinates, Subscription,
};

use super::{AirQualityStore, CoordinateStore, SubscriptionStore, pollutant_json};

/// In-process store with the same key semantics as the Postgres schema.
#[derive(Debug, Default)]
pub struct MemoryStore {
    coordinates: RwLock<HashMap<String, CoordinateCacheEntry>>,
    readings: RwLock<BTreeMap<(String, DateTime<Utc>), AirQualityRecord>>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a coordinate entry as-is (including an already elapsed `refresh_after`).
    pub async fn put_coordinates(&self, entry: CoordinateCacheEntry) {
        self.coordinates
            .write()
            .await
            .insert(entry.zip_code.clone(), entry);
    }

    pub async fn add_subscription(&self, subscription: Subscription) {
        let mut subs = self.subscriptions.write().await;
        subs.retain(|s| s.id != subscription.id);
        subs.push(subscription);
    }

    /// Number of stored readings for `zip_code`, across all hours.
    pub async fn reading_count(&self, zip_code: &str) -> usize {
        self.readings
            .read()
            .await
            .keys()
            .filter(|(zip, _)| zip == zip_code)
            .count()
    }
}

#[async_trait]
impl CoordinateStore for MemoryStore {
    async fn find_coordinates(
        &self,
        zip_code: &str,
    ) -> Result<Option<CoordinateCacheEntry>, AppError> {
        Ok(self.coordinates.read().await.get(zip_code).cloned())
    }

    async fn upsert_coordinates(
        &self,
        zip_code: &str,
        coordinates: Coordinates,
        refresh_after: DateTime<Utc>,
    ) -> Result<CoordinateCacheEntry, AppError> {
        let entry = CoordinateCacheEntry {
            zip_code: zip_code.to_string(),
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            refresh_after,
            updated_at: Utc::now(),
        };
        self.coordinates
            .write()
            .await
            .insert(zip_code.to_string(), entry.clone());
        Ok(entry)
    }
}

#[async_trait]
impl AirQualityStore for MemoryStore {
    async fn upsert_reading(
        &self,
        zip_code: &str,
        observed_at: DateTime<Utc>,
        reading: &AirQualityReading,
    ) -> Result<AirQualityRecord, AppError> {
        let record = AirQualityRecord {
            zip_code: zip_code.to_string(),
            observed_at,
            aqi: reading.aqi,
            category: reading.category.clone(),
            dominant_pollutant: reading.dominant_pollutant.clone(),
            pollutant_data: pollutant_json(reading)?,
            updated_at: Utc::now(),
        };
        self.readings
            .write()
            .await
            .insert((zip_code.to_string(), observed_at), record.clone());
        Ok(record)
    }

    async fn latest_reading(&self, zip_code: &str) -> Result<Option<AirQualityRecord>, AppError> {
        let readings = self.readings.read().await;
        Ok(readings
            .iter()
            .filter(|((zip, _), _)| zip == zip_code)
            .map(|(_, record)| record)
            .max_by_key(|record| record.observed_at)
            .cloned())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn active_zip_codes(&self) -> Result<Vec<String>, AppError> {
        let subs = self.subscriptions.read().await;
        let zips: BTreeSet<String> = subs
            .iter()
            .filter(|s| s.active)
            .map(|s| s.zip_code.clone())
            .collect();
        Ok(zips.into_iter().collect())
    }

    async fn active_subscriptions(&self, zip_code: &str) -> Result<Vec<Subscription>, AppError> {
        let subs = self.subscriptions.read().await;
        Ok(subs
            .iter()
            .filter(|s| s.active && s.zip_code == zip_code)
            .cloned()
            .collect())
    }

    async fn find_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        let subs = self.subscriptions.read().await;
        Ok(subs.iter().find(|s| s.id == id).cloned())
    }

    async fn deactivate(&self, id: Uuid) -> Result<bool, AppError> {
        let mut subs = self.subscriptions.write().await;
        match subs.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
