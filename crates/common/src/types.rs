use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Cached geocoding result for one ZIP code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CoordinateCacheEntry {
    pub zip_code: String,
    pub latitude: f64,
    pub longitude: f64,
    /// After this instant the entry is served stale and refreshed in the background.
    pub refresh_after: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CoordinateCacheEntry {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.refresh_after > now
    }
}

/// A contact subscribed to alerts for a ZIP code.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub email: String,
    pub zip_code: String,
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Concentration of a single pollutant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantReading {
    pub concentration: f64,
    pub unit: String,
}

/// Pollutant code (e.g. `pm25`) to its reading.
pub type PollutantMap = BTreeMap<String, PollutantReading>;

/// Current conditions as returned by the AQI provider, before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityReading {
    pub aqi: i32,
    pub category: String,
    pub dominant_pollutant: String,
    pub pollutants: Option<PollutantMap>,
}

/// One stored reading per ZIP code per hour.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AirQualityRecord {
    pub zip_code: String,
    /// Hour-truncated UTC timestamp; part of the unique key.
    pub observed_at: DateTime<Utc>,
    pub aqi: i32,
    pub category: String,
    pub dominant_pollutant: String,
    pub pollutant_data: Option<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// A rendered message addressed to one recipient. Lives for one dispatch call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchJob {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Subscription the message was rendered for, when there is one.
    pub subscription_id: Option<Uuid>,
    /// Send attempts made so far.
    pub attempts: u32,
}

impl DispatchJob {
    pub fn new(recipient: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            subscription_id: None,
            attempts: 0,
        }
    }

    pub fn for_subscription(mut self, subscription_id: Uuid) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }
}
