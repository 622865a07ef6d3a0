//! Google Air Quality API adapter (`currentConditions:lookup`).
//!
//! Only the US EPA index (`usa_epa`) is used; it is requested through the
//! `LOCAL_AQI` extra computation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use airwatch_common::error::AirQualityError;
use airwatch_common::types::{AirQualityReading, Coordinates, PollutantMap, PollutantReading};

use crate::{AirQualityProvider, status_message};

const EPA_INDEX_CODE: &str = "usa_epa";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    location: Coordinates,
    universal_aqi: bool,
    extra_computations: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    indexes: Vec<AqiIndex>,
    #[serde(default)]
    pollutants: Vec<Pollutant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AqiIndex {
    code: String,
    aqi: i32,
    #[serde(default)]
    category: String,
    dominant_pollutant: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Pollutant {
    code: String,
    concentration: Option<Concentration>,
}

#[derive(Debug, Deserialize)]
struct Concentration {
    value: f64,
    units: String,
}

pub struct GoogleAirQuality {
    client: Client,
    base_url: String,
    api_key: String,
}

impl GoogleAirQuality {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl AirQualityProvider for GoogleAirQuality {
    async fn current_conditions(
        &self,
        coordinates: Coordinates,
    ) -> Result<AirQualityReading, AirQualityError> {
        let request = LookupRequest {
            location: coordinates,
            universal_aqi: true,
            extra_computations: &["LOCAL_AQI", "POLLUTANT_CONCENTRATION"],
        };

        let response = self
            .client
            .post(format!("{}/currentConditions:lookup", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            let message = status_message(status, &body);
            tracing::warn!(
                latitude = coordinates.latitude,
                longitude = coordinates.longitude,
                error = %message,
                "Air quality lookup failed"
            );
            return Err(AirQualityError::ProviderUnavailable(message));
        }

        parse_reading(&body)
    }

    fn name(&self) -> &'static str {
        "google-air-quality"
    }
}

fn map_transport_error(error: reqwest::Error) -> AirQualityError {
    if error.is_timeout() {
        AirQualityError::Timeout
    } else {
        AirQualityError::ProviderUnavailable(error.to_string())
    }
}

/// Decode a lookup response into a reading based on the US EPA index.
pub fn parse_reading(body: &[u8]) -> Result<AirQualityReading, AirQualityError> {
    let decoded: LookupResponse = serde_json::from_slice(body).map_err(|e| {
        AirQualityError::ProviderUnavailable(format!("invalid air quality JSON payload: {e}"))
    })?;

    let epa = decoded
        .indexes
        .into_iter()
        .find(|index| index.code == EPA_INDEX_CODE)
        .ok_or(AirQualityError::IndexUnavailable)?;

    let pollutants: PollutantMap = decoded
        .pollutants
        .into_iter()
        .filter_map(|p| {
            p.concentration.map(|c| {
                (
                    p.code,
                    PollutantReading {
                        concentration: c.value,
                        unit: c.units,
                    },
                )
            })
        })
        .collect();

    Ok(AirQualityReading {
        aqi: epa.aqi,
        category: epa.category,
        dominant_pollutant: epa
            .dominant_pollutant
            .unwrap_or_else(|| "Unknown".to_string()),
        pollutants: (!pollutants.is_empty()).then_some(pollutants),
    })
}
