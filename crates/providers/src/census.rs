//! US Census Bureau geocoder adapter.
//!
//! Uses the free `locations/address` endpoint with only the ZIP code filled in
//! and takes the first address match. The Census API reports coordinates as
//! `{ x: longitude, y: latitude }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use airwatch_common::error::GeoError;
use airwatch_common::types::Coordinates;

use crate::{GeocodingProvider, status_message};

const CENSUS_BENCHMARK: &str = "2020";

#[derive(Debug, Deserialize)]
struct CensusResponse {
    result: Option<CensusResult>,
}

#[derive(Debug, Deserialize)]
struct CensusResult {
    #[serde(rename = "addressMatches", default)]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: CensusCoordinates,
}

#[derive(Debug, Deserialize)]
struct CensusCoordinates {
    x: f64,
    y: f64,
}

pub struct CensusGeocoder {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl CensusGeocoder {
    /// Build a geocoder whose requests are bounded by `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn lookup_url(&self) -> String {
        format!("{}/locations/address", self.base_url)
    }

    fn map_transport_error(&self, error: reqwest::Error) -> GeoError {
        if error.is_timeout() {
            GeoError::Timeout(self.timeout)
        } else {
            GeoError::ProviderUnavailable(error.to_string())
        }
    }
}

#[async_trait]
impl GeocodingProvider for CensusGeocoder {
    async fn geocode(&self, zip_code: &str) -> Result<Coordinates, GeoError> {
        let response = self
            .client
            .get(self.lookup_url())
            .query(&[
                ("street", ""),
                ("city", ""),
                ("state", ""),
                ("benchmark", CENSUS_BENCHMARK),
                ("format", "json"),
                ("zip", zip_code),
            ])
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        if !status.is_success() {
            return Err(GeoError::ProviderUnavailable(status_message(status, &body)));
        }

        parse_coordinates(zip_code, &body)
    }

    fn name(&self) -> &'static str {
        "census"
    }
}

/// Decode a Census geocoder response body. Zero matches is `NotFound`.
pub fn parse_coordinates(zip_code: &str, body: &[u8]) -> Result<Coordinates, GeoError> {
    let decoded: CensusResponse = serde_json::from_slice(body).map_err(|e| {
        GeoError::ProviderUnavailable(format!("invalid Census JSON payload: {e}"))
    })?;

    let result = decoded.result.ok_or_else(|| {
        GeoError::ProviderUnavailable("Census response has no result".to_string())
    })?;

    let first = result
        .address_matches
        .into_iter()
        .next()
        .ok_or_else(|| GeoError::NotFound(zip_code.to_string()))?;

    Ok(Coordinates {
        latitude: first.coordinates.y,
        longitude: first.coordinates.x,
    })
}
