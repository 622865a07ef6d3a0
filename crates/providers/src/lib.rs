//! Outbound data providers: ZIP code geocoding and current air quality.

pub mod census;
pub mod google;

use async_trait::async_trait;

use airwatch_common::error::{AirQualityError, GeoError};
use airwatch_common::types::{AirQualityReading, Coordinates};

/// Resolves a ZIP code to coordinates.
#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    async fn geocode(&self, zip_code: &str) -> Result<Coordinates, GeoError>;

    /// Human-readable provider name for logs.
    fn name(&self) -> &'static str;
}

/// Fetches current conditions for a location.
#[async_trait]
pub trait AirQualityProvider: Send + Sync {
    async fn current_conditions(
        &self,
        coordinates: Coordinates,
    ) -> Result<AirQualityReading, AirQualityError>;

    fn name(&self) -> &'static str;
}

/// Single-line, length-limited rendering of an error response body.
pub(crate) fn body_preview(body: &[u8]) -> String {
    const PREVIEW_CHAR_LIMIT: usize = 160;

    let compact = String::from_utf8_lossy(body)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let preview = compact.chars().take(PREVIEW_CHAR_LIMIT).collect::<String>();
    if compact.chars().count() > PREVIEW_CHAR_LIMIT {
        format!("{preview}...")
    } else {
        preview
    }
}

pub(crate) fn status_message(status: reqwest::StatusCode, body: &[u8]) -> String {
    let preview = body_preview(body);
    if preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_preview_compacts_whitespace() {
        assert_eq!(body_preview(b"  quota\n   exceeded  "), "quota exceeded");
    }

    #[test]
    fn test_body_preview_truncates() {
        let long = "x".repeat(500);
        let preview = body_preview(long.as_bytes());
        assert_eq!(preview.len(), 163);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_status_message_without_body() {
        let msg = status_message(reqwest::StatusCode::BAD_GATEWAY, b"");
        assert_eq!(msg, "status 502");
    }
}
