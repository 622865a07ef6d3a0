//! Signed, expiring unsubscribe tokens (HS256 JWT).
//!
//! A token names exactly one subscription. Verification failures are never
//! distinguished to the caller, so a forged token and an expired one look
//! the same from outside.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnsubscribeClaims {
    /// Subscription id.
    sub: String,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid or expired unsubscribe token")]
    InvalidOrExpired,

    #[error("Failed to sign unsubscribe token: {0}")]
    Signing(String),
}

#[derive(Clone)]
pub struct UnsubscribeTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl UnsubscribeTokens {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    pub fn issue(&self, subscription_id: Uuid) -> Result<String, TokenError> {
        self.issue_at(subscription_id, Utc::now())
    }

    pub fn issue_at(&self, subscription_id: Uuid, now: DateTime<Utc>) -> Result<String, TokenError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| TokenError::Signing("token lifetime out of range".to_string()))?;
        let claims = UnsubscribeClaims {
            sub: subscription_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Return the subscription id a valid, unexpired token was issued for.
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<UnsubscribeClaims>(token, &self.decoding, &validation).map_err(|e| {
            tracing::debug!(error = %e, "Rejected unsubscribe token");
            TokenError::InvalidOrExpired
        })?;

        Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::InvalidOrExpired)
    }
}
