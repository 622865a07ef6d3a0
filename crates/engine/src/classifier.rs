//! AQI severity classification (US EPA breakpoints).

use serde::{Deserialize, Serialize};

/// Alert tier; the lower bound of each tier is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertTier {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorToken {
    Green,
    Yellow,
    Orange,
    Red,
    Purple,
    Maroon,
}

impl ColorToken {
    pub fn hex(&self) -> &'static str {
        match self {
            ColorToken::Green => "#009966",
            ColorToken::Yellow => "#FFFF00",
            ColorToken::Orange => "#FF7E00",
            ColorToken::Red => "#FF0000",
            ColorToken::Purple => "#8F3F97",
            ColorToken::Maroon => "#7E0023",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub tier: AlertTier,
    pub color: ColorToken,
    pub guidance: &'static str,
}

/// Map an AQI value to its tier. Total: anything at or below 50 (including
/// negative garbage) is `Good`, anything from 301 up is `Hazardous`.
pub fn classify(aqi: i32) -> Classification {
    let tier = AlertTier::from_aqi(aqi);
    Classification {
        tier,
        color: tier.color(),
        guidance: tier.guidance(),
    }
}

impl AlertTier {
    pub fn from_aqi(aqi: i32) -> Self {
        match aqi {
            i32::MIN..=50 => AlertTier::Good,
            51..=100 => AlertTier::Moderate,
            101..=150 => AlertTier::UnhealthySensitive,
            151..=200 => AlertTier::Unhealthy,
            201..=300 => AlertTier::VeryUnhealthy,
            _ => AlertTier::Hazardous,
        }
    }

    pub fn color(&self) -> ColorToken {
        match self {
            AlertTier::Good => ColorToken::Green,
            AlertTier::Moderate => ColorToken::Yellow,
            AlertTier::UnhealthySensitive => ColorToken::Orange,
            AlertTier::Unhealthy => ColorToken::Red,
            AlertTier::VeryUnhealthy => ColorToken::Purple,
            AlertTier::Hazardous => ColorToken::Maroon,
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            AlertTier::Good => "Air quality is satisfactory and poses little or no risk.",
            AlertTier::Moderate => {
                "People who are unusually sensitive to air pollution should consider reducing prolonged or heavy outdoor exertion."
            }
            AlertTier::UnhealthySensitive => {
                "People with respiratory or heart disease, the elderly, and children should limit prolonged outdoor exertion."
            }
            AlertTier::Unhealthy => {
                "Everyone should reduce prolonged or heavy exertion outdoors. Sensitive groups should avoid outdoor activities."
            }
            AlertTier::VeryUnhealthy => {
                "Everyone should avoid outdoor physical activity and sensitive groups should remain indoors with windows closed."
            }
            AlertTier::Hazardous => {
                "Everyone should avoid all outdoor physical activity and stay indoors with windows closed."
            }
        }
    }

    /// Upper-case label used in message subjects and headings.
    pub fn label(&self) -> &'static str {
        match self {
            AlertTier::Good => "GOOD",
            AlertTier::Moderate => "MODERATE",
            AlertTier::UnhealthySensitive => "UNHEALTHY FOR SENSITIVE GROUPS",
            AlertTier::Unhealthy => "UNHEALTHY",
            AlertTier::VeryUnhealthy => "VERY UNHEALTHY",
            AlertTier::Hazardous => "HAZARDOUS",
        }
    }
}

impl std::fmt::Display for AlertTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertTier::Good => write!(f, "good"),
            AlertTier::Moderate => write!(f, "moderate"),
            AlertTier::UnhealthySensitive => write!(f, "unhealthy_sensitive"),
            AlertTier::Unhealthy => write!(f, "unhealthy"),
            AlertTier::VeryUnhealthy => write!(f, "very_unhealthy"),
            AlertTier::Hazardous => write!(f, "hazardous"),
        }
    }
}
