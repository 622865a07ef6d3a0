//! Email rendering for daily updates and alerts.

use airwatch_common::types::AirQualityReading;

use crate::classifier::{AlertTier, Classification, classify};

/// What kind of message a subscriber receives for one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Daily update while the air is good.
    Good,
    /// Alert carrying the tier's guidance.
    Warning(AlertTier),
}

impl From<AlertTier> for MessageKind {
    fn from(tier: AlertTier) -> Self {
        match tier {
            AlertTier::Good => MessageKind::Good,
            tier => MessageKind::Warning(tier),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Inputs shared by every message rendered for one ZIP code.
#[derive(Debug, Clone)]
pub struct MessageContext<'a> {
    pub zip_code: &'a str,
    pub reading: &'a AirQualityReading,
    pub site_url: &'a str,
}

pub fn unsubscribe_url(site_url: &str, token: &str) -> String {
    format!("{}/unsubscribe?token={}", site_url.trim_end_matches('/'), token)
}

/// Render the message for one subscriber. `token` is that subscriber's
/// unsubscribe token.
pub fn render(ctx: &MessageContext<'_>, token: &str) -> RenderedMessage {
    let classification = classify(ctx.reading.aqi);
    let kind = MessageKind::from(classification.tier);

    let subject = match kind {
        MessageKind::Good => "Daily AQI Update: Good Air Quality in Your Area".to_string(),
        MessageKind::Warning(tier) => {
            format!("AQI Alert: {} Air Quality in Your Area", tier.label())
        }
    };

    let body = render_body(ctx, kind, &classification, &unsubscribe_url(ctx.site_url, token));
    RenderedMessage { subject, body }
}

fn render_body(
    ctx: &MessageContext<'_>,
    kind: MessageKind,
    classification: &Classification,
    unsubscribe: &str,
) -> String {
    let color = classification.color.hex();
    let heading = match kind {
        MessageKind::Good => "Good Air Quality Today".to_string(),
        MessageKind::Warning(tier) => format!("{} Air Quality Alert", tier.label()),
    };
    let intro = match kind {
        MessageKind::Good => "Here is your daily air quality update",
        MessageKind::Warning(_) => "Air quality has reached a level that may affect your health",
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
  <div style="max-width: 600px; margin: 0 auto;">
    <h1 style="background-color: {color}; padding: 16px; margin: 0;">{heading}</h1>
    <p>{intro} for ZIP code <strong>{zip}</strong>.</p>
    <p>Current AQI: <strong>{aqi}</strong> ({category})</p>
    <p>Dominant pollutant: {pollutant}</p>
    <p>{guidance}</p>
    <hr>
    <p style="font-size: 12px; color: #777;">
      You are receiving this email because you subscribed to air quality updates.
      <a href="{unsubscribe}">Unsubscribe</a>
    </p>
  </div>
</body>
</html>"#,
        zip = escape_html(ctx.zip_code),
        aqi = ctx.reading.aqi,
        category = escape_html(&ctx.reading.category),
        pollutant = escape_html(&ctx.reading.dominant_pollutant),
        guidance = classification.guidance,
        unsubscribe = escape_html(unsubscribe),
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
