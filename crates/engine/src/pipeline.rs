//! Scheduled update pipeline.
//!
//! One run walks every ZIP code that has an active subscription:
//! resolve coordinates, fetch current conditions, store the hourly reading,
//! classify, render one message per subscriber and dispatch the batch.
//! ZIP codes are processed concurrently; a failing ZIP code is logged and
//! counted, never allowed to stop the others.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use thiserror::Error;

use airwatch_common::error::{AirQualityError, AppError, GeoError};
use airwatch_common::types::{AirQualityReading, DispatchJob, Subscription};
use airwatch_notifier::{DispatchError, Dispatcher};
use airwatch_providers::AirQualityProvider;

use crate::classifier::{AlertTier, classify};
use crate::geo::GeoResolver;
use crate::render::{MessageContext, render};
use crate::store::{AirQualityStore, SubscriptionStore, hour_bucket};
use crate::unsubscribe::{TokenError, UnsubscribeTokens};

pub const DEFAULT_ZIP_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error(transparent)]
    AirQuality(#[from] AirQualityError),

    #[error(transparent)]
    Storage(#[from] AppError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Outcome of one ZIP code within a run.
#[derive(Debug, Clone, Serialize)]
pub struct ZipReport {
    pub zip_code: String,
    pub aqi: i32,
    pub tier: AlertTier,
    pub recipients: usize,
    pub sent: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub zip_codes: usize,
    pub processed: usize,
    pub failed: usize,
    pub messages_sent: usize,
}

pub struct UpdatePipeline {
    resolver: GeoResolver,
    air_quality: Arc<dyn AirQualityProvider>,
    readings: Arc<dyn AirQualityStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    dispatcher: Dispatcher,
    tokens: UnsubscribeTokens,
    site_url: String,
    zip_concurrency: usize,
}

impl UpdatePipeline {
    pub fn new(
        resolver: GeoResolver,
        air_quality: Arc<dyn AirQualityProvider>,
        readings: Arc<dyn AirQualityStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        dispatcher: Dispatcher,
        tokens: UnsubscribeTokens,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            air_quality,
            readings,
            subscriptions,
            dispatcher,
            tokens,
            site_url: site_url.into(),
            zip_concurrency: DEFAULT_ZIP_CONCURRENCY,
        }
    }

    /// Maximum number of ZIP codes processed at once.
    pub fn with_zip_concurrency(mut self, limit: usize) -> Self {
        self.zip_concurrency = limit.max(1);
        self
    }

    pub fn resolver(&self) -> &GeoResolver {
        &self.resolver
    }

    /// Process every ZIP code with an active subscription. Errors only when
    /// the ZIP code list itself cannot be loaded.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let zip_codes = self.subscriptions.active_zip_codes().await?;
        tracing::info!(zip_codes = zip_codes.len(), "Starting air quality update run");

        let results: Vec<(String, Result<ZipReport, PipelineError>)> =
            stream::iter(zip_codes.iter())
                .map(|zip_code| async move {
                    (zip_code.clone(), self.process_zip(zip_code).await)
                })
                .buffer_unordered(self.zip_concurrency)
                .collect()
                .await;

        let mut summary = RunSummary {
            zip_codes: zip_codes.len(),
            ..RunSummary::default()
        };
        for (zip_code, result) in results {
            match result {
                Ok(report) => {
                    summary.processed += 1;
                    summary.messages_sent += report.sent;
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(zip_code = %zip_code, error = %e, "Failed to update ZIP code");
                }
            }
        }

        tracing::info!(
            zip_codes = summary.zip_codes,
            processed = summary.processed,
            failed = summary.failed,
            messages_sent = summary.messages_sent,
            "Air quality update run finished"
        );
        Ok(summary)
    }

    pub async fn process_zip(&self, zip_code: &str) -> Result<ZipReport, PipelineError> {
        let reading = self.fetch_and_store(zip_code).await?;
        let tier = classify(reading.aqi).tier;

        let subscriptions = self.subscriptions.active_subscriptions(zip_code).await?;
        let jobs = self.render_jobs(zip_code, &reading, &subscriptions)?;
        let recipients = jobs.len();
        let sent = self.dispatcher.dispatch(jobs).await?;

        tracing::info!(
            zip_code,
            aqi = reading.aqi,
            tier = %tier,
            recipients,
            sent,
            "ZIP code updated"
        );

        Ok(ZipReport {
            zip_code: zip_code.to_string(),
            aqi: reading.aqi,
            tier,
            recipients,
            sent,
        })
    }

    /// Resolve, fetch and upsert the reading for the current hour.
    pub async fn fetch_and_store(&self, zip_code: &str) -> Result<AirQualityReading, PipelineError> {
        self.fetch_and_store_at(zip_code, Utc::now()).await
    }

    pub async fn fetch_and_store_at(
        &self,
        zip_code: &str,
        now: DateTime<Utc>,
    ) -> Result<AirQualityReading, PipelineError> {
        let coordinates = self.resolver.resolve(zip_code).await?;
        let reading = self.air_quality.current_conditions(coordinates).await?;

        let record = self
            .readings
            .upsert_reading(zip_code, hour_bucket(now), &reading)
            .await?;

        tracing::debug!(
            zip_code,
            observed_at = %record.observed_at,
            aqi = record.aqi,
            provider = self.air_quality.name(),
            "Stored air quality reading"
        );
        Ok(reading)
    }

    /// One job per active subscription, each with its own unsubscribe token.
    pub fn render_jobs(
        &self,
        zip_code: &str,
        reading: &AirQualityReading,
        subscriptions: &[Subscription],
    ) -> Result<Vec<DispatchJob>, TokenError> {
        let ctx = MessageContext {
            zip_code,
            reading,
            site_url: &self.site_url,
        };

        subscriptions
            .iter()
            .filter(|sub| sub.active)
            .map(|sub| {
                let token = self.tokens.issue(sub.id)?;
                let message = render(&ctx, &token);
                Ok(DispatchJob::new(&sub.email, message.subject, message.body).for_subscription(sub.id))
            })
            .collect()
    }
}
