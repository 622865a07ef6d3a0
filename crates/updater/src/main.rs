use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use airwatch_common::config::AppConfig;
use airwatch_common::{db, redis_pool};
use airwatch_engine::store::PgStore;
use airwatch_engine::{GeoResolver, UnsubscribeTokens, UpdatePipeline};
use airwatch_notifier::{
    Dispatcher, IntervalGate, LogSender, NotificationSender, RateGate, RedisWindowGate,
    ResendSender,
};
use airwatch_providers::census::CensusGeocoder;
use airwatch_providers::google::GoogleAirQuality;

const SEND_WINDOW_KEY: &str = "airwatch:send-window";
/// Upper bound on waiting for stale-coordinate refreshes before exit.
const REFRESH_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "airwatch_updater=info,airwatch_engine=info,airwatch_notifier=info".into()
            }),
        )
        .json()
        .init();

    tracing::info!("AirWatch updater starting...");

    let config = AppConfig::from_env()?;

    let pool = db::connect(&config).await?;
    db::migrate(&pool).await?;

    let pipeline = build_pipeline(&config, PgStore::new(pool)).await?;

    tokio::select! {
        result = pipeline.run() => {
            let summary = result.context("Update run failed")?;
            tracing::info!(
                zip_codes = summary.zip_codes,
                processed = summary.processed,
                failed = summary.failed,
                messages_sent = summary.messages_sent,
                "Update run complete"
            );
            pipeline.resolver().drain(REFRESH_DRAIN_TIMEOUT).await;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, abandoning update run");
        }
    }

    tracing::info!("AirWatch updater stopped.");
    Ok(())
}

async fn build_pipeline(config: &AppConfig, store: PgStore) -> anyhow::Result<UpdatePipeline> {
    let store = Arc::new(store);
    let timeout = config.provider_timeout();

    let geocoder = CensusGeocoder::new(&config.geocoder_base_url, timeout)?;
    let resolver = GeoResolver::new(store.clone(), Arc::new(geocoder))
        .with_lookup_timeout(timeout)
        .with_refresh_after(config.coordinate_refresh_after()?);

    let air_quality = GoogleAirQuality::new(
        &config.air_quality_base_url,
        &config.google_air_quality_api_key,
        timeout,
    )?;

    let sender: Arc<dyn NotificationSender> = match &config.resend_api_key {
        Some(api_key) => Arc::new(ResendSender::new(
            &config.resend_base_url,
            api_key,
            &config.email_from,
            timeout,
        )?),
        None => {
            tracing::warn!("RESEND_API_KEY not set, emails will only be logged");
            Arc::new(LogSender)
        }
    };

    let dispatcher = Dispatcher::new(
        sender,
        send_gate(config).await,
        config.send_retry_policy(),
    );

    let tokens = UnsubscribeTokens::new(
        &config.unsubscribe_secret,
        config.unsubscribe_token_ttl()?,
    );

    Ok(UpdatePipeline::new(
        resolver,
        Arc::new(air_quality),
        store.clone(),
        store,
        dispatcher,
        tokens,
        &config.site_url,
    ))
}

/// Redis-backed gate when `REDIS_URL` is set, so concurrent updater runs
/// share one send budget; otherwise an in-process gate.
async fn send_gate(config: &AppConfig) -> Arc<dyn RateGate> {
    let rate = NonZeroU32::new(config.send_rate_per_second).unwrap_or(NonZeroU32::MIN);

    if let Some(url) = &config.redis_url {
        match redis_pool::create_redis_pool(url).await {
            Ok(redis) => return Arc::new(RedisWindowGate::new(redis, SEND_WINDOW_KEY, rate)),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, using in-process send gate");
            }
        }
    }

    Arc::new(IntervalGate::per_second(rate))
}
