use std::time::Duration;

use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

/// Connection manager for the shared send-rate window. Timeouts stay short;
/// callers fall back to an in-process gate when Redis is unavailable.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let config = ConnectionManagerConfig::new()
        .set_connection_timeout(Duration::from_secs(2))
        .set_response_timeout(Duration::from_millis(500))
        .set_number_of_retries(2);
    let manager = ConnectionManager::new_with_config(client, config).await?;

    tracing::info!("Connected to Redis send-window store");
    Ok(manager)
}
