//! Subscription service: unsubscribe through a signed token.
//!
//! Subscriptions are soft-deactivated, never deleted, so the history of who
//! was notified for a ZIP code stays intact.

use uuid::Uuid;

use airwatch_common::error::AppError;

use crate::store::SubscriptionStore;
use crate::unsubscribe::UnsubscribeTokens;

pub struct SubscriptionService;

impl SubscriptionService {
    /// Verify `token` and deactivate the subscription it names.
    ///
    /// Idempotent: unsubscribing an already inactive subscription succeeds.
    pub async fn unsubscribe(
        store: &dyn SubscriptionStore,
        tokens: &UnsubscribeTokens,
        token: &str,
    ) -> Result<Uuid, AppError> {
        let subscription_id = tokens
            .verify(token)
            .map_err(|e| AppError::Validation(e.to_string()))?;

        let subscription = store
            .find_subscription(subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Subscription {} not found", subscription_id)))?;

        if !subscription.active {
            tracing::debug!(%subscription_id, "Subscription already inactive");
            return Ok(subscription_id);
        }

        store.deactivate(subscription_id).await?;
        tracing::info!(
            %subscription_id,
            zip_code = %subscription.zip_code,
            "Subscription deactivated"
        );
        Ok(subscription_id)
    }
}
