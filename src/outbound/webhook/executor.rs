use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::ports::{StoreError, WebhookStore};
use crate::outbound::webhook::hmac_signer;
use crate::outbound::webhook::http_client::{HttpClientError, WebhookHttpClient, WebhookRequest};
use crate::outbound::webhook::retry_strategy::{DEFAULT_MAX_DELAY_SECS, RetryStrategy};
use crate::outbound::webhook::schemas::{
    DeliveryAttempt, DeliveryStatus, DeliveryUpdate, MAX_RESPONSE_BODY_CHARS, truncate_body,
};
use crate::outbound::webhook::subscription::{Subscription, SubscriptionStatus};

/// Limits applied by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub max_response_body_chars: usize,
    pub max_retry_delay_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_response_body_chars: MAX_RESPONSE_BODY_CHARS,
            max_retry_delay_secs: DEFAULT_MAX_DELAY_SECS,
        }
    }
}

/// Performs exactly one delivery attempt and persists its outcome.
///
/// Every path after the claim ends in a stored state: success, rescheduled
/// pending, or failed. Only storage errors reach the caller.
pub struct DeliveryExecutor {
    store: Arc<dyn WebhookStore>,
    http_client: WebhookHttpClient,
    settings: ExecutorSettings,
}

impl DeliveryExecutor {
    pub fn new(store: Arc<dyn WebhookStore>, http_client: WebhookHttpClient) -> Self {
        Self {
            store,
            http_client,
            settings: ExecutorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ExecutorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Attempt delivery `delivery_id` to `subscription`.
    ///
    /// Returns `Ok(None)` without sending anything when the delivery is not
    /// `pending`: another invocation holds it, or it is already terminal.
    pub async fn execute(
        &self,
        subscription: &Subscription,
        delivery_id: Uuid,
    ) -> Result<Option<DeliveryAttempt>, StoreError> {
        let Some(delivery) = self.store.claim_delivery(delivery_id).await? else {
            debug!(
                delivery_id = %delivery_id,
                "Delivery is not pending – skipping"
            );
            return Ok(None);
        };

        let attempt = delivery.retry_count + 1;
        debug!(
            subscription_id = %subscription.id,
            delivery_id = %delivery.id,
            event_type = %delivery.event_type,
            attempt = attempt,
            "Processing delivery"
        );

        let result = self.send(subscription, &delivery).await;
        let now = OffsetDateTime::now_utc();

        let update = match result {
            Ok((status_code, body)) => {
                info!(
                    subscription_id = %subscription.id,
                    delivery_id = %delivery.id,
                    attempt = attempt,
                    status_code = status_code,
                    "Webhook delivered successfully"
                );
                DeliveryUpdate::succeeded(
                    attempt,
                    status_code,
                    truncate_body(&body, self.settings.max_response_body_chars),
                    now,
                )
            }
            Err(failure) => self.failure_update(subscription, &delivery, attempt, failure, now),
        };

        let delivered = update.status;
        let Some(finished) = self.store.finish_delivery(delivery.id, update).await? else {
            warn!(
                delivery_id = %delivery.id,
                "Delivery left the retrying state during the attempt – outcome dropped"
            );
            return Ok(None);
        };

        // Subscription bookkeeping is last-write-wins, outside the delivery update
        match delivered {
            DeliveryStatus::Success => {
                self.store
                    .mark_subscription_triggered(subscription.id, now)
                    .await?;
            }
            DeliveryStatus::Failed => {
                self.store
                    .set_subscription_status(subscription.id, SubscriptionStatus::Failed)
                    .await?;
            }
            _ => {}
        }

        Ok(Some(finished))
    }

    /// Sign and send; every failure comes back as an [`AttemptFailure`]
    async fn send(
        &self,
        subscription: &Subscription,
        delivery: &DeliveryAttempt,
    ) -> Result<(u16, String), AttemptFailure> {
        let body = serde_json::to_vec(delivery.body())
            .map_err(|e| AttemptFailure::Serialization(e.to_string()))?;
        let signature = hmac_signer::sign(&body, &subscription.secret);

        let response = self
            .http_client
            .send(WebhookRequest {
                url: &subscription.url,
                body,
                signature,
                event_type: delivery.event_type,
                delivery_id: delivery.id,
                custom_headers: &subscription.headers,
                timeout: subscription.timeout(),
            })
            .await
            .map_err(AttemptFailure::Http)?;

        Ok((response.status, response.body))
    }

    fn failure_update(
        &self,
        subscription: &Subscription,
        delivery: &DeliveryAttempt,
        retry_count: u32,
        failure: AttemptFailure,
        now: OffsetDateTime,
    ) -> DeliveryUpdate {
        let status_code = failure.status_code();
        let body = failure
            .response_body()
            .map(|b| truncate_body(b, self.settings.max_response_body_chars));
        let message = failure.to_string();

        let strategy = RetryStrategy::from_policy(&subscription.retry)
            .with_max_delay(self.settings.max_retry_delay_secs);

        match strategy.next_retry_at(retry_count, now) {
            Some(next_retry_at) => {
                warn!(
                    subscription_id = %subscription.id,
                    delivery_id = %delivery.id,
                    attempt = retry_count,
                    max_retries = strategy.max_retries(),
                    next_retry_at = %next_retry_at,
                    error = %message,
                    "Webhook delivery failed – will retry"
                );
                DeliveryUpdate::rescheduled(retry_count, status_code, body, message, next_retry_at)
            }
            None => {
                error!(
                    subscription_id = %subscription.id,
                    delivery_id = %delivery.id,
                    attempt = retry_count,
                    error = %message,
                    "Webhook delivery permanently failed"
                );
                DeliveryUpdate::failed(retry_count, status_code, body, message, now)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum AttemptFailure {
    #[error("Failed to serialize payload: {0}")]
    Serialization(String),

    #[error(transparent)]
    Http(HttpClientError),
}

impl AttemptFailure {
    fn status_code(&self) -> Option<u16> {
        match self {
            AttemptFailure::Http(e) => e.status_code(),
            AttemptFailure::Serialization(_) => None,
        }
    }

    fn response_body(&self) -> Option<&str> {
        match self {
            AttemptFailure::Http(e) => e.response_body(),
            AttemptFailure::Serialization(_) => None,
        }
    }
}
