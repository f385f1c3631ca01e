use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::events::{Event, EventType};
use crate::domain::ports::{StoreError, WebhookStore};
use crate::outbound::webhook::executor::DeliveryExecutor;
use crate::outbound::webhook::schemas::{DeliveryAttempt, DeliveryStatus};
use crate::outbound::webhook::subscription::{Subscription, ValidationError};
use crate::outbound::webhook::transform::{PayloadTransformer, transform_or_original};

/// Default budget for one payload transform
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors surfaced by dispatcher and registry operations
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    #[error("Event type '{0}' is reserved")]
    ReservedEvent(EventType),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Conflict(String),

    #[error("Failed to build webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SubscriptionNotFound(id) => DispatchError::SubscriptionNotFound(id),
            StoreError::DeliveryNotFound(id) => DispatchError::DeliveryNotFound(id),
            other => DispatchError::Store(other),
        }
    }
}

/// Entry point of the delivery pipeline.
///
/// Fans an event out to every matching subscription, each on its own task,
/// and exposes the test trigger and manual retry on top of the same
/// executor. Cheap to clone.
#[derive(Clone)]
pub struct EventDispatcher {
    store: Arc<dyn WebhookStore>,
    executor: Arc<DeliveryExecutor>,
    transformer: Arc<dyn PayloadTransformer>,
    transform_timeout: Duration,
}

impl EventDispatcher {
    pub fn new(
        store: Arc<dyn WebhookStore>,
        executor: Arc<DeliveryExecutor>,
        transformer: Arc<dyn PayloadTransformer>,
    ) -> Self {
        Self {
            store,
            executor,
            transformer,
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
        }
    }

    pub fn with_transform_timeout(mut self, timeout: Duration) -> Self {
        self.transform_timeout = timeout;
        self
    }

    /// Deliver `event` to every active subscription listening for its type.
    ///
    /// Returns the deliveries in the state their first attempt left them.
    /// Every matching subscription gets its attempt even when another one
    /// fails. A subscription deleted mid-dispatch is skipped. A storage
    /// outage is returned once all tasks have finished.
    pub async fn dispatch(&self, event: Event) -> Result<Vec<DeliveryAttempt>, DispatchError> {
        if event.event_type.is_reserved() {
            return Err(DispatchError::ReservedEvent(event.event_type));
        }

        let subscriptions = self
            .store
            .active_subscriptions_for(event.event_type)
            .await?;

        if subscriptions.is_empty() {
            debug!(
                event_type = %event.event_type,
                event_id = %event.id,
                "No subscriptions matched – event dropped"
            );
            return Ok(Vec::new());
        }

        let envelope = event.envelope().to_value()?;
        info!(
            event_type = %event.event_type,
            event_id = %event.id,
            subscriptions = subscriptions.len(),
            "Dispatching event"
        );

        let mut tasks = JoinSet::new();
        for subscription in subscriptions {
            let this = self.clone();
            let envelope = envelope.clone();
            let event_type = event.event_type;
            tasks.spawn(async move {
                let subscription_id = subscription.id;
                let result = this.deliver_to(subscription, event_type, envelope).await;
                (subscription_id, result)
            });
        }

        let mut deliveries = Vec::new();
        let mut store_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(delivery))) => deliveries.push(delivery),
                Ok((subscription_id, Err(e))) if e.is_systemic() => {
                    error!(
                        subscription_id = %subscription_id,
                        event_id = %event.id,
                        error = %e,
                        "Failed to deliver event to subscription"
                    );
                    store_error.get_or_insert(e);
                }
                Ok((subscription_id, Err(e))) => {
                    warn!(
                        subscription_id = %subscription_id,
                        event_id = %event.id,
                        error = %e,
                        "Subscription changed during dispatch – delivery skipped"
                    );
                }
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "Delivery task panicked");
                }
            }
        }

        match store_error {
            Some(e) => Err(DispatchError::Store(e)),
            None => Ok(deliveries),
        }
    }

    /// Send a synthetic `webhook.test` event to one subscription, whatever
    /// its status, through the production delivery path.
    pub async fn test_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<DeliveryAttempt, DispatchError> {
        let subscription = self
            .store
            .get_subscription(subscription_id)
            .await?
            .ok_or(DispatchError::SubscriptionNotFound(subscription_id))?;

        let event = Event::new(EventType::WebhookTest, test_payload(&subscription));
        let envelope = event.envelope().to_value()?;

        info!(subscription_id = %subscription_id, "Sending test webhook");
        Ok(self
            .deliver_to(subscription, EventType::WebhookTest, envelope)
            .await?)
    }

    /// Re-run a delivery now, bypassing its schedule.
    ///
    /// A `pending` delivery is executed in place. A `failed` one is left as
    /// history and a fresh copy is created and executed. Deliveries that are
    /// in flight or already succeeded are rejected.
    pub async fn retry_delivery(&self, delivery_id: Uuid) -> Result<DeliveryAttempt, DispatchError> {
        let delivery = self
            .store
            .get_delivery(delivery_id)
            .await?
            .ok_or(DispatchError::DeliveryNotFound(delivery_id))?;

        let subscription = self
            .store
            .get_subscription(delivery.subscription_id)
            .await?
            .ok_or(DispatchError::SubscriptionNotFound(delivery.subscription_id))?;

        match delivery.status {
            DeliveryStatus::Pending => {
                info!(delivery_id = %delivery_id, "Manual retry of pending delivery");
                self.executor
                    .execute(&subscription, delivery_id)
                    .await?
                    .ok_or_else(|| {
                        DispatchError::Conflict(format!(
                            "Delivery {delivery_id} was picked up by another attempt"
                        ))
                    })
            }
            DeliveryStatus::Failed => {
                let redelivery = delivery.redelivery();
                info!(
                    delivery_id = %delivery_id,
                    redelivery_id = %redelivery.id,
                    "Manual retry of failed delivery"
                );
                Ok(self.insert_and_execute(&subscription, redelivery).await?)
            }
            DeliveryStatus::Retrying => Err(DispatchError::Conflict(format!(
                "Delivery {delivery_id} is in flight"
            ))),
            DeliveryStatus::Success => Err(DispatchError::Conflict(format!(
                "Delivery {delivery_id} already succeeded"
            ))),
        }
    }

    /// Prepare, persist and attempt one delivery
    async fn deliver_to(
        &self,
        subscription: Subscription,
        event_type: EventType,
        envelope: Value,
    ) -> Result<DeliveryAttempt, StoreError> {
        let body = match subscription.active_transform() {
            Some(script) => {
                transform_or_original(
                    self.transformer.clone(),
                    &envelope,
                    script,
                    self.transform_timeout,
                )
                .await
            }
            None => envelope.clone(),
        };

        let delivery = DeliveryAttempt::pending(subscription.id, event_type, envelope, body);
        self.insert_and_execute(&subscription, delivery).await
    }

    async fn insert_and_execute(
        &self,
        subscription: &Subscription,
        delivery: DeliveryAttempt,
    ) -> Result<DeliveryAttempt, StoreError> {
        let delivery_id = delivery.id;
        self.store.insert_delivery(delivery).await?;
        debug!(
            subscription_id = %subscription.id,
            delivery_id = %delivery_id,
            "Delivery created"
        );

        if let Some(finished) = self.executor.execute(subscription, delivery_id).await? {
            return Ok(finished);
        }

        // Claimed elsewhere (e.g. by a sweep) before we got to it
        warn!(delivery_id = %delivery_id, "Delivery claimed by another attempt");
        self.store
            .get_delivery(delivery_id)
            .await?
            .ok_or(StoreError::DeliveryNotFound(delivery_id))
    }
}

fn test_payload(subscription: &Subscription) -> Value {
    json!({
        "test": true,
        "message": "This is a test webhook",
        "subscription_id": subscription.id,
        "subscription_name": subscription.name,
    })
}
