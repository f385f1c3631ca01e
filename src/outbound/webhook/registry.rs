use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::ports::WebhookStore;
use crate::outbound::webhook::dispatcher::DispatchError;
use crate::outbound::webhook::hmac_signer::generate_secret;
use crate::outbound::webhook::schemas::DeliveryAttempt;
use crate::outbound::webhook::subscription::{
    Subscription, SubscriptionChanges, SubscriptionParams, ValidationError,
};

/// Subscription lifecycle operations.
///
/// Validation happens before anything is written, so a rejected request
/// leaves the store unchanged.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn WebhookStore>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, params: SubscriptionParams) -> Result<Subscription, DispatchError> {
        let subscription = Subscription::create(params, generate_secret())?;
        self.store.insert_subscription(subscription.clone()).await?;

        info!(
            subscription_id = %subscription.id,
            url = %subscription.url,
            events = subscription.events.len(),
            "Subscription created"
        );
        Ok(subscription)
    }

    pub async fn update(
        &self,
        id: Uuid,
        changes: SubscriptionChanges,
    ) -> Result<Subscription, DispatchError> {
        self.modify(id, |subscription| subscription.apply(changes))
            .await
    }

    /// Return a subscription to `active`, whatever its current state
    pub async fn enable(&self, id: Uuid) -> Result<Subscription, DispatchError> {
        self.modify(id, |subscription| {
            subscription.enable();
            Ok(())
        })
        .await
    }

    pub async fn disable(&self, id: Uuid) -> Result<Subscription, DispatchError> {
        self.modify(id, |subscription| {
            subscription.disable();
            Ok(())
        })
        .await
    }

    pub async fn rotate_secret(&self, id: Uuid) -> Result<Subscription, DispatchError> {
        let subscription = self
            .modify(id, |subscription| {
                subscription.rotate_secret(generate_secret());
                Ok(())
            })
            .await?;

        info!(subscription_id = %id, "Subscription secret rotated");
        Ok(subscription)
    }

    /// Remove a subscription and its delivery history
    pub async fn delete(&self, id: Uuid) -> Result<(), DispatchError> {
        self.store.delete_subscription(id).await?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Subscription, DispatchError> {
        self.store
            .get_subscription(id)
            .await?
            .ok_or(DispatchError::SubscriptionNotFound(id))
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, DispatchError> {
        Ok(self.store.list_subscriptions().await?)
    }

    /// Delivery history of one subscription, newest first
    pub async fn deliveries(&self, id: Uuid) -> Result<Vec<DeliveryAttempt>, DispatchError> {
        self.get(id).await?;
        Ok(self.store.deliveries_for_subscription(id).await?)
    }

    pub async fn delivery(&self, id: Uuid) -> Result<DeliveryAttempt, DispatchError> {
        self.store
            .get_delivery(id)
            .await?
            .ok_or(DispatchError::DeliveryNotFound(id))
    }

    async fn modify<F>(&self, id: Uuid, change: F) -> Result<Subscription, DispatchError>
    where
        F: FnOnce(&mut Subscription) -> Result<(), ValidationError>,
    {
        let mut subscription = self.get(id).await?;
        change(&mut subscription)?;
        self.store.update_subscription(subscription.clone()).await?;
        Ok(subscription)
    }
}
