/*
   Storage ports consumed by the delivery pipeline. Any backend that honours
   the conditional-update contracts below can sit behind them.
*/

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::events::EventType;
use crate::outbound::webhook::schemas::{DeliveryAttempt, DeliveryUpdate};
use crate::outbound::webhook::subscription::{Subscription, SubscriptionStatus};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    #[error("Delivery not found: {0}")]
    DeliveryNotFound(Uuid),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// The backend itself failed, as opposed to a row that is missing
    pub fn is_systemic(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert_subscription(&self, subscription: Subscription) -> Result<(), StoreError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, StoreError>;

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Active subscriptions whose event set contains `event_type`
    async fn active_subscriptions_for(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, StoreError>;

    /// Replace a stored subscription
    async fn update_subscription(&self, subscription: Subscription) -> Result<(), StoreError>;

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), StoreError>;

    /// Last-write-wins
    async fn mark_subscription_triggered(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Remove a subscription together with its deliveries
    async fn delete_subscription(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert_delivery(&self, delivery: DeliveryAttempt) -> Result<(), StoreError>;

    async fn get_delivery(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, StoreError>;

    /// Deliveries of one subscription, newest first
    async fn deliveries_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, StoreError>;

    /// Pending deliveries of active subscriptions with `next_retry_at <= now`,
    /// oldest due first
    async fn due_deliveries(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, StoreError>;

    /// Atomically move a delivery from `pending` to `retrying`.
    ///
    /// Returns the claimed row, or `None` when the delivery is in any other
    /// state (already claimed or terminal).
    async fn claim_delivery(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, StoreError>;

    /// Return `retrying` rows claimed at or before `claimed_before` to
    /// `pending`, due at their claim time.
    ///
    /// A claim is only released by `finish_delivery` or by this call, so a
    /// crashed or panicked attempt keeps its row until a sweep recovers it.
    async fn release_stale_claims(
        &self,
        claimed_before: OffsetDateTime,
    ) -> Result<usize, StoreError>;

    /// Record the outcome of a claimed attempt.
    ///
    /// Applies only while the delivery is still `retrying`; returns `None`
    /// otherwise.
    async fn finish_delivery(
        &self,
        id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<Option<DeliveryAttempt>, StoreError>;
}

/// Everything the pipeline needs from storage
pub trait WebhookStore: SubscriptionStore + DeliveryStore {}

impl<T: SubscriptionStore + DeliveryStore> WebhookStore for T {}
