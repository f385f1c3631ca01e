use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::events::EventType;
use crate::domain::ports::{DeliveryStore, StoreError, SubscriptionStore};
use crate::outbound::webhook::schemas::{DeliveryAttempt, DeliveryStatus, DeliveryUpdate};
use crate::outbound::webhook::subscription::{Subscription, SubscriptionStatus};

/// In-process store for subscriptions and deliveries.
///
/// Both tables sit behind one lock, so every conditional update (claim,
/// finish, cascade delete) is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    subscriptions: HashMap<Uuid, Subscription>,
    deliveries: HashMap<Uuid, DeliveryAttempt>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored deliveries
    pub async fn delivery_count(&self) -> usize {
        self.tables.read().await.deliveries.len()
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn insert_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.subscriptions.get(&id).cloned())
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let tables = self.tables.read().await;
        let mut subscriptions: Vec<_> = tables.subscriptions.values().cloned().collect();
        subscriptions.sort_by_key(|s| s.created_at);
        Ok(subscriptions)
    }

    async fn active_subscriptions_for(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .subscriptions
            .values()
            .filter(|s| s.matches_event(event_type))
            .cloned()
            .collect())
    }

    async fn update_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        match tables.subscriptions.get_mut(&subscription.id) {
            Some(existing) => {
                *existing = subscription;
                Ok(())
            }
            None => Err(StoreError::SubscriptionNotFound(subscription.id)),
        }
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let subscription = tables
            .subscriptions
            .get_mut(&id)
            .ok_or(StoreError::SubscriptionNotFound(id))?;
        subscription.status = status;
        subscription.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn mark_subscription_triggered(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let subscription = tables
            .subscriptions
            .get_mut(&id)
            .ok_or(StoreError::SubscriptionNotFound(id))?;
        subscription.last_triggered_at = Some(at);
        Ok(())
    }

    async fn delete_subscription(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.subscriptions.remove(&id).is_none() {
            return Err(StoreError::SubscriptionNotFound(id));
        }

        let before = tables.deliveries.len();
        tables.deliveries.retain(|_, d| d.subscription_id != id);
        let removed = before - tables.deliveries.len();

        info!(
            subscription_id = %id,
            removed_deliveries = removed,
            "Deleted subscription"
        );
        Ok(())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn insert_delivery(&self, delivery: DeliveryAttempt) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.subscriptions.contains_key(&delivery.subscription_id) {
            return Err(StoreError::SubscriptionNotFound(delivery.subscription_id));
        }
        debug!(
            delivery_id = %delivery.id,
            subscription_id = %delivery.subscription_id,
            "Inserting delivery"
        );
        tables.deliveries.insert(delivery.id, delivery);
        Ok(())
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.deliveries.get(&id).cloned())
    }

    async fn deliveries_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let tables = self.tables.read().await;
        let mut deliveries: Vec<_> = tables
            .deliveries
            .values()
            .filter(|d| d.subscription_id == subscription_id)
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deliveries)
    }

    async fn due_deliveries(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .deliveries
            .values()
            .filter(|d| d.is_due(now))
            .filter(|d| {
                tables
                    .subscriptions
                    .get(&d.subscription_id)
                    .is_some_and(|s| s.status == SubscriptionStatus::Active)
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_delivery(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, StoreError> {
        let mut tables = self.tables.write().await;
        let delivery = tables
            .deliveries
            .get_mut(&id)
            .ok_or(StoreError::DeliveryNotFound(id))?;

        if delivery.status != DeliveryStatus::Pending {
            return Ok(None);
        }

        let claimed = delivery.clone().claimed();
        *delivery = claimed.clone();
        Ok(Some(claimed))
    }

    async fn release_stale_claims(
        &self,
        claimed_before: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let mut released = 0;
        for delivery in tables.deliveries.values_mut() {
            if delivery.is_stale_claim(claimed_before) {
                delivery.release();
                released += 1;
            }
        }

        if released > 0 {
            info!(released = released, "Released stale delivery claims");
        }
        Ok(released)
    }

    async fn finish_delivery(
        &self,
        id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<Option<DeliveryAttempt>, StoreError> {
        let mut tables = self.tables.write().await;
        let delivery = tables
            .deliveries
            .get_mut(&id)
            .ok_or(StoreError::DeliveryNotFound(id))?;

        if delivery.status != DeliveryStatus::Retrying {
            return Ok(None);
        }

        delivery.apply(update);
        Ok(Some(delivery.clone()))
    }
}
