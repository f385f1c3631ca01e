#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use crm_webhooks::config::Config;
use crm_webhooks::domain::events::EventType;
use crm_webhooks::domain::ports::{DeliveryStore, StoreError, SubscriptionStore, WebhookStore};
use crm_webhooks::infrastructure::memory_store::InMemoryStore;
use crm_webhooks::outbound::webhook::{
    DeliveryAttempt, DeliveryExecutor, DeliveryUpdate, EventDispatcher, MappingTransformer,
    RetrySweeper, Subscription, SubscriptionRegistry, SubscriptionStatus, SweepSettings,
    WebhookHttpClient,
};
use crm_webhooks::server::{AppState, Server};
use time::OffsetDateTime;
use uuid::Uuid;

fn test_config() -> Config {
    let mut config = Config::load().unwrap();
    config.server.host = "localhost".to_string();
    config.server.port = 0;
    config
}

pub async fn spawn_server() -> String {
    spawn_server_with_store(Arc::new(InMemoryStore::new())).await
}

/// Spawn the API over a store the test keeps a handle to
pub async fn spawn_server_with_store(store: Arc<dyn WebhookStore>) -> String {
    let config = test_config();
    let state = AppState::new(store, &config.webhook).unwrap();
    let server = Server::with_state(&config, state).await.unwrap();

    let port = server.port().unwrap();
    tokio::spawn(server.run());

    format!("http://{}:{}", config.server.host, port)
}

/// The delivery pipeline wired directly, without the HTTP API
pub struct Pipeline {
    pub store: Arc<InMemoryStore>,
    pub executor: Arc<DeliveryExecutor>,
    pub dispatcher: EventDispatcher,
    pub registry: SubscriptionRegistry,
    pub sweeper: RetrySweeper,
}

impl Pipeline {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let executor = Arc::new(DeliveryExecutor::new(
            store.clone(),
            WebhookHttpClient::new().unwrap(),
        ));
        let dispatcher =
            EventDispatcher::new(store.clone(), executor.clone(), Arc::new(MappingTransformer));
        let registry = SubscriptionRegistry::new(store.clone());
        let sweeper = RetrySweeper::new(store.clone(), executor.clone(), SweepSettings::default());

        Self {
            store,
            executor,
            dispatcher,
            registry,
            sweeper,
        }
    }
}

/// In-memory store whose delivery writes can be switched to fail as if the
/// backend were down
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    fail_inserts: AtomicBool,
    fail_finishes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn fail_finishes(&self) {
        self.fail_finishes.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.fail_inserts.store(false, Ordering::SeqCst);
        self.fail_finishes.store(false, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("db down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for FlakyStore {
    async fn insert_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.inner.insert_subscription(subscription).await
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        self.inner.get_subscription(id).await
    }

    async fn list_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        self.inner.list_subscriptions().await
    }

    async fn active_subscriptions_for(
        &self,
        event_type: EventType,
    ) -> Result<Vec<Subscription>, StoreError> {
        self.inner.active_subscriptions_for(event_type).await
    }

    async fn update_subscription(&self, subscription: Subscription) -> Result<(), StoreError> {
        self.inner.update_subscription(subscription).await
    }

    async fn set_subscription_status(
        &self,
        id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<(), StoreError> {
        self.inner.set_subscription_status(id, status).await
    }

    async fn mark_subscription_triggered(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        self.inner.mark_subscription_triggered(id, at).await
    }

    async fn delete_subscription(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_subscription(id).await
    }
}

#[async_trait]
impl DeliveryStore for FlakyStore {
    async fn insert_delivery(&self, delivery: DeliveryAttempt) -> Result<(), StoreError> {
        Self::check(&self.fail_inserts)?;
        self.inner.insert_delivery(delivery).await
    }

    async fn get_delivery(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, StoreError> {
        self.inner.get_delivery(id).await
    }

    async fn deliveries_for_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        self.inner.deliveries_for_subscription(subscription_id).await
    }

    async fn due_deliveries(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<DeliveryAttempt>, StoreError> {
        self.inner.due_deliveries(now, limit).await
    }

    async fn claim_delivery(&self, id: Uuid) -> Result<Option<DeliveryAttempt>, StoreError> {
        self.inner.claim_delivery(id).await
    }

    async fn release_stale_claims(
        &self,
        claimed_before: OffsetDateTime,
    ) -> Result<usize, StoreError> {
        self.inner.release_stale_claims(claimed_before).await
    }

    async fn finish_delivery(
        &self,
        id: Uuid,
        update: DeliveryUpdate,
    ) -> Result<Option<DeliveryAttempt>, StoreError> {
        Self::check(&self.fail_finishes)?;
        self.inner.finish_delivery(id, update).await
    }
}
