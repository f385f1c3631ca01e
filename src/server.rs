mod handlers;
pub mod responses;

use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{Config, WebhookConfig};
use crate::domain::ports::WebhookStore;
use crate::infrastructure::memory_store::InMemoryStore;
use crate::outbound::webhook::{
    DeliveryExecutor, EventDispatcher, MappingTransformer, RetrySweeper, SubscriptionRegistry,
    WebhookHttpClient,
};
use crate::server::handlers::{deliveries, events, health::health_check, webhooks};
use axum::http::Method;
use axum::{
    Router,
    routing::{get, post},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// The global application state shared between all request handlers.
#[derive(Clone)]
pub struct AppState {
    registry: SubscriptionRegistry,
    dispatcher: EventDispatcher,
    sweeper: Arc<RetrySweeper>,
}

impl AppState {
    /// Wire the delivery pipeline on top of `store`.
    pub fn new(store: Arc<dyn WebhookStore>, config: &WebhookConfig) -> Result<Self> {
        let http_client =
            WebhookHttpClient::new().wrap_err("Failed to build the webhook HTTP client")?;

        let executor = Arc::new(
            DeliveryExecutor::new(store.clone(), http_client)
                .with_settings(config.executor_settings()),
        );
        let dispatcher = EventDispatcher::new(
            store.clone(),
            executor.clone(),
            Arc::new(MappingTransformer),
        )
        .with_transform_timeout(config.transform_timeout());
        let sweeper = Arc::new(RetrySweeper::new(
            store.clone(),
            executor,
            config.sweep_settings(),
        ));

        Ok(Self {
            registry: SubscriptionRegistry::new(store),
            dispatcher,
            sweeper,
        })
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn sweeper(&self) -> Arc<RetrySweeper> {
        self.sweeper.clone()
    }
}

pub struct Server {
    router: Router,
    listener: TcpListener,
}

impl Server {
    /// Creates a server backed by a fresh in-memory store.
    pub async fn new(config: &Config) -> Result<Self> {
        let state = AppState::new(Arc::new(InMemoryStore::new()), &config.webhook)?;
        Self::with_state(config, state).await
    }

    /// Creates a server around an already wired pipeline.
    pub async fn with_state(config: &Config, state: AppState) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ]);

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/events", post(events::publish_event))
            .route(
                "/webhooks",
                get(webhooks::list_webhooks).post(webhooks::create_webhook),
            )
            .route(
                "/webhooks/{id}",
                get(webhooks::get_webhook)
                    .patch(webhooks::update_webhook)
                    .delete(webhooks::delete_webhook),
            )
            .route("/webhooks/{id}/enable", post(webhooks::enable_webhook))
            .route("/webhooks/{id}/disable", post(webhooks::disable_webhook))
            .route("/webhooks/{id}/rotate-secret", post(webhooks::rotate_secret))
            .route("/webhooks/{id}/test", post(webhooks::test_webhook))
            .route("/webhooks/{id}/deliveries", get(webhooks::list_deliveries))
            .route("/deliveries/{id}", get(deliveries::get_delivery))
            .route("/deliveries/{id}/retry", post(deliveries::retry_delivery))
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;

        Ok(Self { router, listener })
    }

    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Runs the HTTP server.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Server listening on {}", self.listener.local_addr()?);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
