use std::sync::Arc;

use crm_webhooks::config::Config;
use crm_webhooks::infrastructure::memory_store::InMemoryStore;
use crm_webhooks::server::{AppState, Server};
use crm_webhooks::telemetry;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    telemetry::init_tracing();

    // Load configuration
    let config = Config::load()?;
    tracing::info!("Loaded configuration: {:?}", config);

    // Wire the pipeline and start the retry sweep
    let state = AppState::new(Arc::new(InMemoryStore::new()), &config.webhook)?;
    let sweeper = state.sweeper().start();

    // Create and run server
    let server = Server::with_state(&config, state).await?;
    let result = server.run().await;

    sweeper.abort();
    result
}
