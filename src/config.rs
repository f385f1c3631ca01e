use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLib, ConfigBuilder, ConfigError, Environment, builder::DefaultState};
use serde::{Deserialize, Serialize};

use crate::outbound::webhook::{ExecutorSettings, SweepSettings};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Delivery pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Seconds between two retry sweeps
    pub sweep_interval_secs: u64,
    /// Most due deliveries picked by one sweep
    pub sweep_batch_size: usize,
    /// Concurrent attempts within a sweep
    pub sweep_concurrency: usize,
    /// Seconds before an unfinished claim is released back to `pending`
    pub claim_timeout_secs: u64,
    pub max_response_body_chars: usize,
    pub transform_timeout_ms: u64,
    pub max_retry_delay_secs: u64,
}

impl WebhookConfig {
    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            batch_size: self.sweep_batch_size,
            concurrency: self.sweep_concurrency,
            claim_timeout: Duration::from_secs(self.claim_timeout_secs),
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            max_response_body_chars: self.max_response_body_chars,
            max_retry_delay_secs: self.max_retry_delay_secs,
        }
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    fn load_with_sources(env_vars: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults()?;
        // If env_vars is provided, we use it instead of system environment
        // This is to avoid systems variables pollution across tests
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // Use system environment variables
            // e.g. APP_SERVER__PORT or APP_WEBHOOK__SWEEP_INTERVAL_SECS
            builder = builder.add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        builder.build()?.try_deserialize()
    }

    /// Set default values for the configuration.
    /// This is used when no environment variables or config file are provided
    fn set_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        ConfigLib::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("webhook.sweep_interval_secs", 30)?
            .set_default("webhook.sweep_batch_size", 100)?
            .set_default("webhook.sweep_concurrency", 16)?
            .set_default("webhook.claim_timeout_secs", 600)?
            .set_default("webhook.max_response_body_chars", 10_000)?
            .set_default("webhook.transform_timeout_ms", 1_000)?
            .set_default("webhook.max_retry_delay_secs", 86_400)
    }
}
