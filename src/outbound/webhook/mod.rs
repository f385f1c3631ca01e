// Webhook delivery pipeline
//
// Building blocks:
//   hmac_signer, transform, subscription, schemas, http_client, retry_strategy
//
// Pipeline:
//   dispatcher – fans events out and creates deliveries
//   executor   – performs one guarded attempt per invocation
//   sweeper    – re-invokes the executor for due retries
//   registry   – subscription lifecycle

pub mod dispatcher;
pub mod executor;
pub mod hmac_signer;
pub mod http_client;
pub mod registry;
pub mod retry_strategy;
pub mod schemas;
pub mod subscription;
pub mod sweeper;
pub mod transform;

// Re-export commonly used types
pub use dispatcher::{DispatchError, EventDispatcher};
pub use executor::{DeliveryExecutor, ExecutorSettings};
pub use hmac_signer::{HmacSigner, format_signature_header, parse_signature_header};
pub use http_client::{HttpClientError, WebhookHttpClient};
pub use registry::SubscriptionRegistry;
pub use retry_strategy::RetryStrategy;
pub use schemas::{DeliveryAttempt, DeliveryStatus, DeliveryUpdate};
pub use subscription::{
    Subscription, SubscriptionChanges, SubscriptionParams, SubscriptionStatus, ValidationError,
};
pub use sweeper::{RetrySweeper, SweepReport, SweepSettings};
pub use transform::{MappingTransformer, PayloadTransformer, TransformError};
