use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::events::EventType;

pub const HEADER_SIGNATURE: &str = "x-webhook-signature";
pub const HEADER_EVENT: &str = "x-webhook-event";
pub const HEADER_DELIVERY_ID: &str = "x-webhook-delivery-id";

/// Upper bound on how much of a response body is read
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Error type for HTTP client operations
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Response error: status={status}, body={body}")]
    ResponseError { status: u16, body: String },
}

impl HttpClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_connect() {
            HttpClientError::NetworkError(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }

    /// HTTP status of a non-2xx response, if one was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            HttpClientError::ResponseError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Body of a non-2xx response, if one was received
    pub fn response_body(&self) -> Option<&str> {
        match self {
            HttpClientError::ResponseError { body, .. } => Some(body),
            _ => None,
        }
    }
}

/// One outbound webhook POST
#[derive(Debug, Clone)]
pub struct WebhookRequest<'a> {
    pub url: &'a str,
    pub body: Vec<u8>,
    /// Full header value, e.g. `sha256=<hex>`
    pub signature: String,
    pub event_type: EventType,
    pub delivery_id: Uuid,
    pub custom_headers: &'a BTreeMap<String, String>,
    pub timeout: Duration,
}

/// A 2xx response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
    pub response_time_ms: u64,
}

/// HTTP client wrapper for webhook delivery.
///
/// Wraps one shared `reqwest::Client`; every request carries its own
/// timeout.
#[derive(Debug, Clone)]
pub struct WebhookHttpClient {
    client: Client,
}

impl WebhookHttpClient {
    pub fn new() -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .user_agent(format!("CrmWebhooks/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;

        Ok(Self { client })
    }

    /// Use an existing client (shared connection pool)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Send a webhook POST.
    ///
    /// The whole exchange, body read included, is bounded by
    /// `request.timeout`; the in-flight request is dropped when it expires.
    pub async fn send(&self, request: WebhookRequest<'_>) -> Result<WebhookResponse, HttpClientError> {
        let timeout = request.timeout;
        let url = request.url;
        debug!(url = %url, delivery_id = %request.delivery_id, "Sending webhook");

        match tokio::time::timeout(timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url = %url, timeout = ?timeout, "Webhook request timed out");
                Err(HttpClientError::Timeout(timeout))
            }
        }
    }

    async fn exchange(&self, request: WebhookRequest<'_>) -> Result<WebhookResponse, HttpClientError> {
        let start = Instant::now();
        let headers = build_headers(
            request.custom_headers,
            &request.signature,
            request.event_type,
            request.delivery_id,
        );

        let response = self
            .client
            .post(request.url)
            .timeout(request.timeout)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %request.url, error = %e, "Webhook request failed");
                HttpClientError::from_reqwest(e, request.timeout)
            })?;

        let status = response.status();
        let response_time_ms = start.elapsed().as_millis() as u64;

        debug!(
            url = %request.url,
            status = %status.as_u16(),
            response_time_ms = %response_time_ms,
            "Webhook response received"
        );

        let body = read_response_body(response, request.timeout).await?;

        if !status.is_success() {
            return Err(HttpClientError::ResponseError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(WebhookResponse {
            status: status.as_u16(),
            body,
            response_time_ms,
        })
    }
}

/// Headers for a webhook request.
///
/// Custom headers go in first; the content type and the three webhook
/// headers are inserted afterwards and replace any custom header with the
/// same (case-insensitive) name.
pub fn build_headers(
    custom: &BTreeMap<String, String>,
    signature: &str,
    event_type: EventType,
    delivery_id: Uuid,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in custom {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid custom header"),
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    insert_reserved(&mut headers, HEADER_SIGNATURE, signature);
    insert_reserved(&mut headers, HEADER_EVENT, event_type.as_str());
    insert_reserved(&mut headers, HEADER_DELIVERY_ID, &delivery_id.to_string());

    headers
}

fn insert_reserved(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => {
            // Values are hex, uuids and event names; unreachable in practice
            headers.remove(name);
            warn!(header = name, "Reserved header value is not a valid header");
        }
    }
}

/// Read response body with size limit
async fn read_response_body(
    mut response: Response,
    timeout: Duration,
) -> Result<String, HttpClientError> {
    let mut bytes = Vec::new();

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| HttpClientError::from_reqwest(e, timeout))?
    {
        let remaining = MAX_BODY_BYTES - bytes.len();
        if chunk.len() >= remaining {
            bytes.extend_from_slice(&chunk[..remaining]);
            warn!(max_size = MAX_BODY_BYTES, "Response body too large, truncating");
            break;
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
