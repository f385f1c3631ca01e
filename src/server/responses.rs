use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::events::EventType;
use crate::outbound::webhook::dispatcher::DispatchError;
use crate::outbound::webhook::subscription::{RetryPolicy, Subscription, SubscriptionStatus};

/// Generic response structure shared by all API responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseBody<T: Serialize> {
    status_code: u16,
    data: T,
}

impl<T: Serialize> ResponseBody<T> {
    pub fn new(status: StatusCode, data: T) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
        }
    }

    pub fn ok(data: T) -> Self {
        Self::new(StatusCode::OK, data)
    }
}

impl<T: Serialize> IntoResponse for ResponseBody<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// Subscription as returned by the API. The secret is only filled in right
/// after it was generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionView {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub events: BTreeSet<EventType>,
    pub status: SubscriptionStatus,
    pub headers: BTreeMap<String, String>,
    pub transform_enabled: bool,
    pub transform_script: Option<String>,
    pub retry: RetryPolicy,
    pub timeout_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_triggered_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl SubscriptionView {
    pub fn with_secret(subscription: Subscription) -> Self {
        let secret = subscription.secret.clone();
        Self {
            secret: Some(secret),
            ..Self::from(subscription)
        }
    }
}

impl From<Subscription> for SubscriptionView {
    fn from(s: Subscription) -> Self {
        Self {
            id: s.id,
            name: s.name,
            url: s.url,
            events: s.events,
            status: s.status,
            headers: s.headers,
            transform_enabled: s.transform_enabled,
            transform_script: s.transform_script,
            retry: s.retry,
            timeout_secs: s.timeout_secs,
            last_triggered_at: s.last_triggered_at,
            created_at: s.created_at,
            updated_at: s.updated_at,
            secret: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status_code: u16,
    error: String,
}

/// Maps pipeline errors onto HTTP responses
#[derive(Debug)]
pub struct ApiError(pub DispatchError);

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DispatchError::SubscriptionNotFound(_) | DispatchError::DeliveryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DispatchError::Validation(_) | DispatchError::ReservedEvent(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DispatchError::Conflict(_) => StatusCode::CONFLICT,
            DispatchError::Payload(_) | DispatchError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            status_code: status.as_u16(),
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
