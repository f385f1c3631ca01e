use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::events::EventType;

/// Default cap on stored response bodies, in characters
pub const MAX_RESPONSE_BODY_CHARS: usize = 10_000;

/// State of a webhook delivery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Queued; `next_retry_at` says when it is due
    Pending,

    /// Claimed by an executor, HTTP attempt in flight
    Retrying,

    Success,

    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

/// One event's delivery lifecycle to one subscription.
///
/// The row is mutated in place across retries; `event_type` and the
/// payloads never change after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryAttempt {
    pub id: Uuid,

    pub subscription_id: Uuid,

    pub event_type: EventType,

    pub payload: Value,

    /// Body actually sent; equal to `payload` when no transform applied
    pub transformed_payload: Option<Value>,

    pub status: DeliveryStatus,

    pub response_status: Option<u16>,

    pub response_body: Option<String>,

    pub error_message: Option<String>,

    /// Attempts made so far, the first one included
    pub retry_count: u32,

    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,

    /// Set while `retrying`
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub claimed_at: Option<OffsetDateTime>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl DeliveryAttempt {
    /// A new pending delivery, due immediately
    pub fn pending(
        subscription_id: Uuid,
        event_type: EventType,
        payload: Value,
        transformed_payload: Value,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_type,
            payload,
            transformed_payload: Some(transformed_payload),
            status: DeliveryStatus::Pending,
            response_status: None,
            response_body: None,
            error_message: None,
            retry_count: 0,
            next_retry_at: Some(now),
            delivered_at: None,
            claimed_at: None,
            created_at: now,
        }
    }

    /// Fresh pending copy of this delivery (same event, same bodies)
    pub fn redelivery(&self) -> Self {
        Self::pending(
            self.subscription_id,
            self.event_type,
            self.payload.clone(),
            self.body().clone(),
        )
    }

    /// The value to serialize as the request body
    pub fn body(&self) -> &Value {
        self.transformed_payload.as_ref().unwrap_or(&self.payload)
    }

    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.status == DeliveryStatus::Pending && self.next_retry_at.is_some_and(|at| at <= now)
    }

    /// Mark as claimed by an executor
    pub fn claimed(mut self) -> Self {
        self.status = DeliveryStatus::Retrying;
        self.next_retry_at = None;
        self.claimed_at = Some(OffsetDateTime::now_utc());
        self
    }

    /// Claimed at or before `claimed_before` and never finished
    pub fn is_stale_claim(&self, claimed_before: OffsetDateTime) -> bool {
        self.status == DeliveryStatus::Retrying
            && self.claimed_at.is_some_and(|at| at <= claimed_before)
    }

    /// Give an abandoned claim back to the scheduler. The attempt it stood
    /// for is not counted.
    pub fn release(&mut self) {
        self.status = DeliveryStatus::Pending;
        self.next_retry_at = self.claimed_at.take();
    }

    /// Apply the outcome of an attempt
    pub fn apply(&mut self, update: DeliveryUpdate) {
        self.status = update.status;
        self.response_status = update.response_status;
        self.response_body = update.response_body;
        self.error_message = update.error_message;
        self.retry_count = update.retry_count;
        self.next_retry_at = update.next_retry_at;
        self.delivered_at = update.delivered_at;
        self.claimed_at = None;
    }
}

/// Status fields written when an attempt completes
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUpdate {
    pub status: DeliveryStatus,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
}

impl DeliveryUpdate {
    pub fn succeeded(
        retry_count: u32,
        status_code: u16,
        body: String,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            status: DeliveryStatus::Success,
            response_status: Some(status_code),
            response_body: Some(body),
            error_message: None,
            retry_count,
            next_retry_at: None,
            delivered_at: Some(at),
        }
    }

    pub fn rescheduled(
        retry_count: u32,
        status_code: Option<u16>,
        body: Option<String>,
        error: String,
        next_retry_at: OffsetDateTime,
    ) -> Self {
        Self {
            status: DeliveryStatus::Pending,
            response_status: status_code,
            response_body: body,
            error_message: Some(error),
            retry_count,
            next_retry_at: Some(next_retry_at),
            delivered_at: None,
        }
    }

    pub fn failed(
        retry_count: u32,
        status_code: Option<u16>,
        body: Option<String>,
        error: String,
        at: OffsetDateTime,
    ) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            response_status: status_code,
            response_body: body,
            error_message: Some(error),
            retry_count,
            next_retry_at: None,
            delivered_at: Some(at),
        }
    }
}

/// Cut `body` down to at most `max_chars` characters
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((byte_index, _)) => body[..byte_index].to_string(),
        None => body.to_string(),
    }
}
