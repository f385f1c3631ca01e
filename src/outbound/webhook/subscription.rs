use reqwest::Url;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::events::EventType;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

const TIMEOUT_RANGE: RangeInclusive<u64> = 1..=300;
const MAX_RETRIES_RANGE: RangeInclusive<u64> = 0..=10;
const RETRY_DELAY_RANGE: RangeInclusive<u64> = 1..=3600;

/// Lifecycle state of a subscription.
///
/// `Failed` is set by the delivery pipeline once a delivery exhausts its
/// retries; only an explicit enable brings the subscription back.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Failed,
}

/// Retry configuration carried by each subscription
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,

    pub max_retries: u32,

    /// Base delay, doubled per failed attempt
    pub delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

/// Webhook subscription configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,

    pub name: String,

    pub url: String,

    /// HMAC key for the signature header
    pub secret: String,

    pub events: BTreeSet<EventType>,

    pub status: SubscriptionStatus,

    /// Extra request headers; never override the reserved webhook headers
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
}

impl Subscription {
    /// Build a validated, active subscription from creation parameters.
    pub fn create(params: SubscriptionParams, secret: String) -> Result<Self, ValidationError> {
        let now = OffsetDateTime::now_utc();
        let retry = RetryPolicy {
            enabled: params.retry_enabled.unwrap_or(true),
            max_retries: validate_max_retries(params.max_retries.unwrap_or(DEFAULT_MAX_RETRIES))?,
            delay_secs: validate_retry_delay(
                params.retry_delay_secs.unwrap_or(DEFAULT_RETRY_DELAY_SECS),
            )?,
        };

        Ok(Self {
            id: Uuid::new_v4(),
            name: validate_name(&params.name)?,
            url: validate_url(&params.url)?,
            secret,
            events: validate_events(params.events)?,
            status: SubscriptionStatus::Active,
            headers: parse_custom_headers(params.headers.as_ref())?,
            transform_enabled: params.transform_enabled,
            transform_script: normalize_script(params.transform_script),
            retry,
            timeout_secs: validate_timeout(params.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))?,
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Apply a partial update. Nothing is modified if any field is invalid.
    pub fn apply(&mut self, changes: SubscriptionChanges) -> Result<(), ValidationError> {
        let mut next = self.clone();

        if let Some(name) = changes.name {
            next.name = validate_name(&name)?;
        }
        if let Some(url) = changes.url {
            next.url = validate_url(&url)?;
        }
        if let Some(events) = changes.events {
            next.events = validate_events(events)?;
        }
        if let Some(headers) = changes.headers {
            next.headers = parse_custom_headers(Some(&headers))?;
        }
        if let Some(enabled) = changes.transform_enabled {
            next.transform_enabled = enabled;
        }
        if let Some(script) = changes.transform_script {
            next.transform_script = normalize_script(Some(script));
        }
        if let Some(enabled) = changes.retry_enabled {
            next.retry.enabled = enabled;
        }
        if let Some(max_retries) = changes.max_retries {
            next.retry.max_retries = validate_max_retries(max_retries)?;
        }
        if let Some(delay) = changes.retry_delay_secs {
            next.retry.delay_secs = validate_retry_delay(delay)?;
        }
        if let Some(timeout) = changes.timeout_secs {
            next.timeout_secs = validate_timeout(timeout)?;
        }

        next.updated_at = OffsetDateTime::now_utc();
        *self = next;
        Ok(())
    }

    /// Check if this subscription should receive a given event type
    pub fn matches_event(&self, event_type: EventType) -> bool {
        self.status == SubscriptionStatus::Active && self.events.contains(&event_type)
    }

    /// Transform script to run, if transforms are switched on
    pub fn active_transform(&self) -> Option<&str> {
        if !self.transform_enabled {
            return None;
        }
        self.transform_script.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn enable(&mut self) {
        self.status = SubscriptionStatus::Active;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn disable(&mut self) {
        self.status = SubscriptionStatus::Inactive;
        self.updated_at = OffsetDateTime::now_utc();
    }

    pub fn rotate_secret(&mut self, secret: String) {
        self.secret = secret;
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Parameters for creating a subscription
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionParams {
    pub name: String,

    pub url: String,

    pub events: Vec<EventType>,

    /// JSON object of header name to value, or a string holding one
    #[serde(default)]
    pub headers: Option<Value>,

    #[serde(default)]
    pub transform_enabled: bool,

    #[serde(default)]
    pub transform_script: Option<String>,

    #[serde(default)]
    pub retry_enabled: Option<bool>,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub retry_delay_secs: Option<u64>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SubscriptionParams {
    pub fn new(name: impl Into<String>, url: impl Into<String>, events: Vec<EventType>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            events,
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: Value) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_transform(mut self, script: impl Into<String>) -> Self {
        self.transform_enabled = true;
        self.transform_script = Some(script.into());
        self
    }

    pub fn with_retry(mut self, enabled: bool, max_retries: u32, delay_secs: u64) -> Self {
        self.retry_enabled = Some(enabled);
        self.max_retries = Some(max_retries);
        self.retry_delay_secs = Some(delay_secs);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Partial update. An empty `transform_script` clears the script.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubscriptionChanges {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<EventType>>,
    pub headers: Option<Value>,
    pub transform_enabled: Option<bool>,
    pub transform_script: Option<String>,
    pub retry_enabled: Option<bool>,
    pub max_retries: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// Subscription configuration rejected before anything is stored
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Subscription name must not be empty")]
    EmptyName,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("At least one event type is required")]
    NoEvents,

    #[error("Event type '{0}' is reserved and cannot be subscribed to")]
    ReservedEvent(EventType),

    #[error("Invalid custom headers: {0}")]
    InvalidHeaders(String),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
        value: u64,
    },
}

fn validate_name(name: &str) -> Result<String, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(trimmed.to_string())
}

/// Check that a target URL is an absolute http(s) URL
pub fn validate_url(url: &str) -> Result<String, ValidationError> {
    let parsed = Url::parse(url.trim()).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        other => Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
}

fn validate_events(events: Vec<EventType>) -> Result<BTreeSet<EventType>, ValidationError> {
    if let Some(reserved) = events.iter().find(|e| e.is_reserved()) {
        return Err(ValidationError::ReservedEvent(*reserved));
    }
    let events: BTreeSet<EventType> = events.into_iter().collect();
    if events.is_empty() {
        return Err(ValidationError::NoEvents);
    }
    Ok(events)
}

/// Parse custom headers supplied as a JSON object, or as a string holding
/// JSON object text.
pub fn parse_custom_headers(
    raw: Option<&Value>,
) -> Result<BTreeMap<String, String>, ValidationError> {
    let parsed;
    let object = match raw {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(BTreeMap::new()),
        Some(Value::String(text)) => {
            parsed = serde_json::from_str::<Value>(text)
                .map_err(|e| ValidationError::InvalidHeaders(e.to_string()))?;
            parsed
                .as_object()
                .ok_or_else(|| ValidationError::InvalidHeaders("expected a JSON object".into()))?
        }
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(ValidationError::InvalidHeaders(
                "expected a JSON object".to_string(),
            ));
        }
    };

    let mut headers = BTreeMap::new();
    for (name, value) in object {
        let value = value.as_str().ok_or_else(|| {
            ValidationError::InvalidHeaders(format!("value of '{name}' must be a string"))
        })?;
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ValidationError::InvalidHeaders(format!("invalid header name '{name}'")))?;
        HeaderValue::from_str(value).map_err(|_| {
            ValidationError::InvalidHeaders(format!("invalid value for header '{name}'"))
        })?;
        headers.insert(name.clone(), value.to_string());
    }
    Ok(headers)
}

fn check_range(
    field: &'static str,
    value: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ValidationError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min: *range.start(),
            max: *range.end(),
            value,
        })
    }
}

fn validate_timeout(timeout_secs: u64) -> Result<u64, ValidationError> {
    check_range("timeout_secs", timeout_secs, TIMEOUT_RANGE)
}

fn validate_max_retries(max_retries: u32) -> Result<u32, ValidationError> {
    check_range("max_retries", u64::from(max_retries), MAX_RETRIES_RANGE)?;
    Ok(max_retries)
}

fn validate_retry_delay(delay_secs: u64) -> Result<u64, ValidationError> {
    check_range("retry_delay_secs", delay_secs, RETRY_DELAY_RANGE)
}

fn normalize_script(script: Option<String>) -> Option<String> {
    script.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> SubscriptionParams {
        SubscriptionParams::new(
            "CRM sync",
            "https://api.example.com/webhook",
            vec![EventType::LeadCreated, EventType::LeadUpdated],
        )
    }

    fn create(params: SubscriptionParams) -> Result<Subscription, ValidationError> {
        Subscription::create(params, "whsec_test".to_string())
    }

    #[test]
    fn test_subscription_creation_defaults() -> Result<(), ValidationError> {
        let subscription = create(params())?;

        assert_eq!(subscription.name, "CRM sync");
        assert_eq!(subscription.url, "https://api.example.com/webhook");
        assert_eq!(subscription.status, SubscriptionStatus::Active);
        assert_eq!(subscription.retry, RetryPolicy::default());
        assert_eq!(subscription.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(subscription.headers.is_empty());
        assert!(subscription.last_triggered_at.is_none());
        Ok(())
    }

    #[test]
    fn test_matches_only_subscribed_events_while_active() -> Result<(), ValidationError> {
        let mut subscription = create(params())?;

        assert!(subscription.matches_event(EventType::LeadCreated));
        assert!(!subscription.matches_event(EventType::CampaignCreated));

        subscription.disable();
        assert!(!subscription.matches_event(EventType::LeadCreated));

        subscription.status = SubscriptionStatus::Failed;
        assert!(!subscription.matches_event(EventType::LeadCreated));

        subscription.enable();
        assert!(subscription.matches_event(EventType::LeadCreated));
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_url() {
        let result = create(SubscriptionParams {
            url: "not a url".to_string(),
            ..params()
        });
        assert!(matches!(result, Err(ValidationError::InvalidUrl(_))));

        let result = create(SubscriptionParams {
            url: "ftp://files.example.com".to_string(),
            ..params()
        });
        assert_eq!(
            result,
            Err(ValidationError::UnsupportedScheme("ftp".to_string()))
        );
    }

    #[test]
    fn test_rejects_empty_or_reserved_events() {
        let result = create(SubscriptionParams {
            events: vec![],
            ..params()
        });
        assert_eq!(result, Err(ValidationError::NoEvents));

        let result = create(SubscriptionParams {
            events: vec![EventType::LeadCreated, EventType::WebhookTest],
            ..params()
        });
        assert_eq!(
            result,
            Err(ValidationError::ReservedEvent(EventType::WebhookTest))
        );
    }

    #[test]
    fn test_headers_from_object_and_string() -> Result<(), ValidationError> {
        let from_object = parse_custom_headers(Some(&json!({"X-Tenant": "acme"})))?;
        let from_text = parse_custom_headers(Some(&json!(r#"{"X-Tenant": "acme"}"#)))?;

        assert_eq!(from_object.get("X-Tenant"), Some(&"acme".to_string()));
        assert_eq!(from_object, from_text);
        assert!(parse_custom_headers(None)?.is_empty());
        assert!(parse_custom_headers(Some(&json!("")))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_malformed_headers_rejected() {
        let cases = [
            json!("{not json"),
            json!(["X-Tenant", "acme"]),
            json!({"X-Tenant": 42}),
            json!({"bad header": "x"}),
            json!({"X-Tenant": "line\nbreak"}),
        ];

        for case in cases {
            let result = parse_custom_headers(Some(&case));
            assert!(
                matches!(result, Err(ValidationError::InvalidHeaders(_))),
                "expected {case} to be rejected"
            );
        }
    }

    #[test]
    fn test_out_of_range_settings_rejected() {
        let result = create(params().with_timeout(0));
        assert!(matches!(
            result,
            Err(ValidationError::OutOfRange {
                field: "timeout_secs",
                ..
            })
        ));

        let result = create(params().with_retry(true, 11, 5));
        assert!(matches!(
            result,
            Err(ValidationError::OutOfRange {
                field: "max_retries",
                ..
            })
        ));
    }

    #[test]
    fn test_apply_is_all_or_nothing() -> Result<(), ValidationError> {
        let mut subscription = create(params())?;
        let before = subscription.clone();

        let result = subscription.apply(SubscriptionChanges {
            name: Some("Renamed".to_string()),
            url: Some("mailto:nobody@example.com".to_string()),
            ..Default::default()
        });

        assert!(result.is_err());
        assert_eq!(subscription, before);

        subscription.apply(SubscriptionChanges {
            name: Some("Renamed".to_string()),
            max_retries: Some(5),
            transform_enabled: Some(true),
            transform_script: Some(r#"{"lead": "$.data"}"#.to_string()),
            ..Default::default()
        })?;

        assert_eq!(subscription.name, "Renamed");
        assert_eq!(subscription.retry.max_retries, 5);
        assert_eq!(subscription.active_transform(), Some(r#"{"lead": "$.data"}"#));
        Ok(())
    }

    #[test]
    fn test_empty_script_clears_transform() -> Result<(), ValidationError> {
        let mut subscription = create(params().with_transform(r#"{"a": "$"}"#))?;
        assert!(subscription.active_transform().is_some());

        subscription.apply(SubscriptionChanges {
            transform_script: Some("  ".to_string()),
            ..Default::default()
        })?;
        assert_eq!(subscription.active_transform(), None);
        Ok(())
    }

    #[test]
    fn test_transform_ignored_when_disabled() -> Result<(), ValidationError> {
        let mut subscription = create(params().with_transform(r#"{"a": "$"}"#))?;
        subscription.transform_enabled = false;
        assert_eq!(subscription.active_transform(), None);
        Ok(())
    }

    #[test]
    fn test_serialization() -> Result<(), serde_json::Error> {
        let subscription = create(params()).expect("valid params");

        let json = serde_json::to_string(&subscription)?;
        let deserialized: Subscription = serde_json::from_str(&json)?;

        assert_eq!(subscription.id, deserialized.id);
        assert_eq!(subscription.events, deserialized.events);
        assert_eq!(subscription.retry, deserialized.retry);
        Ok(())
    }
}
