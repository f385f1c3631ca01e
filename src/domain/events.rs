use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Domain events a webhook subscription can listen to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    // Lead events
    #[serde(rename = "lead.created")]
    LeadCreated,
    #[serde(rename = "lead.updated")]
    LeadUpdated,
    #[serde(rename = "lead.deleted")]
    LeadDeleted,
    #[serde(rename = "lead.status_changed")]
    LeadStatusChanged,

    // Campaign events
    #[serde(rename = "campaign.created")]
    CampaignCreated,
    #[serde(rename = "campaign.updated")]
    CampaignUpdated,
    #[serde(rename = "campaign.deleted")]
    CampaignDeleted,
    #[serde(rename = "campaign.status_changed")]
    CampaignStatusChanged,

    // Contact events
    #[serde(rename = "contact.created")]
    ContactCreated,
    #[serde(rename = "contact.updated")]
    ContactUpdated,
    #[serde(rename = "contact.deleted")]
    ContactDeleted,

    #[serde(rename = "import.completed")]
    ImportCompleted,

    /// Reserved for the manual test trigger
    #[serde(rename = "webhook.test")]
    WebhookTest,
}

impl EventType {
    /// Every event type, the reserved test type last.
    pub const ALL: [EventType; 13] = [
        EventType::LeadCreated,
        EventType::LeadUpdated,
        EventType::LeadDeleted,
        EventType::LeadStatusChanged,
        EventType::CampaignCreated,
        EventType::CampaignUpdated,
        EventType::CampaignDeleted,
        EventType::CampaignStatusChanged,
        EventType::ContactCreated,
        EventType::ContactUpdated,
        EventType::ContactDeleted,
        EventType::ImportCompleted,
        EventType::WebhookTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::LeadCreated => "lead.created",
            EventType::LeadUpdated => "lead.updated",
            EventType::LeadDeleted => "lead.deleted",
            EventType::LeadStatusChanged => "lead.status_changed",
            EventType::CampaignCreated => "campaign.created",
            EventType::CampaignUpdated => "campaign.updated",
            EventType::CampaignDeleted => "campaign.deleted",
            EventType::CampaignStatusChanged => "campaign.status_changed",
            EventType::ContactCreated => "contact.created",
            EventType::ContactUpdated => "contact.updated",
            EventType::ContactDeleted => "contact.deleted",
            EventType::ImportCompleted => "import.completed",
            EventType::WebhookTest => "webhook.test",
        }
    }

    /// Reserved types are produced internally and cannot be subscribed to.
    pub fn is_reserved(&self) -> bool {
        matches!(self, EventType::WebhookTest)
    }

    /// Entity namespace (e.g. "lead.status_changed" -> "lead")
    pub fn namespace(&self) -> &'static str {
        let name = self.as_str();
        name.split('.').next().unwrap_or(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// A domain event handed to the dispatcher. Never persisted on its own;
/// it lives on as the payload of the deliveries it spawns.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub payload: Value,
    pub timestamp: OffsetDateTime,
}

impl Event {
    pub fn new(event_type: EventType, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            payload,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Wrap the event in the envelope that is stored and sent.
    pub fn envelope(&self) -> WebhookEnvelope {
        WebhookEnvelope {
            id: self.id,
            event: self.event_type,
            timestamp: self.timestamp,
            data: self.payload.clone(),
        }
    }
}

/// JSON body received by subscriber endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEnvelope {
    pub id: Uuid,

    pub event: EventType,

    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    pub data: Value,
}

impl WebhookEnvelope {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trips_through_str() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let err = "lead.exploded".parse::<EventType>().unwrap_err();
        assert_eq!(err.to_string(), "Unknown event type: lead.exploded");
    }

    #[test]
    fn test_serde_uses_dotted_names() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&EventType::LeadStatusChanged)?,
            r#""lead.status_changed""#
        );
        let parsed: EventType = serde_json::from_str(r#""campaign.deleted""#)?;
        assert_eq!(parsed, EventType::CampaignDeleted);
        Ok(())
    }

    #[test]
    fn test_only_test_event_is_reserved() {
        let reserved: Vec<_> = EventType::ALL
            .into_iter()
            .filter(|e| e.is_reserved())
            .collect();
        assert_eq!(reserved, vec![EventType::WebhookTest]);
    }

    #[test]
    fn test_namespace() {
        assert_eq!(EventType::LeadStatusChanged.namespace(), "lead");
        assert_eq!(EventType::ImportCompleted.namespace(), "import");
    }

    #[test]
    fn test_envelope_carries_event_fields() -> Result<(), serde_json::Error> {
        let event = Event::new(EventType::LeadCreated, json!({"lead_id": "l-1"}));
        let value = event.envelope().to_value()?;

        assert_eq!(value["id"], json!(event.id.to_string()));
        assert_eq!(value["event"], json!("lead.created"));
        assert_eq!(value["data"]["lead_id"], json!("l-1"));
        assert!(value["timestamp"].is_string());
        Ok(())
    }
}
