use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::domain::events::{Event, EventType};
use crate::outbound::webhook::dispatcher::DispatchError;
use crate::server::AppState;
use crate::server::responses::{ApiError, ResponseBody};

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub event_id: Uuid,
    pub event_type: EventType,
}

/// Accept a domain event; the fan-out runs in the background.
pub async fn publish_event(
    State(state): State<AppState>,
    Json(request): Json<EventRequest>,
) -> Result<ResponseBody<EventAccepted>, ApiError> {
    if request.event_type.is_reserved() {
        return Err(DispatchError::ReservedEvent(request.event_type).into());
    }

    let event = Event::new(request.event_type, request.payload);
    let accepted = EventAccepted {
        event_id: event.id,
        event_type: event.event_type,
    };

    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        let event_id = event.id;
        if let Err(e) = dispatcher.dispatch(event).await {
            error!(event_id = %event_id, error = %e, "Event dispatch failed");
        }
    });

    Ok(ResponseBody::new(StatusCode::ACCEPTED, accepted))
}
