use axum::extract::{Path, State};
use uuid::Uuid;

use crate::outbound::webhook::schemas::DeliveryAttempt;
use crate::server::AppState;
use crate::server::responses::{ApiError, ResponseBody};

pub async fn get_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<DeliveryAttempt>, ApiError> {
    Ok(ResponseBody::ok(state.registry.delivery(id).await?))
}

/// Retry a delivery now, outside its schedule
pub async fn retry_delivery(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<DeliveryAttempt>, ApiError> {
    Ok(ResponseBody::ok(state.dispatcher.retry_delivery(id).await?))
}
