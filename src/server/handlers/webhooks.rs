use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use uuid::Uuid;

use crate::outbound::webhook::schemas::DeliveryAttempt;
use crate::outbound::webhook::subscription::{SubscriptionChanges, SubscriptionParams};
use crate::server::AppState;
use crate::server::responses::{ApiError, ResponseBody, SubscriptionView};

pub async fn list_webhooks(
    State(state): State<AppState>,
) -> Result<ResponseBody<Vec<SubscriptionView>>, ApiError> {
    let subscriptions = state.registry.list().await?;
    Ok(ResponseBody::ok(
        subscriptions.into_iter().map(SubscriptionView::from).collect(),
    ))
}

/// Create a subscription; the response is the only place the new secret
/// is shown besides rotation.
pub async fn create_webhook(
    State(state): State<AppState>,
    Json(params): Json<SubscriptionParams>,
) -> Result<ResponseBody<SubscriptionView>, ApiError> {
    let subscription = state.registry.create(params).await?;
    Ok(ResponseBody::new(
        StatusCode::CREATED,
        SubscriptionView::with_secret(subscription),
    ))
}

pub async fn get_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<SubscriptionView>, ApiError> {
    Ok(ResponseBody::ok(state.registry.get(id).await?.into()))
}

pub async fn update_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<SubscriptionChanges>,
) -> Result<ResponseBody<SubscriptionView>, ApiError> {
    Ok(ResponseBody::ok(state.registry.update(id, changes).await?.into()))
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn enable_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<SubscriptionView>, ApiError> {
    Ok(ResponseBody::ok(state.registry.enable(id).await?.into()))
}

pub async fn disable_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<SubscriptionView>, ApiError> {
    Ok(ResponseBody::ok(state.registry.disable(id).await?.into()))
}

pub async fn rotate_secret(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<SubscriptionView>, ApiError> {
    let subscription = state.registry.rotate_secret(id).await?;
    Ok(ResponseBody::ok(SubscriptionView::with_secret(subscription)))
}

/// Send a test event through the real delivery path
pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<DeliveryAttempt>, ApiError> {
    Ok(ResponseBody::ok(state.dispatcher.test_subscription(id).await?))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseBody<Vec<DeliveryAttempt>>, ApiError> {
    Ok(ResponseBody::ok(state.registry.deliveries(id).await?))
}
