use axum::http::StatusCode;

/// Liveness probe
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
