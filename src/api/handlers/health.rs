use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub storage: String,
    pub bucket: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    // A missing probe object still proves the store answered
    let storage_status = match state.storage.exists("health-check").await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::warn!("Storage health probe failed: {}", e);
            "disconnected"
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        storage: storage_status.to_string(),
        bucket: state.storage.locator().bucket().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
