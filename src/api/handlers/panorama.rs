use crate::AppState;
use crate::api::error::AppError;
use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PanoramaResponse {
    pub message: String,
    pub panorama_url: String,
    pub run_id: String,
}

#[utoipa::path(
    post,
    path = "/generate-panorama",
    responses(
        (status = 200, description = "Panorama generated successfully", body = PanoramaResponse),
        (status = 500, description = "Stitching or publishing failed")
    ),
    tag = "panorama"
)]
pub async fn generate_panorama(
    State(state): State<AppState>,
) -> Result<Json<PanoramaResponse>, AppError> {
    let pipeline = state.pipeline.clone();

    // Detached so a client disconnect cannot interrupt staging cleanup
    let outcome = tokio::spawn(async move { pipeline.run().await })
        .await
        .map_err(|e| AppError::Internal(format!("Panorama task failed: {}", e)))?;

    let run = outcome?;
    let asset = run
        .result_asset
        .ok_or_else(|| AppError::Internal("Run succeeded without a result".to_string()))?;

    Ok(Json(PanoramaResponse {
        message: "Panorama generated successfully".to_string(),
        panorama_url: asset.public_url,
        run_id: run.id.to_string(),
    }))
}
