use crate::services::assets::AssetError;
use crate::services::pipeline::{PipelineError, PipelineFailure};
use crate::services::staging::StagingError;
use crate::services::storage::StoreError;
use crate::utils::validation::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    /// Object store or stitcher failure. `kind` is reported to the client.
    #[error("Upstream error ({kind}): {message}")]
    Upstream { kind: &'static str, message: String },

    #[error("Filesystem error: {0}")]
    Filesystem(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn upstream(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Upstream { kind, .. } => *kind,
            AppError::Filesystem(_) => "filesystem",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::Internal(_) | AppError::Anyhow(_) => "internal",
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::BadRequest(e.message)
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { key } => AppError::NotFound(format!("{} not found", key)),
            StoreError::Io(e) => AppError::Filesystem(e.to_string()),
            StoreError::Upstream(msg) => AppError::upstream("store", msg),
        }
    }
}

impl From<StagingError> for AppError {
    fn from(e: StagingError) -> Self {
        AppError::Filesystem(e.to_string())
    }
}

impl From<AssetError> for AppError {
    fn from(e: AssetError) -> Self {
        match e {
            AssetError::InvalidName(e) => e.into(),
            AssetError::TooLarge { .. } => AppError::PayloadTooLarge(e.to_string()),
            AssetError::Receive(e) if e.to_string().contains("length limit exceeded") => {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            }
            AssetError::Receive(e) => AppError::BadRequest(format!("Failed to read upload: {}", e)),
            AssetError::LocalIo { .. } => AppError::Filesystem(e.to_string()),
            AssetError::Staging(e) => e.into(),
            AssetError::Store(e) => e.into(),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Staging(e) => e.into(),
            PipelineError::Inputs(e) | PipelineError::Publish(e) => match e {
                // A missing input is a store inconsistency here, not a client error
                StoreError::NotFound { key } => {
                    AppError::upstream("store", format!("{} not found", key))
                }
                other => other.into(),
            },
            PipelineError::Spawn(e) => AppError::upstream("stitcher_unavailable", e.to_string()),
            PipelineError::ProcessFailed { .. } | PipelineError::MissingOutput { .. } => {
                let message = e
                    .diagnostics()
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| e.to_string());
                AppError::upstream("stitcher_failed", message)
            }
            PipelineError::TimedOut { .. } => {
                let message = match e.diagnostics().filter(|d| !d.is_empty()) {
                    Some(said) => format!("{}: {}", e, said),
                    None => e.to_string(),
                };
                AppError::upstream("stitcher_timeout", message)
            }
        }
    }
}

impl From<PipelineFailure> for AppError {
    fn from(failure: PipelineFailure) -> Self {
        failure.error.into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Upstream { kind, message } => {
                tracing::error!("Upstream error ({}): {}", kind, message);
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
            AppError::Filesystem(msg) => {
                tracing::error!("Filesystem error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::Anyhow(e) => {
                tracing::error!("Anyhow error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}
