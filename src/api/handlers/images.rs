use crate::AppState;
use crate::api::error::AppError;
use crate::models::Asset;
use crate::services::assets::AssetError;
use crate::services::storage::StoreError;
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use tokio_util::io::{ReaderStream, StreamReader};
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct ImageResponse {
    pub name: String,
    pub url: String,
}

impl From<Asset> for ImageResponse {
    fn from(asset: Asset) -> Self {
        Self {
            name: asset.name,
            url: asset.public_url,
        }
    }
}

fn content_disposition(file_name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(file_name, NON_ALPHANUMERIC)
    )
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Multipart, description = "Image upload (field `image`)"),
    responses(
        (status = 200, description = "File uploaded successfully", body = MessageResponse),
        (status = 400, description = "No file uploaded or invalid file name"),
        (status = 413, description = "File too large"),
        (status = 500, description = "Store or staging failure")
    ),
    tag = "images"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, AppError> {
    let mut uploaded = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        let err_msg = e.to_string();
        if err_msg.contains("length limit exceeded") {
            AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
        } else {
            AppError::BadRequest(err_msg)
        }
    })? {
        // Only the first file part counts; other parts are drained and ignored
        if uploaded.is_some() {
            continue;
        }
        let Some(original_filename) = field.file_name().map(str::to_string) else {
            continue;
        };

        let body_with_io_error = field.map_err(std::io::Error::other);
        let reader = StreamReader::new(body_with_io_error);

        uploaded = Some(state.assets.upload(&original_filename, reader).await?);
    }

    uploaded.ok_or_else(|| AppError::BadRequest("No file uploaded".to_string()))?;
    Ok(MessageResponse::new("File uploaded successfully"))
}

#[utoipa::path(
    get,
    path = "/images",
    responses(
        (status = 200, description = "Uploaded images", body = [ImageResponse]),
        (status = 500, description = "Failed to retrieve images")
    ),
    tag = "images"
)]
pub async fn list_images(
    State(state): State<AppState>,
) -> Result<Json<Vec<ImageResponse>>, AppError> {
    let assets = state.assets.list().await?;
    Ok(Json(assets.into_iter().map(ImageResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/images/{filename}",
    params(
        ("filename" = String, Path, description = "Image file name")
    ),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 404, description = "File not found")
    ),
    tag = "images"
)]
pub async fn get_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let object = state.assets.open(&filename).await?;

    let mut response = Body::from_stream(ReaderStream::new(object.reader)).into_response();
    let headers = response.headers_mut();
    if let Some(h_val) = object
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(header::CONTENT_TYPE, h_val);
    }
    if let Some(len) = object.content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

#[utoipa::path(
    get,
    path = "/download/{filename}",
    params(
        ("filename" = String, Path, description = "Image file name")
    ),
    responses(
        (status = 200, description = "Image as attachment"),
        (status = 404, description = "File not found"),
        (status = 500, description = "Failed to download file")
    ),
    tag = "images"
)]
pub async fn download_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let download = state.assets.download(&filename).await?;

    let disposition = content_disposition(&download.file_name);
    let mut response = Body::from_stream(download.body).into_response();
    let headers = response.headers_mut();
    if let Ok(h_val) = HeaderValue::from_str(&download.content_type) {
        headers.insert(header::CONTENT_TYPE, h_val);
    }
    if let Ok(h_val) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, h_val);
    }
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(download.content_length),
    );
    Ok(response)
}

#[utoipa::path(
    delete,
    path = "/delete/{filename}",
    params(
        ("filename" = String, Path, description = "Image file name")
    ),
    responses(
        (status = 200, description = "File deleted successfully", body = MessageResponse),
        (status = 500, description = "Failed to delete file; kind `not_found` when it was absent")
    ),
    tag = "images"
)]
pub async fn delete_image(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    match state.assets.delete(&filename).await {
        Ok(()) => Ok(MessageResponse::new("File deleted successfully")),
        // Deleting an absent key is a server-side failure, told apart by its kind
        Err(AssetError::Store(StoreError::NotFound { key })) => Err(AppError::upstream(
            "not_found",
            format!("Failed to delete file: {} not found", key),
        )),
        Err(e) => Err(e.into()),
    }
}
