pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::GatewayConfig;
use crate::services::assets::AssetService;
use crate::services::executor::ProcessExecutor;
use crate::services::pipeline::{PanoramaPipeline, PipelineSettings};
use crate::services::staging::{StagingArea, StagingError};
use crate::services::storage::StorageService;
use axum::{
    Router,
    http::HeaderValue,
    middleware::from_fn,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::images::upload_file,
        api::handlers::images::list_images,
        api::handlers::images::get_image,
        api::handlers::images::download_image,
        api::handlers::images::delete_image,
        api::handlers::panorama::generate_panorama,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::images::MessageResponse,
            api::handlers::images::ImageResponse,
            api::handlers::panorama::PanoramaResponse,
            api::handlers::health::HealthResponse,
            models::Asset,
        )
    ),
    tags(
        (name = "images", description = "Image asset endpoints"),
        (name = "panorama", description = "Panorama generation"),
        (name = "system", description = "Health and diagnostics")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageService>,
    pub staging: Arc<StagingArea>,
    pub assets: Arc<AssetService>,
    pub pipeline: Arc<PanoramaPipeline>,
    pub config: GatewayConfig,
}

impl AppState {
    /// Wires the services for `config` on top of a store and an executor.
    pub fn new(
        config: GatewayConfig,
        storage: Arc<dyn StorageService>,
        executor: Arc<dyn ProcessExecutor>,
    ) -> Result<Self, StagingError> {
        let staging = Arc::new(StagingArea::new(&config.staging_dir)?);
        let assets = Arc::new(AssetService::new(
            storage.clone(),
            staging.clone(),
            config.uploads_prefix.clone(),
            config.max_file_size,
        ));
        let pipeline = Arc::new(PanoramaPipeline::new(
            storage.clone(),
            staging.clone(),
            executor,
            PipelineSettings::from(&config),
        ));

        Ok(Self {
            storage,
            staging,
            assets,
            pipeline,
            config,
        })
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/upload", post(api::handlers::images::upload_file))
        .route("/images", get(api::handlers::images::list_images))
        .route("/images/:filename", get(api::handlers::images::get_image))
        .route("/download/:filename", get(api::handlers::images::download_image))
        .route("/delete/:filename", delete(api::handlers::images::delete_image))
        .route(
            "/generate-panorama",
            post(api::handlers::panorama::generate_panorama),
        )
        .fallback_service(static_files)
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_file_size + 10 * 1024 * 1024, // Add 10MB buffer for multipart overhead
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        // Outermost, so the trace span already sees the id
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
