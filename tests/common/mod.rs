#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use panorama_gateway::config::GatewayConfig;
use panorama_gateway::models::AssetLocator;
use panorama_gateway::services::executor::TokioProcessExecutor;
use panorama_gateway::services::storage::MemoryStorageService;
use panorama_gateway::{AppState, create_app};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Stand-in stitcher: writes a fixed placeholder when there is at least one input.
pub const STITCH_OK: &str = r#"
if [ -z "$(ls -A "$1")" ]; then echo 'Need more images' >&2; exit 1; fi
printf 'PANORAMA' > "$2"
"#;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryStorageService>,
    pub root: tempfile::TempDir,
}

pub fn test_config(root: &std::path::Path) -> GatewayConfig {
    GatewayConfig {
        bucket: "cg-project-bucket".to_string(),
        public_base_url: "https://storage.googleapis.com".to_string(),
        staging_dir: root.join("staging"),
        static_dir: root.join("public"),
        stitch_command: "sh".to_string(),
        stitch_args: vec!["-c".to_string(), STITCH_OK.to_string(), "stitch".to_string()],
        stitch_timeout_secs: 10,
        ..GatewayConfig::development()
    }
}

pub fn setup_with(configure: impl FnOnce(&mut GatewayConfig)) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    configure(&mut config);

    let store = Arc::new(MemoryStorageService::new(AssetLocator::new(
        &config.bucket,
        &config.public_base_url,
    )));
    let state = AppState::new(config, store.clone(), Arc::new(TokioProcessExecutor::new())).unwrap();
    let app = create_app(state.clone());

    TestApp {
        app,
        state,
        store,
        root,
    }
}

pub fn setup() -> TestApp {
    setup_with(|_| {})
}

pub fn stitcher(script: &str) -> Vec<String> {
    vec!["-c".to_string(), script.to_string(), "stitch".to_string()]
}

pub fn multipart_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "---------------------------123456789012345678901234567";
    let mut body = format!(
        "--{boundary}\r\n\
        Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
        Content-Type: image/jpeg\r\n\r\n",
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn upload(app: &Router, filename: &str, content: &[u8]) {
    let (status, body) = send_json(app, multipart_request("image", filename, content)).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {}", body);
}
