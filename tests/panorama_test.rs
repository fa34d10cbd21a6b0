#![cfg(unix)]

mod common;

use axum::http::StatusCode;
use common::*;
use panorama_gateway::services::storage::StorageService;

#[tokio::test]
async fn test_generate_panorama_publishes_stitcher_output() {
    let t = setup();
    upload(&t.app, "left.jpg", b"L").await;
    upload(&t.app, "right.jpg", b"R").await;

    let (status, body) = send_json(&t.app, post("/generate-panorama")).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "Panorama generated successfully");
    assert_eq!(
        body["panoramaUrl"],
        "https://storage.googleapis.com/cg-project-bucket/panorama/panorama.jpg"
    );
    assert!(uuid::Uuid::parse_str(body["runId"].as_str().unwrap()).is_ok());

    // The returned URL must resolve to the published bytes
    let key = body["panoramaUrl"]
        .as_str()
        .unwrap()
        .strip_prefix("https://storage.googleapis.com/cg-project-bucket/")
        .unwrap();
    assert_eq!(t.store.object_bytes(key).unwrap(), "PANORAMA");
    // The result is not listed among uploaded images
    let (_, images) = send_json(&t.app, get("/images")).await;
    assert_eq!(images.as_array().unwrap().len(), 2);

    assert_eq!(t.state.staging.live_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_stitcher_sees_every_upload() {
    let t = setup_with(|config| {
        config.stitch_args = stitcher(r#"ls "$1" | sort | tr '\n' ',' > "$2""#);
    });
    upload(&t.app, "a.jpg", b"A").await;
    upload(&t.app, "b.jpg", b"B").await;
    upload(&t.app, "c.jpg", b"C").await;

    let (status, _) = send_json(&t.app, post("/generate-panorama")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        t.store.object_bytes("panorama/panorama.jpg").unwrap(),
        "a.jpg,b.jpg,c.jpg,"
    );
}

#[tokio::test]
async fn test_failing_stitcher_uploads_nothing() {
    let t = setup();

    // No uploads: the stand-in stitcher refuses to run
    let (status, body) = send_json(&t.app, post("/generate-panorama")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "stitcher_failed");
    assert_eq!(body["error"], "Need more images");

    assert!(t.store.object_bytes("panorama/panorama.jpg").is_none());
    assert_eq!(t.state.staging.live_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_missing_output_is_failure_even_on_exit_zero() {
    let t = setup_with(|config| {
        config.stitch_args = stitcher("echo 'Error stitching images: 1'");
    });
    upload(&t.app, "left.jpg", b"L").await;

    let (status, body) = send_json(&t.app, post("/generate-panorama")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "stitcher_failed");
    assert_eq!(body["error"], "Error stitching images: 1");
    assert!(t.store.object_bytes("panorama/panorama.jpg").is_none());
    assert_eq!(t.state.staging.live_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_stitcher_timeout() {
    let t = setup_with(|config| {
        config.stitch_args = stitcher(
            r#"printf 'partial' > "$2"; echo 'opencv: stitching stalled' >&2; exec sleep 30"#,
        );
        config.stitch_timeout_secs = 1;
    });
    upload(&t.app, "left.jpg", b"L").await;

    let started = std::time::Instant::now();
    let (status, body) = send_json(&t.app, post("/generate-panorama")).await;
    assert!(started.elapsed() < std::time::Duration::from_secs(15));
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "stitcher_timeout");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("opencv: stitching stalled"),
        "{}",
        body
    );
    assert!(t.store.object_bytes("panorama/panorama.jpg").is_none());
    assert_eq!(t.state.staging.live_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_missing_stitcher_binary() {
    let t = setup_with(|config| {
        config.stitch_command = "/definitely/not/a/stitcher".to_string();
        config.stitch_args = Vec::new();
    });
    upload(&t.app, "left.jpg", b"L").await;

    let (status, body) = send_json(&t.app, post("/generate-panorama")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "stitcher_unavailable");
    assert_eq!(t.state.staging.live_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_runs_leave_consistent_result() {
    let t = setup_with(|config| {
        config.stitch_args = stitcher(r#"sleep 0.2; printf 'PANORAMA' > "$2""#);
    });
    upload(&t.app, "left.jpg", b"L").await;

    let requests = (0..4).map(|_| {
        let app = t.app.clone();
        tokio::spawn(async move { send_json(&app, post("/generate-panorama")).await })
    });
    for handle in requests.collect::<Vec<_>>() {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK, "{}", body);
    }

    assert_eq!(
        t.store.object_bytes("panorama/panorama.jpg").unwrap(),
        "PANORAMA"
    );
    assert_eq!(t.store.keys().iter().filter(|k| k.starts_with("panorama/")).count(), 1);
    assert_eq!(t.state.staging.live_entries().unwrap(), 0);
}

#[tokio::test]
async fn test_unique_output_keys() {
    let t = setup_with(|config| config.unique_output_keys = true);
    upload(&t.app, "left.jpg", b"L").await;

    let (_, first) = send_json(&t.app, post("/generate-panorama")).await;
    let (_, second) = send_json(&t.app, post("/generate-panorama")).await;
    assert_ne!(first["panoramaUrl"], second["panoramaUrl"]);

    let run_id = first["runId"].as_str().unwrap();
    assert_eq!(
        first["panoramaUrl"],
        format!(
            "https://storage.googleapis.com/cg-project-bucket/panorama/{}-panorama.jpg",
            run_id
        )
    );
    let key = first["panoramaUrl"]
        .as_str()
        .unwrap()
        .strip_prefix("https://storage.googleapis.com/cg-project-bucket/")
        .unwrap();
    assert_eq!(t.store.object_bytes(key).unwrap(), "PANORAMA");
}

#[tokio::test]
async fn test_nested_uploads_sharing_a_name_all_reach_stitcher() {
    let t = setup_with(|config| {
        config.stitch_args = stitcher(r#"ls "$1" | wc -l | tr -d ' \n' > "$2""#);
    });
    let src = t.root.path().join("x.jpg");
    std::fs::write(&src, b"X").unwrap();
    for key in ["uploads/a/x.jpg", "uploads/b/x.jpg"] {
        t.store.put(&src, key).await.unwrap();
    }

    let (status, body) = send_json(&t.app, post("/generate-panorama")).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(t.store.object_bytes("panorama/panorama.jpg").unwrap(), "2");
}
