use super::*;
use crate::engine::test_helpers::{ScriptedSource, create_test_engine, create_test_engine_with, item};
use crate::types::{JobId, JobStatus, RawItem};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::time::Duration;
use tower::ServiceExt;


fn channel(count: i64) -> Vec<RawItem> {
    (1..=count).map(item).collect()
}

/// Router over a scripted engine; the engine is returned for direct inspection
async fn create_test_app(
    source: &ScriptedSource,
) -> (Router, Arc<IngestEngine>, tempfile::TempDir) {
    let (engine, temp_dir) = create_test_engine(source).await;
    let engine = Arc::new(engine);
    let app = create_router(engine.clone(), engine.get_config());
    (app, engine, temp_dir)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Poll the job until it reaches `status`
async fn wait_for_status(engine: &IngestEngine, id: &JobId, status: JobStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let stats = engine.get_stats(id).await.unwrap();
            if stats.job.status == status && !engine.is_running(id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not reach the expected status in time")
}

#[tokio::test]
async fn test_api_server_spawns() {
    let source = ScriptedSource::new(channel(1));
    let (engine, _temp_dir) = create_test_engine(&source).await;

    let mut config = (*engine.get_config()).clone();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();

    let handle = tokio::spawn(start_api_server(Arc::new(engine), Arc::new(config)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!handle.is_finished(), "server should still be serving");
    handle.abort();
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let source = ScriptedSource::new(channel(1));
    let (engine, _temp_dir) = create_test_engine_with(&source, |config| {
        config.api.api_key = Some("s3cret".to_string());
    })
    .await;
    let engine = Arc::new(engine);
    let app = create_router(engine.clone(), engine.get_config());

    let response = app.clone().oneshot(get_request("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/health")
        .header("X-Api-Key", "s3cret")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cors_headers_for_any_origin() {
    let source = ScriptedSource::new(channel(1));
    let (app, _engine, _temp_dir) = create_test_app(&source).await;

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "http://localhost:5173")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let source = ScriptedSource::new(channel(1));
    let (engine, _temp_dir) = create_test_engine_with(&source, |config| {
        config.api.cors_enabled = false;
    })
    .await;
    let engine = Arc::new(engine);
    let app = create_router(engine.clone(), engine.get_config());

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "http://localhost:5173")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get("access-control-allow-origin")
            .is_none()
    );
}

#[test]
fn test_cors_layer_specific_origins() {
    // Invalid origins are skipped rather than rejected
    let _layer = build_cors_layer(&[
        "http://localhost:5173".to_string(),
        "not a header\n".to_string(),
    ]);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let source = ScriptedSource::new(channel(1));
    let (app, _engine, _temp_dir) = create_test_app(&source).await;

    let response = app.oneshot(get_request("/api/unknown")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
