//! Integration test: HTTP serving flow
//! Tests: cold start -> load -> predict -> validation failures -> reload

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image::{ImageOutputFormat, Rgb, RgbImage};
use tower::ServiceExt;

use api_gateway::{create_router, AppState, RequestOrchestrator};
use common::{ModelReference, ServingState};
use model_manager::{fixtures, ArtifactResolver, BackendRegistry, LifecycleManager, ModelLoader};
use serving_config::ServingConfig;
use storage_adapter::MemoryStore;

const BOUNDARY: &str = "imgserve-test-boundary";

struct TestApp {
    router: Router,
    lifecycle: Arc<LifecycleManager>,
    store: Arc<MemoryStore>,
    reference: ModelReference,
    _cache: tempfile::TempDir,
}

fn test_config() -> ServingConfig {
    let mut config = ServingConfig::default();
    config.model.bucket = "eurosat".to_string();
    config.model.version = "v1".to_string();
    config.timeouts.retry_after_secs = 3;
    config
}

fn test_app(config: ServingConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let cache = tempfile::tempdir().unwrap();
    let reference = config.model_reference();

    let resolver = Arc::new(ArtifactResolver::new(
        store.clone(),
        cache.path(),
        config.timeouts.artifact_fetch(),
    ));
    let loader = ModelLoader::new(Arc::new(BackendRegistry::default()));
    let lifecycle = Arc::new(LifecycleManager::new(reference.clone(), resolver, loader));
    let orchestrator = Arc::new(RequestOrchestrator::from_config(lifecycle.clone(), &config));
    let state = Arc::new(AppState::from_config(orchestrator, &config));

    TestApp {
        router: create_router(state),
        lifecycle,
        store,
        reference,
        _cache: cache,
    }
}

/// App whose model always outputs `probabilities`, already loaded
async fn ready_app(probabilities: &[f32]) -> TestApp {
    let app = test_app(test_config());
    fixtures::seed_store(&app.store, &app.reference, probabilities, 4, 4);
    assert!(app.lifecycle.start().await.is_ready());
    app
}

fn forest_probabilities() -> Vec<f32> {
    let mut probs = vec![0.07 / 9.0; 10];
    probs[0] = 0.93;
    probs
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([34, 139, 34])))
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

fn multipart_body(field: &str, content_type: Option<&str>, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"upload.bin\"\r\n",
            BOUNDARY, field
        )
        .as_bytes(),
    );
    if let Some(content_type) = content_type {
        body.extend_from_slice(format!("Content-Type: {}\r\n", content_type).as_bytes());
    }
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn predict_request(uri: &str, content_type: Option<&str>, payload: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("file", content_type, payload)))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 64).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, headers, json)
}

// ============================================================================
// Health and readiness
// ============================================================================

#[tokio::test]
async fn test_health_before_and_after_load() {
    let app = test_app(test_config());
    let (status, _, json) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, serde_json::json!({ "status": "online", "model_loaded": false }));

    fixtures::seed_store(&app.store, &app.reference, &forest_probabilities(), 4, 4);
    app.lifecycle.start().await;

    let (status, _, json) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model_loaded"], true);
}

#[tokio::test]
async fn test_predict_before_ready_is_not_ready() {
    let app = test_app(test_config());
    fixtures::seed_store(&app.store, &app.reference, &forest_probabilities(), 4, 4);

    let (status, headers, json) = send(&app.router, predict_request("/predict", Some("image/png"), &png(8, 8))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(headers[header::RETRY_AFTER], "3");
    assert_eq!(json["error"]["code"], "NOT_READY");
}

#[tokio::test]
async fn test_failed_startup_until_reload() {
    let app = test_app(test_config());
    let snapshot = app.lifecycle.start().await;
    assert_eq!(snapshot.state, ServingState::Failed);

    let (_, _, health) = send(&app.router, get("/health")).await;
    assert_eq!(health["model_loaded"], false);

    let (status, _, json) = send(&app.router, predict_request("/predict", Some("image/png"), &png(8, 8))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "LOAD_FAILED");

    let (_, _, model) = send(&app.router, get("/model")).await;
    assert_eq!(model["state"], "failed");
    assert_eq!(model["last_error"]["code"], "ARTIFACT_UNAVAILABLE");

    fixtures::seed_store(&app.store, &app.reference, &forest_probabilities(), 4, 4);
    let reload = Request::builder()
        .method("POST")
        .uri("/admin/reload")
        .body(Body::empty())
        .unwrap();
    let (status, _, json) = send(&app.router, reload).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["state"], "failed");

    let mut rx = app.lifecycle.subscribe();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| s.state == ServingState::Ready))
        .await
        .unwrap()
        .unwrap();
    drop(rx);
    let (status, _, json) = send(&app.router, predict_request("/predict", Some("image/png"), &png(8, 8))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prediction"], "Forest");
}

// ============================================================================
// Predictions
// ============================================================================

#[tokio::test]
async fn test_confident_prediction() {
    let app = ready_app(&forest_probabilities()).await;
    let (status, _, json) = send(&app.router, predict_request("/predict", Some("image/png"), &png(32, 32))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prediction"], "Forest");
    assert!((json["confidence"].as_f64().unwrap() - 0.93).abs() < 1e-3);
    assert!(json.get("raw_scores").is_none());
}

#[tokio::test]
async fn test_low_confidence_is_uncertain() {
    let app = ready_app(&[0.42, 0.30, 0.28]).await;
    let (status, _, json) = send(&app.router, predict_request("/predict", Some("image/png"), &png(32, 32))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["prediction"], "Uncertain");
    assert!((json["confidence"].as_f64().unwrap() - 0.42).abs() < 1e-3);
}

#[tokio::test]
async fn test_verbose_prediction_exposes_scores() {
    let app = ready_app(&forest_probabilities()).await;
    let (status, _, json) = send(
        &app.router,
        predict_request("/predict?verbose=true", Some("image/png"), &png(8, 8)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let scores = json["raw_scores"].as_array().unwrap();
    assert_eq!(scores.len(), 10);
    let sum: f64 = scores.iter().map(|s| s.as_f64().unwrap()).sum();
    assert!((sum - 1.0).abs() < 1e-3);
    assert_eq!(json["labels"][0], "Forest");
    assert_eq!(json["model_version"], "v1");
}

#[tokio::test]
async fn test_concurrent_predictions_are_independent() {
    let app = ready_app(&forest_probabilities()).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let router = app.router.clone();
        handles.push(tokio::spawn(async move {
            send(&router, predict_request("/predict", Some("image/png"), &png(12, 12))).await
        }));
    }

    for handle in handles {
        let (status, _, json) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["prediction"], "Forest");
    }
}

#[tokio::test]
async fn test_model_endpoint_describes_loaded_model() {
    let app = ready_app(&forest_probabilities()).await;
    let (status, _, json) = send(&app.router, get("/model")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "ready");
    assert_eq!(json["version"], "v1");
    assert_eq!(json["loaded"]["architecture"], "linear");
    assert_eq!(json["loaded"]["labels"].as_array().unwrap().len(), 10);
    assert_eq!(json["loaded"]["input_shape"], serde_json::json!([3, 4, 4]));
    assert!(json.get("last_error").is_none());
}

// ============================================================================
// Upload validation
// ============================================================================

#[tokio::test]
async fn test_text_upload_is_unsupported_media_type() {
    let app = ready_app(&forest_probabilities()).await;
    let (status, _, json) = send(
        &app.router,
        predict_request("/predict", Some("text/plain"), b"just some notes"),
    )
    .await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json["error"]["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn test_random_bytes_are_corrupt_image() {
    let app = ready_app(&forest_probabilities()).await;
    let noise = [0x13, 0x37, 0xde, 0xad, 0xbe, 0xef, 0x00, 0x42, 0x99, 0x07];
    let (status, _, json) = send(&app.router, predict_request("/predict", Some("image/jpeg"), &noise)).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"]["code"], "CORRUPT_IMAGE");
}

#[tokio::test]
async fn test_missing_content_type_is_unsupported() {
    let app = ready_app(&forest_probabilities()).await;
    let (status, _, json) = send(&app.router, predict_request("/predict", None, &png(8, 8))).await;

    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(json["error"]["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let mut config = test_config();
    config.policy.max_upload_bytes = 1024;
    let app = test_app(config);
    fixtures::seed_store(&app.store, &app.reference, &forest_probabilities(), 4, 4);
    app.lifecycle.start().await;

    let (status, _, json) = send(&app.router, predict_request("/predict", Some("image/png"), &[0u8; 4096])).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");

    // Beyond the request body limit as well.
    let (status, _, json) = send(
        &app.router,
        predict_request("/predict", Some("image/png"), &vec![0u8; 128 * 1024]),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json["error"]["code"], "PAYLOAD_TOO_LARGE");
}

#[tokio::test]
async fn test_missing_file_field_is_bad_request() {
    let app = ready_app(&forest_probabilities()).await;
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("image", Some("image/png"), &png(8, 8))))
        .unwrap();

    let (status, _, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_non_multipart_body_is_bad_request() {
    let app = ready_app(&forest_probabilities()).await;
    let request = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, "image/png")
        .body(Body::from(png(8, 8)))
        .unwrap();

    let (status, _, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = ready_app(&forest_probabilities()).await;
    let (status, _, json) = send(&app.router, get("/v1/models")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "NOT_FOUND");
}
