/// Integration tests for the HTTP serving layer
///
/// A model is trained in-process on synthetic telemetry and the router is
/// driven with `tower::ServiceExt::oneshot`.
mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use common::{drifted_csv, telemetry_csv, training_config, write_file, TARGET};
use predictive_maintenance::{
    api::{build_router, AppState},
    config::Config,
    data::load_csv,
    metrics::init_metrics,
    ml::TrainingPipeline,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    dir: TempDir,
}

fn build_app(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = TempDir::new().unwrap();
    let data = write_file(dir.path(), "train.csv", &telemetry_csv(120));
    let mut config = training_config(&data, &dir.path().join("models"));
    config.monitoring.data_directory = dir.path().to_path_buf();
    configure(&mut config);

    let dataset = load_csv(&data, TARGET).unwrap();
    let trained = TrainingPipeline::fit(&config, &dataset).unwrap();
    let state = AppState::new(trained.artifact, trained.monitor, config).unwrap();

    TestApp {
        router: build_router(state),
        dir,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn telemetry(torque: f64, kind: &str) -> Value {
    json!({
        "UDI": 1,
        "Type": kind,
        "Air temperature [K]": 298.4,
        "Torque [Nm]": torque,
        "Tool wear [min]": 120.0
    })
}

#[tokio::test]
async fn test_health_reports_served_model() {
    let app = build_app(|_| {});

    let (status, body) = send(&app.router, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["observations"], 0);
    assert!(body["model"].is_string());
}

#[tokio::test]
async fn test_predict_returns_canonical_response() {
    let app = build_app(|_| {});

    let (status, body) = send(
        &app.router,
        post_json("/v1/predict", json!({ "features": telemetry(78.0, "M") })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["prediction"], 1);
    assert_eq!(body["label"], "Failed");
    assert_eq!(body["observation_id"], 0);
    let probability = body["probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&probability));
    assert_eq!(body["metrics"]["status"], "no_ground_truth");
    assert!(body["drift_detected"].is_boolean());

    let (_, second) = send(
        &app.router,
        post_json("/v1/predict", json!({ "features": telemetry(22.0, "L") })),
    )
    .await;
    assert_eq!(second["observation_id"], 1);
    assert_eq!(second["label"], "Not Failed");
}

#[tokio::test]
async fn test_predict_without_monitoring_omits_metrics() {
    let app = build_app(|config| config.monitoring.enabled = false);

    let (status, body) = send(
        &app.router,
        post_json("/v1/predict", json!({ "features": telemetry(40.0, "H") })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("metrics").is_none());
    assert!(body.get("drift_detected").is_none());
    assert!(body.get("observation_id").is_some());
}

#[tokio::test]
async fn test_unseen_machine_type_is_scored() {
    let app = build_app(|_| {});

    let (status, body) = send(
        &app.router,
        post_json("/v1/predict", json!({ "features": telemetry(30.0, "X") })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["probability"].is_number());
}

#[tokio::test]
async fn test_malformed_predict_is_client_error() {
    let app = build_app(|_| {});

    let request = Request::builder()
        .method("POST")
        .uri("/v1/predict")
        .header("content-type", "application/json")
        .body(Body::from("{\"features\": "))
        .unwrap();
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = send(&app.router, post_json("/v1/predict", json!({ "features": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_feature_names_the_column() {
    let app = build_app(|_| {});

    let (status, body) = send(
        &app.router,
        post_json(
            "/v1/predict",
            json!({ "features": { "Type": "L", "Tool wear [min]": 10.0 } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "MISSING_COLUMN");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Torque [Nm]"));
}

#[tokio::test]
async fn test_feedback_updates_performance() {
    let app = build_app(|_| {});

    let (_, failed) = send(
        &app.router,
        post_json("/v1/predict", json!({ "features": telemetry(79.0, "M") })),
    )
    .await;
    let (_, healthy) = send(
        &app.router,
        post_json(
            "/v1/predict",
            json!({ "features": telemetry(21.0, "L"), "label": 0 }),
        ),
    )
    .await;

    let (status, body) = send(
        &app.router,
        post_json(
            "/v1/feedback",
            json!({ "observation_id": failed["observation_id"], "label": "Failed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], true);

    let (status, body) = send(
        &app.router,
        post_json(
            "/v1/feedback",
            json!({ "observation_id": healthy["observation_id"], "label": "maybe" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], false);

    let (status, report) = send(&app.router, get("/v1/monitor/report")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["observations"], 2);
    assert_eq!(report["performance"]["labeled"], 2);
    assert_eq!(report["performance"]["status"], "ok");
    assert_eq!(report["performance"]["roc_auc"], 1.0);
}

#[tokio::test]
async fn test_feedback_for_unknown_observation_is_not_found() {
    let app = build_app(|_| {});

    let (status, body) = send(
        &app.router,
        post_json("/v1/feedback", json!({ "observation_id": 99, "label": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_batch_monitor_scores_held_out_file() {
    let app = build_app(|_| {});
    write_file(app.dir.path(), "held_out.csv", &telemetry_csv(60));

    let (status, body) = send(
        &app.router,
        post_json("/v1/monitor", json!({ "data_path": "held_out.csv" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rows"], 60);
    assert!(body["roc_auc"].as_f64().unwrap() > 0.8);
}

#[tokio::test]
async fn test_batch_monitor_detects_shifted_torque() {
    let app = build_app(|_| {});
    write_file(app.dir.path(), "shifted.csv", &drifted_csv(60, 200.0));

    let (status, body) = send(
        &app.router,
        post_json("/v1/monitor", json!({ "data_path": "shifted.csv" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["drift_detected"], true);
    assert!(body["drifted_features"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f == "Torque [Nm]"));
}

#[tokio::test]
async fn test_batch_monitor_missing_file_is_client_error() {
    let app = build_app(|_| {});

    let (status, body) = send(
        &app.router,
        post_json("/v1/monitor", json!({ "data_path": "does/not/exist.csv" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "DATA_ERROR");
}

#[tokio::test]
async fn test_batch_monitor_rejects_paths_outside_data_directory() {
    let app = build_app(|_| {});
    let outside = TempDir::new().unwrap();
    let secret = write_file(outside.path(), "secret.csv", &telemetry_csv(20));

    for data_path in [
        json!(secret),
        json!("../secret.csv"),
        json!("models/../../secret.csv"),
    ] {
        let (status, body) = send(
            &app.router,
            post_json("/v1/monitor", json!({ "data_path": data_path })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "{} was accepted", data_path);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_metrics_endpoint_exports_prediction_counters() {
    init_metrics().unwrap();
    let app = build_app(|_| {});

    send(
        &app.router,
        post_json("/v1/predict", json!({ "features": telemetry(50.0, "L") })),
    )
    .await;

    let response = app.router.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("predictive_maintenance_predictions_total"));
    assert!(text.contains("predictive_maintenance_prediction_duration_seconds"));
}
