use crate::api::AppState;
use crate::data::{load_csv, resolve_data_path, FeatureRow};
use crate::error::{AppError, Result};
use crate::metrics::{
    gather_metrics, DRIFT_DETECTED_TOTAL, FEEDBACK_TOTAL, OBSERVATIONS_TOTAL,
    PREDICTIONS_TOTAL, PREDICTION_DURATION_SECONDS,
};
use crate::ml::Classifier;
use crate::monitoring::{MonitorReport, PerformanceReport};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        model: state.artifact.metadata.candidate.clone(),
        observations: state.monitor.len(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Candidate name of the served model
    pub model: String,
    pub observations: usize,
}

/// Prometheus metrics endpoint
pub async fn metrics() -> (StatusCode, String) {
    (StatusCode::OK, gather_metrics())
}

/// Score one row and record it with the monitor
pub async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let timer = PREDICTION_DURATION_SECONDS.start_timer();
    let prediction = state.artifact.predict_row(&request.features)?;
    timer.observe_duration();

    PREDICTIONS_TOTAL
        .with_label_values(&[&prediction.label.to_string()])
        .inc();

    let observation_id = state.monitor.observe(
        &prediction.features,
        prediction.label,
        prediction.probability,
        request.label.as_ref(),
    )?;
    OBSERVATIONS_TOTAL.inc();

    let (metrics, drift_detected) = if state.config.monitoring.enabled {
        let report = state.monitor.report();
        if report.drift.drift_detected {
            DRIFT_DETECTED_TOTAL.with_label_values(&["live"]).inc();
            debug!(features = ?report.drift.drifted_features(), "Live drift detected");
        }
        (Some(report.performance), Some(report.drift.drift_detected))
    } else {
        (None, None)
    };

    info!(
        observation_id,
        label = %prediction.label,
        probability = prediction.probability,
        "Prediction served"
    );

    Ok(Json(PredictResponse {
        prediction: prediction.label.as_index(),
        label: prediction.label.to_string(),
        probability: prediction.probability,
        observation_id,
        metrics,
        drift_detected,
    }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct PredictRequest {
    #[validate(length(min = 1))]
    pub features: FeatureRow,
    /// Optional ground truth known at request time
    #[serde(default)]
    pub label: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction: usize,
    pub label: String,
    pub probability: f64,
    pub observation_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<PerformanceReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_detected: Option<bool>,
}

/// Attach ground truth to an earlier prediction
pub async fn feedback(
    State(state): State<AppState>,
    payload: std::result::Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>> {
    let Json(request) = payload?;

    let accepted = state.monitor.feedback(request.observation_id, &request.label)?;
    FEEDBACK_TOTAL
        .with_label_values(&[if accepted { "true" } else { "false" }])
        .inc();

    info!(
        observation_id = request.observation_id,
        accepted,
        "Feedback received"
    );

    Ok(Json(FeedbackResponse {
        observation_id: request.observation_id,
        accepted,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub observation_id: u64,
    pub label: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub observation_id: u64,
    /// False when the label could not be read as a failure label
    pub accepted: bool,
}

/// Current drift and performance report
pub async fn monitor_report(State(state): State<AppState>) -> Result<Json<MonitorReport>> {
    let report = state.monitor.report();
    if report.drift.drift_detected {
        DRIFT_DETECTED_TOTAL.with_label_values(&["live"]).inc();
    }
    Ok(Json(report))
}

/// Evaluate a labeled CSV against the served model and the training baseline
pub async fn monitor_batch(
    State(state): State<AppState>,
    payload: std::result::Result<Json<BatchMonitorRequest>, JsonRejection>,
) -> Result<Json<BatchMonitorResponse>> {
    let Json(request) = payload?;
    request.validate()?;

    let target_column = state.config.training.target_column.clone();
    let data_directory = state.config.monitoring.data_directory.clone();
    let artifact = state.artifact.clone();
    let monitor = state.monitor.clone();
    let data_path = request.data_path.clone();

    // CSV parsing and scoring are CPU-bound
    let comparison = tokio::task::spawn_blocking(move || {
        let data_path = resolve_data_path(&data_directory, &data_path)?;
        let dataset = load_csv(&data_path, &target_column)?;
        let features = artifact.transform(&dataset)?;
        let probabilities = artifact.model.predict_proba(&features)?;
        let labels = dataset.labels().to_vec();
        monitor.compare_batch(&features, &labels, &probabilities.to_vec())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Batch evaluation task failed: {}", e)))??;

    if comparison.drift.drift_detected {
        DRIFT_DETECTED_TOTAL.with_label_values(&["batch"]).inc();
    }

    info!(
        data_path = %request.data_path,
        rows = comparison.rows,
        roc_auc = ?comparison.roc_auc,
        drift_detected = comparison.drift.drift_detected,
        "Batch monitored"
    );

    Ok(Json(BatchMonitorResponse {
        roc_auc: comparison.roc_auc,
        drift_detected: comparison.drift.drift_detected,
        rows: comparison.rows,
        drifted_features: comparison
            .drift
            .drifted_features()
            .into_iter()
            .map(str::to_string)
            .collect(),
    }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct BatchMonitorRequest {
    /// Relative to `monitoring.data_directory`
    #[validate(length(min = 1))]
    pub data_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchMonitorResponse {
    pub roc_auc: Option<f64>,
    pub drift_detected: bool,
    pub rows: usize,
    pub drifted_features: Vec<String>,
}
