//! Integration tests for the serving-time monitor under concurrent use

use ndarray::{Array1, Array2};
use predictive_maintenance::{
    data::FailureLabel,
    monitoring::{
        DriftMethod, DriftStatus, FeatureBaseline, ModelMonitor, MonitorSettings,
        PerformanceStatus,
    },
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn baseline() -> FeatureBaseline {
    let matrix = Array2::from_shape_fn((200, 3), |(i, j)| match j {
        0 => (i % 50) as f64,
        1 => 10.0 + (i % 7) as f64 * 0.5,
        _ => 1.0,
    });
    let names = ["torque", "wear", "type=L"].map(String::from);
    FeatureBaseline::capture(&names, &matrix).unwrap()
}

fn settings(window: Option<usize>, method: DriftMethod, threshold: f64) -> MonitorSettings {
    MonitorSettings {
        window,
        method,
        threshold,
    }
}

#[tokio::test]
async fn test_concurrent_observations_get_unique_ids() {
    let monitor = Arc::new(ModelMonitor::new(baseline(), MonitorSettings::default()));
    let means = Array1::from(monitor.baseline().means());

    let mut handles = Vec::new();
    for task in 0..8 {
        let monitor = monitor.clone();
        let means = means.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for i in 0..25 {
                let label = FailureLabel::from_index((task + i) % 2);
                ids.push(monitor.observe(&means, label, 0.5, None).unwrap());
                // Reports interleave with writers
                let report = monitor.report();
                assert!(report.observations >= ids.len());
            }
            ids
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "duplicate id {}", id);
        }
    }

    assert_eq!(seen.len(), 200);
    assert_eq!(seen.iter().max(), Some(&199));
    assert_eq!(monitor.len(), 200);
}

#[tokio::test]
async fn test_baseline_mean_copies_are_stable() {
    let monitor = ModelMonitor::new(baseline(), settings(None, DriftMethod::MeanShift, 0.1));
    let means = Array1::from(monitor.baseline().means());

    for _ in 0..30 {
        monitor
            .observe(&means, FailureLabel::NotFailed, 0.1, None)
            .unwrap();
    }
    let report = monitor.report();

    assert_eq!(report.drift.status, DriftStatus::Stable);
    for feature in &report.drift.features {
        assert!(feature.statistic.abs() < 1e-9, "{:?}", feature);
    }
}

#[tokio::test]
async fn test_window_forgets_old_drift() {
    let monitor = ModelMonitor::new(baseline(), settings(Some(10), DriftMethod::MeanShift, 0.5));
    let means = Array1::from(monitor.baseline().means());
    let mut shifted = means.clone();
    shifted[0] += 500.0;

    for _ in 0..10 {
        monitor
            .observe(&shifted, FailureLabel::Failed, 0.9, None)
            .unwrap();
    }
    assert!(monitor.report().drift.drift_detected);

    for _ in 0..10 {
        monitor
            .observe(&means, FailureLabel::NotFailed, 0.1, None)
            .unwrap();
    }
    let report = monitor.report();
    assert!(!report.drift.drift_detected);
    assert_eq!(report.drift.sample_size, 10);
    assert_eq!(report.observations, 20);
}

#[tokio::test]
async fn test_psi_flags_collapsed_distribution() {
    let monitor = ModelMonitor::new(baseline(), settings(None, DriftMethod::Psi, 0.2));
    let collapsed = Array1::from(vec![49.0, 10.0, 1.0]);

    for _ in 0..40 {
        monitor
            .observe(&collapsed, FailureLabel::Failed, 0.8, None)
            .unwrap();
    }
    let report = monitor.report();

    assert_eq!(report.drift.method, DriftMethod::Psi);
    assert!(report.drift.drifted_features().contains(&"torque"));
}

#[tokio::test]
async fn test_persisted_log_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("monitor.json");
    let monitor = ModelMonitor::new(baseline(), MonitorSettings::default());
    let means = Array1::from(monitor.baseline().means());

    let first = monitor
        .observe(&means, FailureLabel::Failed, 0.9, Some(&json!(1)))
        .unwrap();
    monitor
        .observe(&means, FailureLabel::NotFailed, 0.2, None)
        .unwrap();
    monitor.feedback(first + 1, &json!("Not Failed")).unwrap();
    monitor.save(&path).unwrap();

    let restored = ModelMonitor::load(&path, settings(None, DriftMethod::Psi, 0.3)).unwrap();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored.settings().method, DriftMethod::Psi);

    let report = restored.report();
    assert_eq!(report.performance.labeled, 2);
    assert_eq!(report.performance.status, PerformanceStatus::Ok);
    assert_eq!(report.performance.roc_auc, Some(1.0));

    // Ids continue after the restored log
    let next = restored
        .observe(&means, FailureLabel::NotFailed, 0.1, None)
        .unwrap();
    assert_eq!(next, 2);
}

#[tokio::test]
async fn test_loading_missing_monitor_is_not_found() {
    let dir = TempDir::new().unwrap();
    let result = ModelMonitor::load(dir.path().join("absent.json"), MonitorSettings::default());
    assert!(matches!(
        result,
        Err(predictive_maintenance::AppError::NotFound(_))
    ));
}
