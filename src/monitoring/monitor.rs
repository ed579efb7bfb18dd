use crate::data::FailureLabel;
use crate::error::{AppError, Result};
use crate::ml::artifact::{read_json, write_json};
use crate::ml::evaluation::roc_auc;
use crate::monitoring::baseline::FeatureBaseline;
use crate::monitoring::drift::{compare, compare_summary, DriftMethod, DriftReport, SampleSummary};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// How reports are computed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Trailing observations used for drift; `None` compares the whole log
    pub window: Option<usize>,
    pub method: DriftMethod,
    pub threshold: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            window: None,
            method: DriftMethod::MeanShift,
            threshold: 0.5,
        }
    }
}

/// One served prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: u64,
    pub features: Vec<f64>,
    pub prediction: FailureLabel,
    pub probability: f64,
    pub label: Option<FailureLabel>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Ok,
    /// No observation carries a ground-truth label
    NoGroundTruth,
    /// Every label belongs to the same class, ROC-AUC is undefined
    SingleClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub status: PerformanceStatus,
    pub roc_auc: Option<f64>,
    pub accuracy: Option<f64>,
    pub labeled: usize,
}

impl PerformanceReport {
    fn compute(labeled: &[(usize, usize, f64)]) -> Self {
        if labeled.is_empty() {
            return Self {
                status: PerformanceStatus::NoGroundTruth,
                roc_auc: None,
                accuracy: None,
                labeled: 0,
            };
        }

        let truth: Vec<usize> = labeled.iter().map(|&(t, _, _)| t).collect();
        let scores: Vec<f64> = labeled.iter().map(|&(_, _, p)| p).collect();
        let correct = labeled.iter().filter(|&&(t, p, _)| t == p).count();
        let auc = roc_auc(&truth, &scores);

        Self {
            status: if auc.is_some() {
                PerformanceStatus::Ok
            } else {
                PerformanceStatus::SingleClass
            },
            roc_auc: auc,
            accuracy: Some(correct as f64 / labeled.len() as f64),
            labeled: labeled.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorReport {
    pub observations: usize,
    pub performance: PerformanceReport,
    pub drift: DriftReport,
    pub generated_at: DateTime<Utc>,
}

/// Evaluation of a labeled held-out batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchComparison {
    pub rows: usize,
    pub roc_auc: Option<f64>,
    pub drift: DriftReport,
}

/// (truth, prediction, probability) of a labeled observation
type LabeledPair = (usize, usize, f64);

fn labeled_pair(observation: &Observation, label: FailureLabel) -> LabeledPair {
    (
        label.as_index(),
        observation.prediction.as_index(),
        observation.probability,
    )
}

/// Served predictions plus aggregates kept current on every write, so a
/// report never rescans `entries`
#[derive(Debug, Default, Serialize, Deserialize)]
struct ObservationLog {
    next_id: u64,
    entries: Vec<Observation>,

    /// Drift inputs over the trailing report window
    #[serde(skip)]
    window: SampleSummary,

    #[serde(skip)]
    labeled: BTreeMap<u64, LabeledPair>,
}

impl ObservationLog {
    fn new(n_features: usize) -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
            window: SampleSummary::new(n_features),
            labeled: BTreeMap::new(),
        }
    }

    /// Recompute the aggregates of a log read from disk
    fn rebuild(&mut self, baseline: &FeatureBaseline, window: Option<usize>) {
        self.window = SampleSummary::new(baseline.n_features());
        let start = window.map_or(0, |w| self.entries.len().saturating_sub(w));
        for entry in &self.entries[start..] {
            self.window.add(baseline, entry.features.iter().copied());
        }

        self.labeled = self
            .entries
            .iter()
            .filter_map(|o| o.label.map(|l| (o.id, labeled_pair(o, l))))
            .collect();
    }

    fn push(&mut self, observation: Observation, baseline: &FeatureBaseline, window: Option<usize>) {
        if let Some(label) = observation.label {
            self.labeled
                .insert(observation.id, labeled_pair(&observation, label));
        }
        self.window.add(baseline, observation.features.iter().copied());
        self.entries.push(observation);

        if let Some(w) = window {
            if self.entries.len() > w {
                let leaving = &self.entries[self.entries.len() - 1 - w];
                self.window.remove(baseline, leaving.features.iter().copied());
            }
        }
    }

    /// Ids are assigned in increasing order, so entries stay sorted by id
    fn position(&self, id: u64) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |o| o.id).ok()
    }
}

/// On-disk form of a monitor
#[derive(Deserialize)]
struct MonitorSnapshot {
    baseline: FeatureBaseline,
    log: ObservationLog,
}

/// Baseline plus an append-only log of served predictions
pub struct ModelMonitor {
    baseline: FeatureBaseline,
    settings: MonitorSettings,
    log: RwLock<ObservationLog>,
}

impl ModelMonitor {
    pub fn new(baseline: FeatureBaseline, settings: MonitorSettings) -> Self {
        Self {
            log: RwLock::new(ObservationLog::new(baseline.n_features())),
            baseline,
            settings,
        }
    }

    pub fn baseline(&self) -> &FeatureBaseline {
        &self.baseline
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.log.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a served prediction and return its observation id.
    ///
    /// A label that is not a recognizable failure label is ignored.
    pub fn observe(
        &self,
        features: &Array1<f64>,
        prediction: FailureLabel,
        probability: f64,
        label: Option<&serde_json::Value>,
    ) -> Result<u64> {
        if features.len() != self.baseline.n_features() {
            return Err(AppError::Validation(format!(
                "Observation has {} features, baseline has {}",
                features.len(),
                self.baseline.n_features()
            )));
        }

        let label = label.and_then(FailureLabel::from_json);
        let mut log = self.log.write();
        let id = log.next_id;
        log.next_id += 1;
        log.push(
            Observation {
                id,
                features: features.to_vec(),
                prediction,
                probability,
                label,
                timestamp: Utc::now(),
            },
            &self.baseline,
            self.settings.window,
        );

        debug!(
            observation_id = id,
            prediction = %prediction,
            labeled = label.is_some(),
            "Observation recorded"
        );
        Ok(id)
    }

    /// Attach ground truth to an earlier observation. Returns whether the
    /// label was recognized and stored.
    pub fn feedback(&self, id: u64, label: &serde_json::Value) -> Result<bool> {
        let parsed = FailureLabel::from_json(label);
        let mut log = self.log.write();
        let position = log
            .position(id)
            .ok_or_else(|| AppError::NotFound(format!("Observation {} not found", id)))?;

        if let Some(label) = parsed {
            let entry = &mut log.entries[position];
            entry.label = Some(label);
            let pair = labeled_pair(entry, label);
            log.labeled.insert(id, pair);
        }
        Ok(parsed.is_some())
    }

    /// Drift over the configured window and performance over every labeled
    /// observation. Reads the running aggregates only; the cost does not grow
    /// with the number of unlabeled observations.
    pub fn report(&self) -> MonitorReport {
        let (total, window, labeled) = {
            let log = self.log.read();
            let labeled: Vec<LabeledPair> = log.labeled.values().copied().collect();
            (log.entries.len(), log.window.clone(), labeled)
        };

        MonitorReport {
            observations: total,
            performance: PerformanceReport::compute(&labeled),
            drift: compare_summary(
                &self.baseline,
                &window,
                self.settings.method,
                self.settings.threshold,
            ),
            generated_at: Utc::now(),
        }
    }

    /// Score a labeled batch and compare its features to the baseline
    /// without touching the observation log
    pub fn compare_batch(
        &self,
        features: &Array2<f64>,
        labels: &[usize],
        probabilities: &[f64],
    ) -> Result<BatchComparison> {
        if features.ncols() != self.baseline.n_features() {
            return Err(AppError::Validation(format!(
                "Batch has {} features, baseline has {}",
                features.ncols(),
                self.baseline.n_features()
            )));
        }
        if labels.len() != features.nrows() || probabilities.len() != features.nrows() {
            return Err(AppError::Validation(
                "Batch labels and probabilities must match the row count".to_string(),
            ));
        }

        Ok(BatchComparison {
            rows: features.nrows(),
            roc_auc: roc_auc(labels, probabilities),
            drift: compare(
                &self.baseline,
                features,
                self.settings.method,
                self.settings.threshold,
            ),
        })
    }

    /// Persist baseline and log
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let log = self.log.read();
        let snapshot = MonitorSnapshotRef {
            baseline: &self.baseline,
            log: &*log,
        };
        write_json(path, &snapshot)?;
        info!(path = %path.display(), observations = log.entries.len(), "Monitor saved");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, settings: MonitorSettings) -> Result<Self> {
        let path = path.as_ref();
        let mut snapshot: MonitorSnapshot = read_json(path)?;
        snapshot.log.rebuild(&snapshot.baseline, settings.window);
        info!(
            path = %path.display(),
            features = snapshot.baseline.n_features(),
            observations = snapshot.log.entries.len(),
            "Monitor loaded"
        );
        Ok(Self {
            baseline: snapshot.baseline,
            settings,
            log: RwLock::new(snapshot.log),
        })
    }
}

#[derive(Serialize)]
struct MonitorSnapshotRef<'a> {
    baseline: &'a FeatureBaseline,
    log: &'a ObservationLog,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::drift::DriftStatus;
    use ndarray::array;
    use serde_json::json;

    fn monitor(window: Option<usize>) -> ModelMonitor {
        let matrix = array![[0.0, 1.0], [1.0, 1.0], [2.0, 1.0], [3.0, 1.0]];
        let baseline =
            FeatureBaseline::capture(&["a".to_string(), "b".to_string()], &matrix).unwrap();
        ModelMonitor::new(
            baseline,
            MonitorSettings {
                window,
                ..MonitorSettings::default()
            },
        )
    }

    #[test]
    fn test_observe_assigns_sequential_ids() {
        let monitor = monitor(None);
        let x = array![1.5, 1.0];

        assert_eq!(monitor.observe(&x, FailureLabel::Failed, 0.9, None).unwrap(), 0);
        assert_eq!(monitor.observe(&x, FailureLabel::NotFailed, 0.1, None).unwrap(), 1);
        assert_eq!(monitor.len(), 2);
    }

    #[test]
    fn test_malformed_label_is_ignored() {
        let monitor = monitor(None);
        let x = array![1.5, 1.0];
        monitor
            .observe(&x, FailureLabel::Failed, 0.9, Some(&json!("sometimes")))
            .unwrap();

        let report = monitor.report();
        assert_eq!(report.performance.status, PerformanceStatus::NoGroundTruth);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let monitor = monitor(None);
        assert!(monitor
            .observe(&array![1.0], FailureLabel::Failed, 0.9, None)
            .is_err());
    }

    #[test]
    fn test_report_without_observations() {
        let report = monitor(None).report();

        assert_eq!(report.observations, 0);
        assert_eq!(report.drift.status, DriftStatus::InsufficientData);
        assert_eq!(report.performance.status, PerformanceStatus::NoGroundTruth);
    }

    #[test]
    fn test_single_class_labels() {
        let monitor = monitor(None);
        let x = array![1.5, 1.0];
        monitor.observe(&x, FailureLabel::Failed, 0.8, Some(&json!(1))).unwrap();
        monitor.observe(&x, FailureLabel::Failed, 0.7, Some(&json!(true))).unwrap();

        let report = monitor.report();
        assert_eq!(report.performance.status, PerformanceStatus::SingleClass);
        assert_eq!(report.performance.roc_auc, None);
        assert_eq!(report.performance.accuracy, Some(1.0));
    }

    #[test]
    fn test_feedback_enables_roc_auc() {
        let monitor = monitor(None);
        let x = array![1.5, 1.0];
        let a = monitor.observe(&x, FailureLabel::Failed, 0.8, None).unwrap();
        let b = monitor.observe(&x, FailureLabel::NotFailed, 0.2, None).unwrap();

        assert!(monitor.feedback(a, &json!("Failed")).unwrap());
        assert!(monitor.feedback(b, &json!(0)).unwrap());
        assert!(!monitor.feedback(b, &json!("unknown")).unwrap());

        let report = monitor.report();
        assert_eq!(report.performance.status, PerformanceStatus::Ok);
        assert_eq!(report.performance.roc_auc, Some(1.0));
        assert_eq!(report.performance.labeled, 2);
    }

    #[test]
    fn test_feedback_unknown_id() {
        assert!(matches!(
            monitor(None).feedback(42, &json!(1)),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn test_window_limits_drift_sample() {
        let monitor = monitor(Some(2));
        for _ in 0..3 {
            monitor
                .observe(&array![100.0, 1.0], FailureLabel::Failed, 0.9, None)
                .unwrap();
        }
        for _ in 0..2 {
            monitor
                .observe(&array![1.5, 1.0], FailureLabel::NotFailed, 0.1, None)
                .unwrap();
        }

        let report = monitor.report();
        assert_eq!(report.observations, 5);
        assert_eq!(report.drift.sample_size, 2);
        assert!(!report.drift.drift_detected);
    }

    /// Drift computed from the running window must equal a full recomputation
    /// over the same trailing rows
    fn assert_matches_recomputed(monitor: &ModelMonitor, rows: &[[f64; 2]], window: Option<usize>) {
        let start = window.map_or(0, |w| rows.len().saturating_sub(w));
        let tail: Vec<f64> = rows[start..].iter().flatten().copied().collect();
        let matrix = Array2::from_shape_vec((rows.len() - start, 2), tail).unwrap();
        let expected = compare(
            monitor.baseline(),
            &matrix,
            monitor.settings().method,
            monitor.settings().threshold,
        );

        let report = monitor.report();
        assert_eq!(report.drift.sample_size, expected.sample_size);
        assert_eq!(report.drift.drift_detected, expected.drift_detected);
        for (live, full) in report.drift.features.iter().zip(&expected.features) {
            assert!((live.current_mean - full.current_mean).abs() < 1e-9);
            assert!(
                live.statistic == full.statistic || (live.statistic - full.statistic).abs() < 1e-9,
                "{} vs {}",
                live.statistic,
                full.statistic
            );
        }
    }

    #[test]
    fn test_running_window_matches_recomputation() {
        for window in [None, Some(1), Some(4)] {
            let monitor = monitor(window);
            let mut rows = Vec::new();
            for i in 0..12 {
                let row = [(i * 7 % 5) as f64 * 0.8, if i < 6 { 1.0 } else { 2.0 }];
                monitor
                    .observe(&Array1::from(row.to_vec()), FailureLabel::NotFailed, 0.2, None)
                    .unwrap();
                rows.push(row);
                assert_matches_recomputed(&monitor, &rows, window);
            }
        }
    }

    #[test]
    fn test_report_tracks_labels_without_rescanning() {
        let monitor = monitor(Some(2));
        let x = array![1.5, 1.0];
        let ids: Vec<u64> = (0..50)
            .map(|i| {
                let prediction = if i % 2 == 0 {
                    FailureLabel::Failed
                } else {
                    FailureLabel::NotFailed
                };
                let probability = if i % 2 == 0 { 0.9 } else { 0.1 };
                monitor.observe(&x, prediction, probability, None).unwrap()
            })
            .collect();

        monitor.feedback(ids[0], &json!(1)).unwrap();
        monitor.feedback(ids[1], &json!(0)).unwrap();
        // relabeling replaces the earlier ground truth
        monitor.feedback(ids[1], &json!(1)).unwrap();
        monitor.feedback(ids[49], &json!(0)).unwrap();

        let report = monitor.report();
        assert_eq!(report.observations, 50);
        assert_eq!(report.performance.labeled, 3);
        assert_eq!(report.performance.accuracy, Some(2.0 / 3.0));
        assert_eq!(report.drift.sample_size, 2);
    }

    #[test]
    fn test_compare_batch_does_not_mutate_log() {
        let monitor = monitor(None);
        let batch = array![[0.5, 1.0], [2.5, 1.0]];
        let comparison = monitor.compare_batch(&batch, &[0, 1], &[0.2, 0.9]).unwrap();

        assert_eq!(comparison.rows, 2);
        assert_eq!(comparison.roc_auc, Some(1.0));
        assert!(monitor.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.json");

        let monitor = monitor(None);
        monitor
            .observe(&array![1.0, 1.0], FailureLabel::Failed, 0.6, Some(&json!(1)))
            .unwrap();
        monitor.save(&path).unwrap();

        let restored = ModelMonitor::load(&path, MonitorSettings::default()).unwrap();
        assert_eq!(restored.len(), 1);
        let report = restored.report();
        assert_eq!(report.performance.labeled, 1);
        assert_eq!(report.drift.sample_size, 1);
        assert!(restored.feedback(0, &json!(0)).unwrap());
        assert_eq!(restored.baseline().n_features(), 2);
        assert_eq!(
            restored.observe(&array![1.0, 1.0], FailureLabel::Failed, 0.6, None).unwrap(),
            1
        );
    }
}
