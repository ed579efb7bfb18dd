//! Offline training: split, preprocess, select features, compare candidates,
//! tune, then persist the artifact and the monitor baseline.

use crate::config::Config;
use crate::data::{load_csv, Dataset};
use crate::error::{AppError, Result};
use crate::ml::artifact::{ArtifactMetadata, PersistedArtifact};
use crate::ml::classifier::Classifier;
use crate::ml::evaluation::{roc_auc, EvaluationResult};
use crate::ml::models::ModelKind;
use crate::ml::preprocess::Preprocessor;
use crate::ml::selection::{project, FeatureSelector};
use crate::ml::trainer::{ModelTrainer, TrainTestData};
use crate::ml::tuner::ModelTuner;
use crate::monitoring::{FeatureBaseline, ModelMonitor, MonitorSettings};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// What a training run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub candidate: String,
    pub kind: ModelKind,
    pub hyperparameters: BTreeMap<String, String>,
    pub cv_roc_auc: f64,
    pub test_roc_auc: Option<f64>,
    pub evaluations: BTreeMap<String, EvaluationResult>,
    pub grid_points: usize,
    pub selected_features: Vec<String>,
    pub train_rows: usize,
    pub test_rows: usize,
    pub model_path: Option<PathBuf>,
    pub monitor_path: Option<PathBuf>,
    pub duration_ms: u128,
}

/// In-memory result of [`TrainingPipeline::fit`]
pub struct TrainedModel {
    pub artifact: PersistedArtifact,
    pub monitor: ModelMonitor,
    pub summary: TrainingSummary,
}

pub struct TrainingPipeline;

impl TrainingPipeline {
    /// Load the configured dataset, train, and write both artifacts
    pub fn run(config: &Config) -> Result<TrainingSummary> {
        let data_path = config.training.data_path.as_ref().ok_or_else(|| {
            AppError::Configuration("training.data_path is not set".to_string())
        })?;
        let dataset = load_csv(data_path, &config.training.target_column)?;

        let trained = Self::fit(config, &dataset)?;

        let model_path = config.artifacts.model_path();
        let monitor_path = config.artifacts.monitor_path();
        trained.artifact.save(&model_path)?;
        trained.monitor.save(&monitor_path)?;

        let mut summary = trained.summary;
        summary.model_path = Some(model_path);
        summary.monitor_path = Some(monitor_path);
        Ok(summary)
    }

    /// Train on an already loaded dataset without touching the filesystem
    pub fn fit(config: &Config, dataset: &Dataset) -> Result<TrainedModel> {
        let started = Instant::now();
        let training = &config.training;

        let candidates = training.candidates()?;
        if candidates.is_empty() {
            return Err(AppError::Configuration(
                "At least one model must be configured".to_string(),
            ));
        }
        if dataset.is_empty() {
            return Err(AppError::Validation("Dataset is empty".to_string()));
        }

        let (train, test) = dataset.train_test_split(&training.train_test_split)?;
        info!(train = train.len(), test = test.len(), "Split dataset");

        let preprocessor = Preprocessor::fit(&train, &training.feature_spec())?;
        let x_train_full = preprocessor.transform(&train)?;
        let x_test_full = preprocessor.transform(&test)?;
        let y_train = train.labels();
        let y_test = test.labels();

        let selector = FeatureSelector::new(training.feature_selection.top_n)
            .with_estimators(training.feature_selection.n_estimators)
            .with_seed(training.feature_selection.seed);
        let indices = selector.select(&x_train_full, &y_train)?;
        let selected_features: Vec<String> = indices
            .iter()
            .map(|&i| preprocessor.feature_names()[i].clone())
            .collect();
        info!(features = ?selected_features, "Selected features");

        let x_train = project(&x_train_full, &indices);
        let x_test = project(&x_test_full, &indices);

        let evaluations = ModelTrainer::new(candidates.clone()).evaluate(TrainTestData {
            x_train: &x_train,
            y_train: &y_train,
            x_test: &x_test,
            y_test: &y_test,
        })?;
        if evaluations.is_empty() {
            warn!("No candidate could be evaluated on the held-out split");
        }

        let tuned = ModelTuner::new(training.tuning.cv_folds).tune(&candidates, &x_train, &y_train)?;

        let test_scores = tuned.model.predict_proba(&x_test)?;
        let test_roc_auc = roc_auc(&y_test.to_vec(), &test_scores.to_vec());
        info!(
            candidate = %tuned.candidate,
            cv_roc_auc = tuned.cv_score,
            test_roc_auc = ?test_roc_auc,
            "Tuned model evaluated on held-out split"
        );

        let hyperparameters = tuned.params.describe();
        let metadata = ArtifactMetadata {
            candidate: tuned.candidate.clone(),
            kind: tuned.kind,
            hyperparameters: hyperparameters.clone(),
            cv_roc_auc: tuned.cv_score,
            test_roc_auc,
            feature_names: selected_features.clone(),
            n_training_samples: train.len(),
            trained_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let baseline = FeatureBaseline::capture(&selected_features, &x_train)?;
        let monitor = ModelMonitor::new(baseline, MonitorSettings::from(&config.monitoring));

        let summary = TrainingSummary {
            candidate: tuned.candidate.clone(),
            kind: tuned.kind,
            hyperparameters,
            cv_roc_auc: tuned.cv_score,
            test_roc_auc,
            evaluations,
            grid_points: tuned.evaluations.len(),
            selected_features,
            train_rows: train.len(),
            test_rows: test.len(),
            model_path: None,
            monitor_path: None,
            duration_ms: started.elapsed().as_millis(),
        };

        let artifact = PersistedArtifact::new(preprocessor, indices, tuned.model, metadata)?;

        info!(
            candidate = %summary.candidate,
            duration_ms = summary.duration_ms as u64,
            "✅ Training complete"
        );

        Ok(TrainedModel {
            artifact,
            monitor,
            summary,
        })
    }
}
