//! Persisted training output: the fitted preprocessor, selected feature
//! indices and the tuned estimator, written as one JSON document.

use crate::data::{Dataset, FailureLabel, FeatureRow};
use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, FittedModel};
use crate::ml::models::ModelKind;
use crate::ml::preprocess::Preprocessor;
use crate::ml::selection::project;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Descriptive information stored next to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub candidate: String,
    pub kind: ModelKind,
    pub hyperparameters: BTreeMap<String, String>,
    pub cv_roc_auc: f64,

    /// Held-out ROC-AUC of the winning family, when it was evaluated
    pub test_roc_auc: Option<f64>,

    /// Names of the selected transformed features, in model column order
    pub feature_names: Vec<String>,
    pub n_training_samples: usize,
    pub trained_at: DateTime<Utc>,
    pub version: String,
}

/// Outcome of scoring one record
#[derive(Debug, Clone, PartialEq)]
pub struct RowPrediction {
    pub label: FailureLabel,
    pub probability: f64,

    /// Model input after preprocessing and selection
    pub features: Array1<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub preprocessor: Preprocessor,
    pub feature_indices: Vec<usize>,
    pub model: FittedModel,
    pub metadata: ArtifactMetadata,
}

impl PersistedArtifact {
    pub fn new(
        preprocessor: Preprocessor,
        feature_indices: Vec<usize>,
        model: FittedModel,
        metadata: ArtifactMetadata,
    ) -> Result<Self> {
        let width = preprocessor.n_features();
        if let Some(&bad) = feature_indices.iter().find(|&&i| i >= width) {
            return Err(AppError::Internal(format!(
                "Selected feature index {} is outside the {} transformed columns",
                bad, width
            )));
        }
        if model.n_features() != feature_indices.len() {
            return Err(AppError::Internal(format!(
                "Model expects {} features but {} were selected",
                model.n_features(),
                feature_indices.len()
            )));
        }

        Ok(Self {
            preprocessor,
            feature_indices,
            model,
            metadata,
        })
    }

    /// Preprocess and select features for a whole dataset
    pub fn transform(&self, dataset: &Dataset) -> Result<Array2<f64>> {
        let transformed = self.preprocessor.transform(dataset)?;
        Ok(project(&transformed, &self.feature_indices))
    }

    /// Preprocess and select features for a single record
    pub fn transform_row(&self, row: &FeatureRow) -> Result<Array1<f64>> {
        let transformed = self.preprocessor.transform_row(row)?;
        Ok(transformed.select(Axis(0), &self.feature_indices))
    }

    /// Score a single record (transform only, the preprocessor is never refit)
    pub fn predict_row(&self, row: &FeatureRow) -> Result<RowPrediction> {
        let features = self.transform_row(row)?;
        let matrix = features.clone().insert_axis(Axis(0));
        let probability = self.model.predict_proba(&matrix)?[0];
        let label = FailureLabel::from_index(self.model.predict(&matrix)?[0]);

        Ok(RowPrediction {
            label,
            probability,
            features,
        })
    }

    /// Class-1 probabilities for every record of a dataset
    pub fn predict_proba(&self, dataset: &Dataset) -> Result<Array1<f64>> {
        self.model.predict_proba(&self.transform(dataset)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_json(path, self)?;
        info!(
            path = %path.display(),
            candidate = %self.metadata.candidate,
            features = self.feature_indices.len(),
            "Model artifact saved"
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let artifact: Self = read_json(path)?;
        info!(
            path = %path.display(),
            candidate = %artifact.metadata.candidate,
            kind = %artifact.metadata.kind,
            "Model artifact loaded"
        );
        Ok(artifact)
    }
}

/// Serialize `value` as JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| {
        AppError::NotFound(format!("Cannot open {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}
