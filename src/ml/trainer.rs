use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, FittedModel};
use crate::ml::evaluation::{roc_auc, ClassificationReport, EvaluationResult};
use crate::ml::models::ModelCandidate;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Train/test matrices shared by every candidate
#[derive(Debug, Clone, Copy)]
pub struct TrainTestData<'a> {
    pub x_train: &'a Array2<f64>,
    pub y_train: &'a Array1<usize>,
    pub x_test: &'a Array2<f64>,
    pub y_test: &'a Array1<usize>,
}

/// Fits candidate families and scores them on held-out data
#[derive(Debug, Clone, Default)]
pub struct ModelTrainer {
    candidates: Vec<ModelCandidate>,
}

impl ModelTrainer {
    pub fn new(candidates: Vec<ModelCandidate>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[ModelCandidate] {
        &self.candidates
    }

    /// Evaluate every candidate. Candidates that cannot be fit or scored are
    /// logged and left out of the result.
    pub fn evaluate(&self, data: TrainTestData<'_>) -> Result<BTreeMap<String, EvaluationResult>> {
        if data.x_test.nrows() != data.y_test.len() {
            return Err(AppError::Validation(format!(
                "Test matrix has {} rows but {} labels were given",
                data.x_test.nrows(),
                data.y_test.len()
            )));
        }

        let results: Vec<(String, Result<EvaluationResult>)> = self
            .candidates
            .par_iter()
            .map(|candidate| (candidate.name.clone(), evaluate_candidate(candidate, data)))
            .collect();

        let mut evaluations = BTreeMap::new();
        for (name, result) in results {
            match result {
                Ok(evaluation) => {
                    info!(
                        candidate = %name,
                        kind = %evaluation.kind,
                        roc_auc = evaluation.roc_auc,
                        accuracy = evaluation.report.accuracy,
                        "Candidate evaluated\n{}",
                        evaluation.report
                    );
                    evaluations.insert(name, evaluation);
                }
                Err(e) => warn!(candidate = %name, error = %e, "Candidate excluded"),
            }
        }

        Ok(evaluations)
    }
}

fn evaluate_candidate(
    candidate: &ModelCandidate,
    data: TrainTestData<'_>,
) -> Result<EvaluationResult> {
    let params = candidate.base_params()?;
    let model = FittedModel::fit(&params, data.x_train, data.y_train)?;

    let probabilities = model.predict_proba(data.x_test)?;
    let predictions = model.predict(data.x_test)?;

    let y_true = data.y_test.to_vec();
    let roc_auc = roc_auc(&y_true, &probabilities.to_vec()).ok_or_else(|| {
        AppError::Training("ROC-AUC is undefined: test labels contain one class".to_string())
    })?;

    Ok(EvaluationResult {
        candidate: candidate.name.clone(),
        kind: candidate.kind,
        params,
        report: ClassificationReport::compute(&y_true, &predictions.to_vec()),
        roc_auc,
    })
}

/// Name of the best-scoring evaluation, first name wins ties
pub fn best_candidate(evaluations: &BTreeMap<String, EvaluationResult>) -> Option<&str> {
    let mut best: Option<(&str, f64)> = None;
    for (name, evaluation) in evaluations {
        match best {
            Some((_, score)) if evaluation.roc_auc <= score => {}
            _ => best = Some((name.as_str(), evaluation.roc_auc)),
        }
    }
    best.map(|(name, _)| name)
}
