//! Cross-validated grid search over candidate families.

use crate::error::{AppError, Result};
use crate::ml::classifier::{Classifier, FittedModel};
use crate::ml::evaluation::roc_auc;
use crate::ml::models::{ModelCandidate, ModelKind, ModelParams, ParamSet};
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Score of one grid point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPointScore {
    pub candidate: String,
    pub params: ParamSet,
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
}

/// Best estimator found by [`ModelTuner::tune`], refit on the full training data
#[derive(Debug, Serialize, Deserialize)]
pub struct TunedModel {
    pub candidate: String,
    pub kind: ModelKind,
    pub params: ModelParams,
    pub cv_score: f64,
    pub model: FittedModel,

    /// Every grid point that produced a score, in evaluation order
    pub evaluations: Vec<GridPointScore>,
}

/// Stratified k-fold grid search scored by mean ROC-AUC
#[derive(Debug, Clone)]
pub struct ModelTuner {
    folds: usize,
}

impl Default for ModelTuner {
    fn default() -> Self {
        Self { folds: 5 }
    }
}

struct GridPoint<'a> {
    candidate: &'a ModelCandidate,
    overrides: ParamSet,
}

impl ModelTuner {
    pub fn new(folds: usize) -> Self {
        Self { folds }
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    /// Search every candidate's grid and return the single best estimator.
    ///
    /// Ties on the mean score go to the earlier candidate, then the earlier grid point.
    pub fn tune(
        &self,
        candidates: &[ModelCandidate],
        features: &Array2<f64>,
        labels: &Array1<usize>,
    ) -> Result<TunedModel> {
        if candidates.is_empty() {
            return Err(AppError::Tuning("No candidates to tune".to_string()));
        }
        if features.nrows() != labels.len() {
            return Err(AppError::Tuning(format!(
                "Feature matrix has {} rows but {} labels were given",
                features.nrows(),
                labels.len()
            )));
        }

        let folds = stratified_folds(labels, self.folds)?;

        let mut points = Vec::new();
        for candidate in candidates {
            for overrides in expand_grid(candidate)? {
                points.push(GridPoint {
                    candidate,
                    overrides,
                });
            }
        }

        info!(
            candidates = candidates.len(),
            grid_points = points.len(),
            folds = self.folds,
            "Starting grid search"
        );

        let scored: Vec<Option<GridPointScore>> = points
            .par_iter()
            .map(|point| match score_point(point, features, labels, &folds) {
                Ok(score) => Some(score),
                Err(e) => {
                    warn!(
                        candidate = %point.candidate.name,
                        params = ?point.overrides,
                        error = %e,
                        "Grid point dropped"
                    );
                    None
                }
            })
            .collect();

        let evaluations: Vec<GridPointScore> = scored.into_iter().flatten().collect();

        let best = evaluations
            .iter()
            .fold(None::<&GridPointScore>, |best, point| match best {
                Some(b) if point.mean_score <= b.mean_score => Some(b),
                _ => Some(point),
            })
            .ok_or_else(|| AppError::Tuning("Every grid point failed to fit".to_string()))?;

        let cv_score = best.mean_score;
        let candidate = candidates
            .iter()
            .find(|c| c.name == best.candidate)
            .ok_or_else(|| AppError::Internal(format!("Unknown candidate {}", best.candidate)))?;

        let params = merged_params(candidate, &best.params)?;
        let model = FittedModel::fit(&params, features, labels)?;

        info!(
            candidate = %candidate.name,
            kind = %candidate.kind,
            cv_roc_auc = cv_score,
            params = ?params.describe(),
            "Best estimator selected"
        );

        Ok(TunedModel {
            candidate: candidate.name.clone(),
            kind: candidate.kind,
            params,
            cv_score,
            model,
            evaluations,
        })
    }
}

fn merged_params(candidate: &ModelCandidate, overrides: &ParamSet) -> Result<ModelParams> {
    let mut point = candidate.params.clone();
    point.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    candidate.kind.build_params(&point)
}

fn score_point(
    point: &GridPoint<'_>,
    features: &Array2<f64>,
    labels: &Array1<usize>,
    folds: &[Vec<usize>],
) -> Result<GridPointScore> {
    let params = merged_params(point.candidate, &point.overrides)?;

    let mut fold_scores = Vec::with_capacity(folds.len());
    for (k, validation) in folds.iter().enumerate() {
        let training: Vec<usize> = folds
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != k)
            .flat_map(|(_, fold)| fold.iter().copied())
            .collect();

        let model = FittedModel::fit(
            &params,
            &features.select(Axis(0), &training),
            &labels.select(Axis(0), &training),
        )?;

        let scores = model.predict_proba(&features.select(Axis(0), validation))?;
        let truth: Vec<usize> = validation.iter().map(|&i| labels[i]).collect();
        let auc = roc_auc(&truth, &scores.to_vec()).ok_or_else(|| {
            AppError::Tuning(format!("Fold {} has a single class", k))
        })?;
        fold_scores.push(auc);
    }

    let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
    debug!(
        candidate = %point.candidate.name,
        params = ?point.overrides,
        mean_score,
        "Grid point scored"
    );

    Ok(GridPointScore {
        candidate: point.candidate.name.clone(),
        params: point.overrides.clone(),
        fold_scores,
        mean_score,
    })
}

/// Cartesian product of a candidate's grid, parameter names in lexicographic order.
/// A candidate without a grid, or with a parameter that lists no values, cannot be tuned.
pub fn expand_grid(candidate: &ModelCandidate) -> Result<Vec<ParamSet>> {
    if candidate.grid.is_empty() {
        return Err(AppError::Tuning(format!(
            "Candidate '{}' has an empty parameter grid",
            candidate.name
        )));
    }

    let mut points = vec![ParamSet::new()];
    for (name, values) in &candidate.grid {
        if values.is_empty() {
            return Err(AppError::Tuning(format!(
                "Grid for '{}' has no values for parameter '{}'",
                candidate.name, name
            )));
        }
        points = points
            .into_iter()
            .flat_map(|point| {
                values.iter().map(move |value| {
                    let mut next = point.clone();
                    next.insert(name.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    Ok(points)
}

/// Assign sample indices to `k` folds, dealing each class round-robin so every
/// fold holds both classes.
pub fn stratified_folds(labels: &Array1<usize>, k: usize) -> Result<Vec<Vec<usize>>> {
    if k < 2 {
        return Err(AppError::Tuning(format!(
            "Cross-validation needs at least 2 folds, got {}",
            k
        )));
    }

    let mut folds = vec![Vec::new(); k];
    for class in 0..2 {
        let members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &y)| y == class)
            .map(|(i, _)| i)
            .collect();

        if members.len() < k {
            return Err(AppError::Tuning(format!(
                "Class {} has {} samples, fewer than {} folds",
                class,
                members.len(),
                k
            )));
        }

        for (position, index) in members.into_iter().enumerate() {
            folds[position % k].push(index);
        }
    }

    for fold in &mut folds {
        fold.sort_unstable();
    }
    Ok(folds)
}
