use crate::error::{AppError, Result};
use crate::ml::classifier::ForestModel;
use crate::ml::models::ForestParams;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ranks transformed features by random-forest importance and keeps the top N
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelector {
    /// Number of features to keep
    pub top_n: usize,

    /// Parameters of the auxiliary importance forest
    pub forest: ForestParams,
}

impl Default for FeatureSelector {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Result of a selection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRanking {
    /// Importance of every input column, by column index
    pub importances: Vec<f64>,

    /// Selected column indices, most important first
    pub selected: Vec<usize>,
}

impl FeatureSelector {
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n,
            forest: ForestParams::default(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.forest.seed = seed;
        self
    }

    pub fn with_estimators(mut self, n_estimators: usize) -> Self {
        self.forest.n_estimators = n_estimators;
        self
    }

    /// Fit the importance ensemble and rank columns
    pub fn rank(&self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<FeatureRanking> {
        if features.nrows() == 0 || features.ncols() == 0 {
            return Err(AppError::Validation(
                "Feature selection needs a non-empty feature matrix".to_string(),
            ));
        }
        if features.nrows() != labels.len() {
            return Err(AppError::Validation(format!(
                "Feature matrix has {} rows but {} labels were given",
                features.nrows(),
                labels.len()
            )));
        }

        let forest = ForestModel::fit(features, labels, &self.forest)?;
        let importances = forest.feature_importance();

        let mut order: Vec<usize> = (0..importances.len()).collect();
        // stable: equal importances keep ascending column order
        order.sort_by(|&a, &b| importances[b].total_cmp(&importances[a]));
        order.truncate(self.top_n.min(importances.len()));

        debug!(
            columns = importances.len(),
            selected = order.len(),
            "Ranked feature importances"
        );

        Ok(FeatureRanking {
            importances,
            selected: order,
        })
    }

    /// Indices of the top-N columns, most important first
    pub fn select(&self, features: &Array2<f64>, labels: &Array1<usize>) -> Result<Vec<usize>> {
        Ok(self.rank(features, labels)?.selected)
    }
}

/// Keep only `indices` columns, in the given order
pub fn project(features: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    features.select(Axis(1), indices)
}
