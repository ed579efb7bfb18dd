use crate::error::{AppError, Result};
use crate::ml::models::{
    BoostingParams, ForestParams, LogisticParams, ModelKind, ModelParams, NaiveBayesParams,
    SvmKernel, SvmParams, TreeParams,
};
use linfa::composing::platt_scaling::{platt_newton_method, platt_predict};
use linfa::traits::{Fit, Predict};
use linfa::{Dataset as LinfaDataset, ParamGuard, Platt};
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use linfa_svm::Svm;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample as sample_indices;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::naive_bayes::gaussian::{GaussianNB, GaussianNBParameters};
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use std::fmt;

/// Trait for fitted binary classifiers
pub trait Classifier: Send + Sync {
    /// Probability of class 1 ("Failed") for every row
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>>;

    /// Hard labels; class 1 when its probability is at least 0.5
    fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        Ok(self
            .predict_proba(features)?
            .mapv(|p| if p >= 0.5 { 1 } else { 0 }))
    }

    /// Number of input columns the model was fitted on
    fn n_features(&self) -> usize;

    fn kind(&self) -> ModelKind;
}

fn check_width(expected: usize, features: &Array2<f64>) -> Result<()> {
    if features.ncols() != expected {
        return Err(AppError::Prediction(format!(
            "Model expects {} features, got {}",
            expected,
            features.ncols()
        )));
    }
    Ok(())
}

fn check_training_data(features: &Array2<f64>, labels: &Array1<usize>) -> Result<()> {
    if features.nrows() == 0 || features.ncols() == 0 {
        return Err(AppError::Training("Training matrix is empty".to_string()));
    }
    if features.nrows() != labels.len() {
        return Err(AppError::Training(format!(
            "{} rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    let positives = labels.iter().filter(|&&y| y == 1).count();
    if positives == 0 || positives == labels.len() {
        return Err(AppError::Training(
            "Training labels must contain both classes".to_string(),
        ));
    }
    Ok(())
}

/// Logistic regression backed by linfa-logistic
#[derive(Serialize, Deserialize)]
pub struct LogisticModel {
    model: FittedLogisticRegression<f64, usize>,
    n_features: usize,
}

impl LogisticModel {
    pub fn fit(
        features: &Array2<f64>,
        labels: &Array1<usize>,
        params: &LogisticParams,
    ) -> Result<Self> {
        let dataset = LinfaDataset::new(features.clone(), labels.clone());
        let model = LogisticRegression::default()
            .alpha(params.alpha)
            .max_iterations(params.max_iterations)
            .fit(&dataset)
            .map_err(|e| {
                AppError::Training(format!("Failed to train logistic regression: {}", e))
            })?;

        Ok(Self {
            model,
            n_features: features.ncols(),
        })
    }
}

impl Classifier for LogisticModel {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(self.n_features, features)?;
        // probabilities refer to the larger label, which is class 1
        Ok(self.model.predict_probabilities(features))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> ModelKind {
        ModelKind::LogisticRegression
    }
}

fn fit_tree(
    features: Array2<f64>,
    labels: Array1<usize>,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
) -> Result<DecisionTree<f64, usize>> {
    let dataset = LinfaDataset::new(features, labels);
    DecisionTree::params()
        .split_quality(SplitQuality::Gini)
        .max_depth(max_depth)
        .min_weight_split(min_samples_split as f32)
        .min_weight_leaf(min_samples_leaf as f32)
        .fit(&dataset)
        .map_err(|e| AppError::Training(format!("Failed to train decision tree: {}", e)))
}

/// Impurity-decrease importances with NaN (stump trees) mapped to zero
fn tree_importance(tree: &DecisionTree<f64, usize>) -> Vec<f64> {
    tree.feature_importance()
        .into_iter()
        .map(|v| if v.is_finite() { v } else { 0.0 })
        .collect()
}

/// Single CART tree backed by linfa-trees
#[derive(Serialize, Deserialize)]
pub struct TreeModel {
    tree: DecisionTree<f64, usize>,
    n_features: usize,
}

impl TreeModel {
    pub fn fit(
        features: &Array2<f64>,
        labels: &Array1<usize>,
        params: &TreeParams,
    ) -> Result<Self> {
        let tree = fit_tree(
            features.clone(),
            labels.clone(),
            params.max_depth,
            params.min_samples_split,
            params.min_samples_leaf,
        )?;
        Ok(Self {
            tree,
            n_features: features.ncols(),
        })
    }

    pub fn feature_importance(&self) -> Vec<f64> {
        tree_importance(&self.tree)
    }
}

impl Classifier for TreeModel {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(self.n_features, features)?;
        let labels: Array1<usize> = self.tree.predict(features);
        Ok(labels.mapv(|l| l as f64))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> ModelKind {
        ModelKind::DecisionTree
    }
}

#[derive(Serialize, Deserialize)]
struct ForestMember {
    /// Column subset this tree was trained on, ascending
    columns: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

/// Bootstrap-aggregated CART trees with per-tree column subsampling
#[derive(Serialize, Deserialize)]
pub struct ForestModel {
    members: Vec<ForestMember>,
    n_features: usize,
}

impl ForestModel {
    pub fn fit(
        features: &Array2<f64>,
        labels: &Array1<usize>,
        params: &ForestParams,
    ) -> Result<Self> {
        check_training_data(features, labels)?;
        let n_rows = features.nrows();
        let n_cols = features.ncols();
        let n_selected = ((params.max_features * n_cols as f64).round() as usize).clamp(1, n_cols);

        // Draw every bootstrap up front so the result does not depend on thread scheduling
        let mut rng = StdRng::seed_from_u64(params.seed);
        let plans: Vec<(Vec<usize>, Vec<usize>)> = (0..params.n_estimators)
            .map(|_| {
                let rows: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                let mut columns = sample_indices(&mut rng, n_cols, n_selected).into_vec();
                columns.sort_unstable();
                (rows, columns)
            })
            .collect();

        let members = plans
            .into_par_iter()
            .map(|(rows, columns)| -> Result<ForestMember> {
                let x = features.select(Axis(0), &rows).select(Axis(1), &columns);
                let y = labels.select(Axis(0), &rows);
                let tree = fit_tree(x, y, params.max_depth, params.min_samples_split, 1)?;
                Ok(ForestMember { columns, tree })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            members,
            n_features: n_cols,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.members.len()
    }

    /// Mean impurity decrease across trees, normalized to sum to 1
    pub fn feature_importance(&self) -> Vec<f64> {
        let mut importance = vec![0.0; self.n_features];
        for member in &self.members {
            for (&column, value) in member.columns.iter().zip(tree_importance(&member.tree)) {
                importance[column] += value;
            }
        }

        let total: f64 = importance.iter().sum();
        if total > 0.0 {
            importance.iter_mut().for_each(|v| *v /= total);
        }
        importance
    }
}

impl Classifier for ForestModel {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(self.n_features, features)?;

        let mut votes = Array1::<f64>::zeros(features.nrows());
        for member in &self.members {
            let subset = features.select(Axis(1), &member.columns);
            let labels: Array1<usize> = member.tree.predict(&subset);
            votes.zip_mut_with(&labels, |v, &l| *v += l as f64);
        }
        Ok(votes / self.members.len().max(1) as f64)
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }
}

/// Gaussian naive Bayes backed by smartcore
#[derive(Serialize, Deserialize)]
pub struct NaiveBayesModel {
    model: GaussianNB<f64, usize, DenseMatrix<f64>, Vec<usize>>,
    n_features: usize,
}

fn ndarray_to_densematrix(arr: &Array2<f64>) -> DenseMatrix<f64> {
    let data: Vec<f64> = arr.iter().copied().collect();
    DenseMatrix::new(arr.nrows(), arr.ncols(), data, false)
}

impl NaiveBayesModel {
    pub fn fit(
        features: &Array2<f64>,
        labels: &Array1<usize>,
        params: &NaiveBayesParams,
    ) -> Result<Self> {
        let x = ndarray_to_densematrix(features);
        let y = labels.to_vec();

        // smartcore orders priors by sorted class label: [not failed, failed]
        let parameters = GaussianNBParameters {
            priors: params.prior_failure.map(|p| vec![1.0 - p, p]),
        };
        let model = GaussianNB::fit(&x, &y, parameters)
            .map_err(|e| AppError::Training(format!("Failed to train Naive Bayes: {}", e)))?;

        Ok(Self {
            model,
            n_features: features.ncols(),
        })
    }
}

impl Classifier for NaiveBayesModel {
    /// smartcore exposes hard labels only, so the probability is 0 or 1
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(self.n_features, features)?;
        let x = ndarray_to_densematrix(features);
        let predictions = self
            .model
            .predict(&x)
            .map_err(|e| AppError::Prediction(format!("Prediction failed: {}", e)))?;

        Ok(predictions.into_iter().map(|l| l as f64).collect())
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> ModelKind {
        ModelKind::NaiveBayes
    }
}

/// Support vector machine backed by linfa-svm, calibrated with Platt scaling
/// on its training decision values
#[derive(Serialize, Deserialize)]
pub struct SvmModel {
    svm: Svm<f64, bool>,
    /// Sigmoid `1 / (1 + exp(a * f(x) + b))` over the decision value `f(x)`
    platt_a: f64,
    platt_b: f64,
    n_features: usize,
}

impl SvmModel {
    pub fn fit(features: &Array2<f64>, labels: &Array1<usize>, params: &SvmParams) -> Result<Self> {
        let targets = labels.mapv(|y| y == 1);
        let dataset = LinfaDataset::new(features.clone(), targets.clone());

        let svm_params = Svm::<f64, bool>::params().pos_neg_weights(params.c, params.c);
        let svm_params = match params.kernel {
            SvmKernel::Linear => svm_params.linear_kernel(),
            SvmKernel::Gaussian => svm_params.gaussian_kernel(params.gaussian_eps),
        };
        let svm = svm_params
            .fit(&dataset)
            .map_err(|e| AppError::Training(format!("Failed to train SVM: {}", e)))?;

        let decisions = decision_values(&svm, features);
        let platt = Platt::<f64, ()>::params()
            .check()
            .map_err(|e| AppError::Training(format!("Invalid Platt parameters: {}", e)))?;
        let (platt_a, platt_b) = platt_newton_method(decisions.view(), targets.view(), &platt)
            .map_err(|e| AppError::Training(format!("Platt scaling failed: {}", e)))?;

        Ok(Self {
            svm,
            platt_a,
            platt_b,
            n_features: features.ncols(),
        })
    }
}

/// Signed distance to the separating hyperplane, positive on the failure side
fn decision_values(svm: &Svm<f64, bool>, features: &Array2<f64>) -> Array1<f64> {
    features
        .rows()
        .into_iter()
        .map(|row| svm.weighted_sum(&row) - svm.rho)
        .collect()
}

impl Classifier for SvmModel {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(self.n_features, features)?;
        Ok(decision_values(&self.svm, features)
            .mapv(|f| f64::from(*platt_predict(f, self.platt_a, self.platt_b))))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> ModelKind {
        ModelKind::Svm
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Log-loss gradient boosting: each stage is a smartcore regression tree fit
/// to the residuals `y - p` of the current ensemble
#[derive(Serialize, Deserialize)]
pub struct BoostingModel {
    /// Log-odds of failure in the training labels
    initial: f64,
    learning_rate: f64,
    stages: Vec<DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>>,
    n_features: usize,
}

impl BoostingModel {
    pub fn fit(
        features: &Array2<f64>,
        labels: &Array1<usize>,
        params: &BoostingParams,
    ) -> Result<Self> {
        check_training_data(features, labels)?;
        let x = ndarray_to_densematrix(features);
        let y = labels.mapv(|l| l as f64);

        let positive_rate = y.mean().unwrap_or(0.5);
        let initial = (positive_rate / (1.0 - positive_rate)).ln();
        let tree_params = DecisionTreeRegressorParameters::default()
            .with_max_depth(params.max_depth as u16)
            .with_min_samples_leaf(params.min_samples_leaf);

        let mut scores = Array1::from_elem(features.nrows(), initial);
        let mut stages = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            let residuals: Vec<f64> = y
                .iter()
                .zip(scores.iter())
                .map(|(&target, &score)| target - sigmoid(score))
                .collect();

            let tree = DecisionTreeRegressor::fit(&x, &residuals, tree_params.clone())
                .map_err(|e| AppError::Training(format!("Failed to train boosting stage: {}", e)))?;
            let update = tree
                .predict(&x)
                .map_err(|e| AppError::Training(format!("Boosting stage failed: {}", e)))?;

            scores
                .iter_mut()
                .zip(update)
                .for_each(|(score, step)| *score += params.learning_rate * step);
            stages.push(tree);
        }

        Ok(Self {
            initial,
            learning_rate: params.learning_rate,
            stages,
            n_features: features.ncols(),
        })
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }
}

impl Classifier for BoostingModel {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(self.n_features, features)?;
        let x = ndarray_to_densematrix(features);

        let mut scores = Array1::from_elem(features.nrows(), self.initial);
        for stage in &self.stages {
            let update = stage
                .predict(&x)
                .map_err(|e| AppError::Prediction(format!("Prediction failed: {}", e)))?;
            scores
                .iter_mut()
                .zip(update)
                .for_each(|(score, step)| *score += self.learning_rate * step);
        }
        Ok(scores.mapv(sigmoid))
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosting
    }
}

/// A fitted estimator of any supported family
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum FittedModel {
    LogisticRegression(LogisticModel),
    DecisionTree(TreeModel),
    RandomForest(ForestModel),
    NaiveBayes(NaiveBayesModel),
    Svm(SvmModel),
    GradientBoosting(BoostingModel),
}

impl FittedModel {
    /// Fit the family described by `params` on the given matrix
    pub fn fit(
        params: &ModelParams,
        features: &Array2<f64>,
        labels: &Array1<usize>,
    ) -> Result<Self> {
        check_training_data(features, labels)?;

        Ok(match params {
            ModelParams::LogisticRegression(p) => {
                FittedModel::LogisticRegression(LogisticModel::fit(features, labels, p)?)
            }
            ModelParams::DecisionTree(p) => {
                FittedModel::DecisionTree(TreeModel::fit(features, labels, p)?)
            }
            ModelParams::RandomForest(p) => {
                FittedModel::RandomForest(ForestModel::fit(features, labels, p)?)
            }
            ModelParams::NaiveBayes(p) => {
                FittedModel::NaiveBayes(NaiveBayesModel::fit(features, labels, p)?)
            }
            ModelParams::Svm(p) => FittedModel::Svm(SvmModel::fit(features, labels, p)?),
            ModelParams::GradientBoosting(p) => {
                FittedModel::GradientBoosting(BoostingModel::fit(features, labels, p)?)
            }
        })
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            FittedModel::LogisticRegression(m) => m,
            FittedModel::DecisionTree(m) => m,
            FittedModel::RandomForest(m) => m,
            FittedModel::NaiveBayes(m) => m,
            FittedModel::Svm(m) => m,
            FittedModel::GradientBoosting(m) => m,
        }
    }

    /// Per-feature importance for tree families, `None` otherwise
    pub fn feature_importance(&self) -> Option<Vec<f64>> {
        match self {
            FittedModel::DecisionTree(m) => Some(m.feature_importance()),
            FittedModel::RandomForest(m) => Some(m.feature_importance()),
            _ => None,
        }
    }
}

impl Classifier for FittedModel {
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner().predict_proba(features)
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Array1<usize>> {
        self.inner().predict(features)
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn kind(&self) -> ModelKind {
        self.inner().kind()
    }
}

impl fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittedModel")
            .field("kind", &self.kind())
            .field("n_features", &self.n_features())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// Two well separated clusters, class 1 at high values of column 0
    fn separable() -> (Array2<f64>, Array1<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            let jitter = (i % 5) as f64 * 0.1;
            rows.extend_from_slice(&[-2.0 - jitter, 0.3 * jitter]);
            labels.push(0);
            rows.extend_from_slice(&[2.0 + jitter, 0.3 * jitter]);
            labels.push(1);
        }
        (
            Array2::from_shape_vec((40, 2), rows).unwrap(),
            Array1::from(labels),
        )
    }

    fn forest_params() -> ForestParams {
        ForestParams {
            n_estimators: 10,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_every_kind_learns_separable_data() {
        let (x, y) = separable();
        for kind in ModelKind::ALL {
            let model = FittedModel::fit(&kind.default_params(), &x, &y).unwrap();
            let predictions = model.predict(&x).unwrap();
            assert_eq!(predictions, y, "{} misclassified training data", kind);
            assert_eq!(model.kind(), kind);
        }
    }

    #[test]
    fn test_probabilities_are_in_unit_interval() {
        let (x, y) = separable();
        let model =
            FittedModel::fit(&ModelParams::RandomForest(forest_params()), &x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();

        assert_eq!(proba.len(), 40);
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_logistic_probability_orientation() {
        let (x, y) = separable();
        let model = FittedModel::fit(&ModelKind::LogisticRegression.default_params(), &x, &y)
            .unwrap();
        let proba = model.predict_proba(&array![[3.0, 0.0], [-3.0, 0.0]]).unwrap();

        assert!(proba[0] > 0.5);
        assert!(proba[1] < 0.5);
    }

    #[test]
    fn test_svm_probabilities_are_calibrated() {
        let (x, y) = separable();
        for kernel in [SvmKernel::Linear, SvmKernel::Gaussian] {
            let params = SvmParams {
                kernel,
                ..SvmParams::default()
            };
            let model = SvmModel::fit(&x, &y, &params).unwrap();
            let proba = model.predict_proba(&array![[3.0, 0.0], [0.1, 0.0], [-3.0, 0.0]]).unwrap();

            // graded, not hard 0/1 votes
            assert!(proba[0] > 0.5 && proba[0] < 1.0, "{:?}", proba);
            assert!(proba[2] < 0.5 && proba[2] > 0.0, "{:?}", proba);
            assert!(proba[0] > proba[1] && proba[1] > proba[2], "{:?}", proba);
        }
    }

    #[test]
    fn test_boosting_stages_and_orientation() {
        let (x, y) = separable();
        let params = BoostingParams {
            n_estimators: 20,
            ..BoostingParams::default()
        };
        let model = BoostingModel::fit(&x, &y, &params).unwrap();
        let proba = model.predict_proba(&array![[3.0, 0.0], [-3.0, 0.0]]).unwrap();

        assert_eq!(model.n_stages(), 20);
        assert!(proba[0] > 0.5);
        assert!(proba[1] < 0.5);
    }

    #[test]
    fn test_naive_bayes_accepts_explicit_prior() {
        let (x, y) = separable();
        let params = NaiveBayesParams {
            prior_failure: Some(0.5),
        };
        let model = NaiveBayesModel::fit(&x, &y, &params).unwrap();
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_single_class_fails_to_fit() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![0usize, 0, 0];
        let err = FittedModel::fit(&ModelKind::DecisionTree.default_params(), &x, &y).unwrap_err();
        assert!(matches!(err, AppError::Training(_)));
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let (x, y) = separable();
        let model = FittedModel::fit(&ModelKind::NaiveBayes.default_params(), &x, &y).unwrap();
        let err = model.predict(&array![[1.0, 2.0, 3.0]]).unwrap_err();
        assert!(matches!(err, AppError::Prediction(_)));
    }

    #[test]
    fn test_forest_importance_prefers_informative_column() {
        let (x, y) = separable();
        let model = ForestModel::fit(&x, &y, &forest_params()).unwrap();
        let importance = model.feature_importance();

        assert_eq!(model.n_trees(), 10);
        assert_eq!(importance.len(), 2);
        assert!(importance[0] > importance[1]);
        assert!((importance.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_forest_is_deterministic_for_seed() {
        let (x, y) = separable();
        let a = ForestModel::fit(&x, &y, &forest_params()).unwrap();
        let b = ForestModel::fit(&x, &y, &forest_params()).unwrap();

        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_fitted_model_roundtrips_through_json() {
        let (x, y) = separable();
        for kind in [
            ModelKind::LogisticRegression,
            ModelKind::Svm,
            ModelKind::GradientBoosting,
        ] {
            let model = FittedModel::fit(&kind.default_params(), &x, &y).unwrap();

            let bytes = serde_json::to_vec(&model).unwrap();
            let restored: FittedModel = serde_json::from_slice(&bytes).unwrap();

            assert_eq!(restored.kind(), kind);
            let before = model.predict_proba(&x).unwrap();
            let after = restored.predict_proba(&x).unwrap();
            for (a, b) in before.iter().zip(after.iter()) {
                assert!((a - b).abs() < 1e-6, "{} changed after reload", kind);
            }
        }
    }
}
