use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Supported classifier families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Logistic regression (linfa-logistic)
    LogisticRegression,

    /// Single CART tree (linfa-trees)
    DecisionTree,

    /// Bagged CART trees with per-tree feature subsampling
    RandomForest,

    /// Gaussian naive Bayes (smartcore)
    NaiveBayes,

    /// Kernel support vector machine (linfa-svm) with Platt-calibrated probabilities
    Svm,

    /// Log-loss gradient boosting over smartcore regression trees
    GradientBoosting,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::LogisticRegression,
        ModelKind::DecisionTree,
        ModelKind::RandomForest,
        ModelKind::NaiveBayes,
        ModelKind::Svm,
        ModelKind::GradientBoosting,
    ];

    /// Configuration name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "logistic_regression",
            ModelKind::DecisionTree => "decision_tree",
            ModelKind::RandomForest => "random_forest",
            ModelKind::NaiveBayes => "naive_bayes",
            ModelKind::Svm => "svm",
            ModelKind::GradientBoosting => "gradient_boosting",
        }
    }

    /// Tunable parameter names accepted for this kind
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            ModelKind::LogisticRegression => &["alpha", "max_iterations"],
            ModelKind::DecisionTree => &["max_depth", "min_samples_split", "min_samples_leaf"],
            ModelKind::RandomForest => &[
                "n_estimators",
                "max_depth",
                "max_features",
                "min_samples_split",
                "seed",
            ],
            ModelKind::NaiveBayes => &["prior_failure"],
            ModelKind::Svm => &["c", "kernel", "gaussian_eps"],
            ModelKind::GradientBoosting => &[
                "n_estimators",
                "learning_rate",
                "max_depth",
                "min_samples_leaf",
            ],
        }
    }

    pub fn default_params(&self) -> ModelParams {
        match self {
            ModelKind::LogisticRegression => {
                ModelParams::LogisticRegression(LogisticParams::default())
            }
            ModelKind::DecisionTree => ModelParams::DecisionTree(TreeParams::default()),
            ModelKind::RandomForest => ModelParams::RandomForest(ForestParams::default()),
            ModelKind::NaiveBayes => ModelParams::NaiveBayes(NaiveBayesParams::default()),
            ModelKind::Svm => ModelParams::Svm(SvmParams::default()),
            ModelKind::GradientBoosting => {
                ModelParams::GradientBoosting(BoostingParams::default())
            }
        }
    }

    /// Build typed parameters from defaults overridden by `overrides`
    pub fn build_params(&self, overrides: &ParamSet) -> Result<ModelParams> {
        let mut params = self.default_params();
        for (name, value) in overrides {
            params.set(name, value)?;
        }
        params.validate()?;
        Ok(params)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::LogisticRegression => write!(f, "Logistic Regression"),
            ModelKind::DecisionTree => write!(f, "Decision Tree"),
            ModelKind::RandomForest => write!(f, "Random Forest"),
            ModelKind::NaiveBayes => write!(f, "Naive Bayes"),
            ModelKind::Svm => write!(f, "SVM"),
            ModelKind::GradientBoosting => write!(f, "Gradient Boosting"),
        }
    }
}

impl std::str::FromStr for ModelKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::Configuration(format!("Unknown model kind '{}'", s)))
    }
}

/// Raw hyperparameter value from a configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl ParamValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            ParamValue::Float(v) if *v >= 0.0 && v.fract() == 0.0 => Some(*v as usize),
            _ => None,
        }
    }

    /// `null`, `"none"` and `0` mean "unlimited" for depth limits
    fn as_optional_usize(&self) -> Option<Option<usize>> {
        match self {
            ParamValue::Null => Some(None),
            ParamValue::Text(s) if s.eq_ignore_ascii_case("none") => Some(None),
            other => other
                .as_usize()
                .map(|v| if v == 0 { None } else { Some(v) }),
        }
    }

    /// `null` and `"none"` mean "estimate from the data"
    fn as_optional_f64(&self) -> Option<Option<f64>> {
        match self {
            ParamValue::Null => Some(None),
            ParamValue::Text(s) if s.eq_ignore_ascii_case("none") => Some(None),
            other => other.as_f64().map(Some),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
            ParamValue::Null => write!(f, "null"),
        }
    }
}

/// Concrete parameter assignment (one grid point)
pub type ParamSet = BTreeMap<String, ParamValue>;

/// Parameter name -> candidate values
pub type ParamGrid = BTreeMap<String, Vec<ParamValue>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// L2 penalty
    pub alpha: f64,
    pub max_iterations: u64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    /// Fraction of columns given to each tree
    pub max_features: f64,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: None,
            max_features: 1.0,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NaiveBayesParams {
    /// Prior probability of failure; `None` uses the class frequencies
    pub prior_failure: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvmKernel {
    Linear,
    Gaussian,
}

impl SvmKernel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SvmKernel::Linear => "linear",
            SvmKernel::Gaussian => "gaussian",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    /// Penalty on margin violations, applied to both classes
    pub c: f64,
    pub kernel: SvmKernel,
    /// Width of the gaussian kernel, `exp(-|x - y|^2 / eps)`
    pub gaussian_eps: f64,
}

impl Default for SvmParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: SvmKernel::Gaussian,
            gaussian_eps: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    /// Shrinkage applied to every stage
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
        }
    }
}

/// Typed hyperparameters, one variant per [`ModelKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParams {
    LogisticRegression(LogisticParams),
    DecisionTree(TreeParams),
    RandomForest(ForestParams),
    NaiveBayes(NaiveBayesParams),
    Svm(SvmParams),
    GradientBoosting(BoostingParams),
}

impl ModelParams {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelParams::LogisticRegression(_) => ModelKind::LogisticRegression,
            ModelParams::DecisionTree(_) => ModelKind::DecisionTree,
            ModelParams::RandomForest(_) => ModelKind::RandomForest,
            ModelParams::NaiveBayes(_) => ModelKind::NaiveBayes,
            ModelParams::Svm(_) => ModelKind::Svm,
            ModelParams::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    fn set(&mut self, name: &str, value: &ParamValue) -> Result<()> {
        let kind = self.kind();
        let invalid = || {
            AppError::Configuration(format!(
                "Invalid value '{}' for parameter '{}' of {}",
                value,
                name,
                kind.as_str()
            ))
        };

        match (self, name) {
            (ModelParams::LogisticRegression(p), "alpha") => {
                p.alpha = value.as_f64().ok_or_else(invalid)?
            }
            (ModelParams::LogisticRegression(p), "max_iterations") => {
                p.max_iterations = value.as_usize().ok_or_else(invalid)? as u64
            }
            (ModelParams::DecisionTree(p), "max_depth") => {
                p.max_depth = value.as_optional_usize().ok_or_else(invalid)?
            }
            (ModelParams::DecisionTree(p), "min_samples_split") => {
                p.min_samples_split = value.as_usize().ok_or_else(invalid)?
            }
            (ModelParams::DecisionTree(p), "min_samples_leaf") => {
                p.min_samples_leaf = value.as_usize().ok_or_else(invalid)?
            }
            (ModelParams::RandomForest(p), "n_estimators") => {
                p.n_estimators = value.as_usize().ok_or_else(invalid)?
            }
            (ModelParams::RandomForest(p), "max_depth") => {
                p.max_depth = value.as_optional_usize().ok_or_else(invalid)?
            }
            (ModelParams::RandomForest(p), "max_features") => {
                p.max_features = value.as_f64().ok_or_else(invalid)?
            }
            (ModelParams::RandomForest(p), "min_samples_split") => {
                p.min_samples_split = value.as_usize().ok_or_else(invalid)?
            }
            (ModelParams::RandomForest(p), "seed") => {
                p.seed = value.as_usize().ok_or_else(invalid)? as u64
            }
            (ModelParams::NaiveBayes(p), "prior_failure") => {
                p.prior_failure = value.as_optional_f64().ok_or_else(invalid)?
            }
            (ModelParams::Svm(p), "c") => p.c = value.as_f64().ok_or_else(invalid)?,
            (ModelParams::Svm(p), "kernel") => {
                p.kernel = match value {
                    ParamValue::Text(s) if s.eq_ignore_ascii_case("linear") => SvmKernel::Linear,
                    ParamValue::Text(s) if s.eq_ignore_ascii_case("gaussian") => {
                        SvmKernel::Gaussian
                    }
                    _ => return Err(invalid()),
                }
            }
            (ModelParams::Svm(p), "gaussian_eps") => {
                p.gaussian_eps = value.as_f64().ok_or_else(invalid)?
            }
            (ModelParams::GradientBoosting(p), "n_estimators") => {
                p.n_estimators = value.as_usize().ok_or_else(invalid)?
            }
            (ModelParams::GradientBoosting(p), "learning_rate") => {
                p.learning_rate = value.as_f64().ok_or_else(invalid)?
            }
            (ModelParams::GradientBoosting(p), "max_depth") => {
                p.max_depth = value.as_usize().ok_or_else(invalid)?
            }
            (ModelParams::GradientBoosting(p), "min_samples_leaf") => {
                p.min_samples_leaf = value.as_usize().ok_or_else(invalid)?
            }
            _ => {
                return Err(AppError::Configuration(format!(
                    "Unknown parameter '{}' for {} (accepted: {:?})",
                    name,
                    kind.as_str(),
                    kind.parameter_names()
                )))
            }
        }
        Ok(())
    }

    /// Range checks
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(AppError::Configuration(format!("{}: {}", self.kind().as_str(), msg)));
        match self {
            ModelParams::LogisticRegression(p) => {
                if !(p.alpha >= 0.0 && p.alpha.is_finite()) {
                    return fail("alpha must be a finite value >= 0");
                }
                if p.max_iterations == 0 {
                    return fail("max_iterations must be >= 1");
                }
            }
            ModelParams::DecisionTree(p) => {
                if p.min_samples_split < 2 {
                    return fail("min_samples_split must be >= 2");
                }
                if p.min_samples_leaf < 1 {
                    return fail("min_samples_leaf must be >= 1");
                }
            }
            ModelParams::RandomForest(p) => {
                if p.n_estimators == 0 {
                    return fail("n_estimators must be >= 1");
                }
                if !(p.max_features > 0.0 && p.max_features <= 1.0) {
                    return fail("max_features must be in (0, 1]");
                }
                if p.min_samples_split < 2 {
                    return fail("min_samples_split must be >= 2");
                }
            }
            ModelParams::NaiveBayes(p) => {
                if let Some(prior) = p.prior_failure {
                    if !(prior > 0.0 && prior < 1.0) {
                        return fail("prior_failure must be in (0, 1)");
                    }
                }
            }
            ModelParams::Svm(p) => {
                if !(p.c > 0.0 && p.c.is_finite()) {
                    return fail("c must be a finite value > 0");
                }
                if !(p.gaussian_eps > 0.0 && p.gaussian_eps.is_finite()) {
                    return fail("gaussian_eps must be a finite value > 0");
                }
            }
            ModelParams::GradientBoosting(p) => {
                if p.n_estimators == 0 {
                    return fail("n_estimators must be >= 1");
                }
                if !(p.learning_rate > 0.0 && p.learning_rate <= 1.0) {
                    return fail("learning_rate must be in (0, 1]");
                }
                if p.max_depth == 0 || p.max_depth > u16::MAX as usize {
                    return fail("max_depth must be in [1, 65535]");
                }
                if p.min_samples_leaf < 1 {
                    return fail("min_samples_leaf must be >= 1");
                }
            }
        }
        Ok(())
    }

    /// Flat, human-readable view for logs and artifact metadata
    pub fn describe(&self) -> BTreeMap<String, String> {
        let depth = |d: &Option<usize>| d.map_or_else(|| "none".to_string(), |v| v.to_string());
        let pairs: Vec<(&str, String)> = match self {
            ModelParams::LogisticRegression(p) => vec![
                ("alpha", p.alpha.to_string()),
                ("max_iterations", p.max_iterations.to_string()),
            ],
            ModelParams::DecisionTree(p) => vec![
                ("max_depth", depth(&p.max_depth)),
                ("min_samples_split", p.min_samples_split.to_string()),
                ("min_samples_leaf", p.min_samples_leaf.to_string()),
            ],
            ModelParams::RandomForest(p) => vec![
                ("n_estimators", p.n_estimators.to_string()),
                ("max_depth", depth(&p.max_depth)),
                ("max_features", p.max_features.to_string()),
                ("min_samples_split", p.min_samples_split.to_string()),
                ("seed", p.seed.to_string()),
            ],
            ModelParams::NaiveBayes(p) => vec![(
                "prior_failure",
                p.prior_failure
                    .map_or_else(|| "none".to_string(), |v| v.to_string()),
            )],
            ModelParams::Svm(p) => vec![
                ("c", p.c.to_string()),
                ("kernel", p.kernel.as_str().to_string()),
                ("gaussian_eps", p.gaussian_eps.to_string()),
            ],
            ModelParams::GradientBoosting(p) => vec![
                ("n_estimators", p.n_estimators.to_string()),
                ("learning_rate", p.learning_rate.to_string()),
                ("max_depth", p.max_depth.to_string()),
                ("min_samples_leaf", p.min_samples_leaf.to_string()),
            ],
        };
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

/// A named classifier configuration: family, base parameters and search grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub name: String,
    pub kind: ModelKind,

    /// Constructor parameters; grid values override these during tuning
    #[serde(default)]
    pub params: ParamSet,

    #[serde(default)]
    pub grid: ParamGrid,
}

impl ModelCandidate {
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: ParamSet::new(),
            grid: ParamGrid::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_grid(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        self.grid.insert(name.into(), values);
        self
    }

    /// Typed constructor parameters (no grid applied)
    pub fn base_params(&self) -> Result<ModelParams> {
        self.kind.build_params(&self.params)
    }

    /// Check that base parameters and every grid value are accepted by the kind
    pub fn validate(&self) -> Result<()> {
        self.base_params()?;
        for (name, values) in &self.grid {
            for value in values {
                let mut point = self.params.clone();
                point.insert(name.clone(), value.clone());
                self.kind.build_params(&point)?;
            }
        }
        Ok(())
    }
}
