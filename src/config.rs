use crate::data::SplitOptions;
use crate::error::{AppError, Result};
use crate::ml::models::{ModelCandidate, ModelKind, ParamGrid, ParamSet};
use crate::ml::preprocess::FeatureSpec;
use crate::monitoring::{DriftMethod, MonitorSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Training pipeline configuration
    pub training: TrainingConfig,

    /// Artifact locations
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Serving-time monitoring
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Config {
    /// Load configuration: embedded defaults, then an optional file, then
    /// `PDM__SECTION__KEY` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            include_str!("../config/default.toml"),
            config::FileFormat::Toml,
        ));

        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("PDM_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = path {
            if !path.exists() {
                return Err(AppError::Configuration(format!(
                    "Configuration file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("PDM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document from a string on top of the embedded defaults
    pub fn from_document(document: &str, format: config::FileFormat) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::from_str(document, format))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent training and monitoring settings
    pub fn validate(&self) -> Result<()> {
        self.training
            .feature_spec()
            .validate()
            .map_err(|e| AppError::Configuration(e.to_string()))?;

        for candidate in &self.training.candidates()? {
            candidate.validate()?;
        }

        for name in self.training.param_grids.keys() {
            if !self.training.models.contains_key(name) {
                return Err(AppError::Configuration(format!(
                    "param_grids names unknown model '{}'",
                    name
                )));
            }
        }

        let split = &self.training.train_test_split;
        if !(split.test_size > 0.0 && split.test_size < 1.0) {
            return Err(AppError::Configuration(format!(
                "train_test_split.test_size must be in (0, 1), got {}",
                split.test_size
            )));
        }
        if self.training.tuning.cv_folds < 2 {
            return Err(AppError::Configuration(
                "tuning.cv_folds must be at least 2".to_string(),
            ));
        }
        if self.training.feature_selection.top_n == 0 {
            return Err(AppError::Configuration(
                "feature_selection.top_n must be at least 1".to_string(),
            ));
        }
        if self.monitoring.window == Some(0) {
            return Err(AppError::Configuration(
                "monitoring.window must be positive when set".to_string(),
            ));
        }
        if self.monitoring.drift_threshold.is_nan() || self.monitoring.drift_threshold < 0.0 {
            return Err(AppError::Configuration(
                "monitoring.drift_threshold must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

/// One configured model: its family and constructor parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub kind: ModelKind,

    #[serde(default)]
    pub params: ParamSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Labeled CSV dataset
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    #[serde(default = "default_target_column")]
    pub target_column: String,

    #[serde(default)]
    pub columns_to_drop: Vec<String>,

    #[serde(default)]
    pub columns_to_scale: Vec<String>,

    #[serde(default)]
    pub columns_to_encode: Vec<String>,

    /// Candidate name -> family and parameters
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,

    /// Candidate name -> search grid
    #[serde(default)]
    pub param_grids: BTreeMap<String, ParamGrid>,

    #[serde(default)]
    pub train_test_split: SplitOptions,

    #[serde(default)]
    pub feature_selection: FeatureSelectionConfig,

    #[serde(default)]
    pub tuning: TuningConfig,
}

impl TrainingConfig {
    pub fn feature_spec(&self) -> FeatureSpec {
        FeatureSpec::new()
            .with_drop(self.columns_to_drop.iter().cloned())
            .with_scale(self.columns_to_scale.iter().cloned())
            .with_encode(self.columns_to_encode.iter().cloned())
    }

    /// Configured candidates in name order, each with its grid attached.
    /// Every model needs a non-empty `param_grids` entry.
    pub fn candidates(&self) -> Result<Vec<ModelCandidate>> {
        self.models
            .iter()
            .map(|(name, entry)| {
                let grid = self
                    .param_grids
                    .get(name)
                    .filter(|grid| !grid.is_empty())
                    .cloned()
                    .ok_or_else(|| {
                        AppError::Configuration(format!(
                            "Model '{}' has no param_grids entry to tune",
                            name
                        ))
                    })?;
                Ok(ModelCandidate {
                    name: name.clone(),
                    kind: entry.kind,
                    params: entry.params.clone(),
                    grid,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSelectionConfig {
    /// Number of transformed features kept for modeling
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Trees in the importance forest
    #[serde(default = "default_selection_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for FeatureSelectionConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            n_estimators: default_selection_estimators(),
            seed: default_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningConfig {
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            cv_folds: default_cv_folds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_model_directory")]
    pub model_directory: PathBuf,

    #[serde(default = "default_model_file")]
    pub model_file: String,

    #[serde(default = "default_monitor_file")]
    pub monitor_file: String,
}

impl ArtifactConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_directory.join(&self.model_file)
    }

    pub fn monitor_path(&self) -> PathBuf {
        self.model_directory.join(&self.monitor_file)
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            model_directory: default_model_directory(),
            model_file: default_model_file(),
            monitor_file: default_monitor_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Track served predictions and attach metrics to responses
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Trailing observations used for drift; unset means the whole log
    #[serde(default)]
    pub window: Option<usize>,

    #[serde(default)]
    pub drift_method: DriftMethod,

    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Root for batch files named by `POST /v1/monitor`; requests cannot leave it
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: None,
            drift_method: DriftMethod::default(),
            drift_threshold: default_drift_threshold(),
            data_directory: default_data_directory(),
        }
    }
}

impl From<&MonitoringConfig> for MonitorSettings {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            window: config.window,
            method: config.drift_method,
            threshold: config.drift_threshold,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_target_column() -> String {
    "Machine failure".to_string()
}

fn default_top_n() -> usize {
    10
}

fn default_selection_estimators() -> usize {
    100
}

fn default_seed() -> u64 {
    42
}

fn default_cv_folds() -> usize {
    5
}

fn default_model_directory() -> PathBuf {
    PathBuf::from("models")
}

fn default_model_file() -> String {
    "best_model.json".to_string()
}

fn default_monitor_file() -> String {
    "model_monitor.json".to_string()
}

fn default_drift_threshold() -> f64 {
    0.5
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("data")
}
