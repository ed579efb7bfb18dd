/// Machine learning for equipment failure prediction
///
/// This module provides the offline training path and the scoring primitives
/// used at serving time:
/// - Column preprocessing (drop / scale / one-hot / passthrough)
/// - Random-forest feature ranking
/// - Candidate comparison on a held-out split
/// - Stratified k-fold grid search scored by ROC-AUC
/// - A persisted artifact bundling preprocessor, selection and model

pub mod artifact;
pub mod classifier;
pub mod evaluation;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod selection;
pub mod trainer;
pub mod tuner;

pub use artifact::{ArtifactMetadata, PersistedArtifact, RowPrediction};
pub use classifier::{Classifier, FittedModel};
pub use evaluation::{roc_auc, ClassMetrics, ClassificationReport, EvaluationResult};
pub use models::{ModelCandidate, ModelKind, ModelParams, ParamGrid, ParamSet, ParamValue};
pub use pipeline::{TrainedModel, TrainingPipeline, TrainingSummary};
pub use preprocess::{FeatureSpec, Preprocessor};
pub use selection::{FeatureRanking, FeatureSelector};
pub use trainer::{ModelTrainer, TrainTestData};
pub use tuner::{GridPointScore, ModelTuner, TunedModel};
