use crate::error::{AppError, Result};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single cell of telemetry: a sensor reading or a category such as machine type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Category(String),
}

impl Scalar {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Scalar::Number(v) => Some(*v),
            Scalar::Category(_) => None,
        }
    }

    /// Textual form used as the one-hot vocabulary key
    pub fn category_key(&self) -> String {
        match self {
            Scalar::Number(v) => v.to_string(),
            Scalar::Category(s) => s.clone(),
        }
    }

    /// Parse a raw CSV cell: numbers stay numeric, everything else is a category
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Scalar::Number(v),
            _ => Scalar::Category(trimmed.to_string()),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Category(value.to_string())
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(v) => write!(f, "{}", v),
            Scalar::Category(s) => write!(f, "{}", s),
        }
    }
}

/// Feature name -> value for one piece of equipment at one point in time
pub type FeatureRow = BTreeMap<String, Scalar>;

/// Binary failure label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureLabel {
    NotFailed,
    Failed,
}

impl FailureLabel {
    pub fn as_index(&self) -> usize {
        match self {
            FailureLabel::NotFailed => 0,
            FailureLabel::Failed => 1,
        }
    }

    pub fn from_index(index: usize) -> Self {
        if index == 1 {
            FailureLabel::Failed
        } else {
            FailureLabel::NotFailed
        }
    }

    /// Lenient parsing: 0/1, true/false, failed/not failed. Anything else is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "1.0" | "true" | "failed" | "failure" | "yes" => Some(FailureLabel::Failed),
            "0" | "0.0" | "false" | "not failed" | "not_failed" | "no" => {
                Some(FailureLabel::NotFailed)
            }
            _ => None,
        }
    }

    /// Interpret an arbitrary JSON value as a label, `None` when it is not one
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(true) => Some(FailureLabel::Failed),
            serde_json::Value::Bool(false) => Some(FailureLabel::NotFailed),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(v) if v == 1.0 => Some(FailureLabel::Failed),
                Some(v) if v == 0.0 => Some(FailureLabel::NotFailed),
                _ => None,
            },
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }
}

impl fmt::Display for FailureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureLabel::Failed => write!(f, "Failed"),
            FailureLabel::NotFailed => write!(f, "Not Failed"),
        }
    }
}

/// One labeled record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub features: FeatureRow,
    pub label: FailureLabel,
}

impl Sample {
    pub fn new(features: FeatureRow, label: FailureLabel) -> Self {
        Self { features, label }
    }
}

/// Options for [`Dataset::train_test_split`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitOptions {
    /// Fraction of samples held out for testing
    #[serde(default = "default_test_size")]
    pub test_size: f64,

    /// Seed for shuffling
    #[serde(default = "default_random_state")]
    pub random_state: u64,

    #[serde(default = "default_true")]
    pub shuffle: bool,

    /// Keep the class ratio identical in both halves
    #[serde(default)]
    pub stratify: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            test_size: default_test_size(),
            random_state: default_random_state(),
            shuffle: true,
            stratify: false,
        }
    }
}

fn default_test_size() -> f64 {
    0.2
}

fn default_random_state() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

/// Ordered, immutable collection of labeled telemetry records
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    samples: Vec<Sample>,
}

impl Dataset {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Feature rows without labels
    pub fn rows(&self) -> Vec<&FeatureRow> {
        self.samples.iter().map(|s| &s.features).collect()
    }

    /// Labels as class indices (0 = not failed, 1 = failed)
    pub fn labels(&self) -> Array1<usize> {
        self.samples.iter().map(|s| s.label.as_index()).collect()
    }

    /// Number of samples per class, `[not_failed, failed]`
    pub fn class_counts(&self) -> [usize; 2] {
        let mut counts = [0usize; 2];
        for sample in &self.samples {
            counts[sample.label.as_index()] += 1;
        }
        counts
    }

    /// Split into train/test datasets
    pub fn train_test_split(&self, options: &SplitOptions) -> Result<(Dataset, Dataset)> {
        if !(options.test_size > 0.0 && options.test_size < 1.0) {
            return Err(AppError::Validation(format!(
                "test_size must be in (0, 1), got {}",
                options.test_size
            )));
        }
        if self.samples.len() < 2 {
            return Err(AppError::Validation(
                "At least two samples are required for a train/test split".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(options.random_state);
        let mut train_idx = Vec::new();
        let mut test_idx = Vec::new();

        if options.stratify {
            for class in 0..2 {
                let mut members: Vec<usize> = (0..self.samples.len())
                    .filter(|&i| self.samples[i].label.as_index() == class)
                    .collect();
                if options.shuffle {
                    members.shuffle(&mut rng);
                }
                let n_test = (members.len() as f64 * options.test_size).round() as usize;
                test_idx.extend_from_slice(&members[..n_test]);
                train_idx.extend_from_slice(&members[n_test..]);
            }
            train_idx.sort_unstable();
            test_idx.sort_unstable();
        } else {
            let mut order: Vec<usize> = (0..self.samples.len()).collect();
            if options.shuffle {
                order.shuffle(&mut rng);
            }
            let n_test = ((self.samples.len() as f64 * options.test_size).ceil() as usize)
                .clamp(1, self.samples.len() - 1);
            let n_train = self.samples.len() - n_test;
            train_idx = order[..n_train].to_vec();
            test_idx = order[n_train..].to_vec();
        }

        if train_idx.is_empty() || test_idx.is_empty() {
            return Err(AppError::Validation(
                "train/test split produced an empty partition".to_string(),
            ));
        }

        Ok((self.subset(&train_idx), self.subset(&test_idx)))
    }

    fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset::new(indices.iter().map(|&i| self.samples[i].clone()).collect())
    }
}
