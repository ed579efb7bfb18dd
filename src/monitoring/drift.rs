use crate::monitoring::baseline::{FeatureBaseline, FeatureStats, HISTOGRAM_BINS};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Proportion floor used by PSI so empty bins do not produce infinities
const PSI_EPSILON: f64 = 1e-4;

/// Per-feature drift statistic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMethod {
    /// |mean_current - mean_baseline| / std_baseline
    #[default]
    MeanShift,

    /// Population stability index over the baseline histogram bins
    Psi,
}

impl DriftMethod {
    pub fn statistic(&self, baseline: &FeatureStats, current: ArrayView1<'_, f64>) -> f64 {
        let mean = current.sum() / current.len().max(1) as f64;
        self.statistic_of(baseline, mean, &baseline.proportions_of(current))
    }

    /// Statistic from a sample's mean and its share per baseline bin
    fn statistic_of(&self, baseline: &FeatureStats, mean: f64, proportions: &[f64]) -> f64 {
        match self {
            DriftMethod::MeanShift => mean_shift(baseline, mean),
            DriftMethod::Psi => population_stability_index(baseline, proportions),
        }
    }
}

impl fmt::Display for DriftMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftMethod::MeanShift => write!(f, "mean_shift"),
            DriftMethod::Psi => write!(f, "psi"),
        }
    }
}

fn mean_shift(baseline: &FeatureStats, current_mean: f64) -> f64 {
    let diff = (current_mean - baseline.mean).abs();
    let sigma = baseline.std_dev();

    if sigma > 0.0 {
        diff / sigma
    } else if diff <= 1e-9 * baseline.mean.abs().max(1.0) {
        0.0
    } else {
        f64::INFINITY
    }
}

fn population_stability_index(baseline: &FeatureStats, current: &[f64]) -> f64 {
    baseline
        .proportions()
        .into_iter()
        .zip(current.iter().copied())
        .map(|(expected, actual)| {
            let expected = expected.max(PSI_EPSILON);
            let actual = actual.max(PSI_EPSILON);
            (actual - expected) * (actual / expected).ln()
        })
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    Stable,
    DriftDetected,
    /// No observations to compare
    InsufficientData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub baseline_mean: f64,
    pub current_mean: f64,
    pub current_std_dev: f64,
    /// Infinite statistics serialize as `null`
    pub statistic: f64,
    pub drifted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub status: DriftStatus,
    pub drift_detected: bool,
    pub method: DriftMethod,
    pub threshold: f64,
    /// Rows compared against the baseline
    pub sample_size: usize,
    pub features: Vec<FeatureDrift>,
}

impl DriftReport {
    /// Names of drifted features
    pub fn drifted_features(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.drifted)
            .map(|f| f.feature.as_str())
            .collect()
    }
}

/// Per-column running totals of a sample, binned on the baseline's histogram edges.
///
/// Rows can be added and removed in O(features), so a sliding window never has
/// to be rescanned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSummary {
    rows: usize,
    sums: Vec<f64>,
    sum_squares: Vec<f64>,
    bins: Vec<[usize; HISTOGRAM_BINS]>,
}

impl SampleSummary {
    pub fn new(n_features: usize) -> Self {
        Self {
            rows: 0,
            sums: vec![0.0; n_features],
            sum_squares: vec![0.0; n_features],
            bins: vec![[0; HISTOGRAM_BINS]; n_features],
        }
    }

    pub fn of_matrix(baseline: &FeatureBaseline, matrix: &Array2<f64>) -> Self {
        let mut summary = Self::new(baseline.n_features());
        for row in matrix.rows() {
            summary.add(baseline, row.iter().copied());
        }
        summary
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn add(&mut self, baseline: &FeatureBaseline, row: impl IntoIterator<Item = f64>) {
        self.rows += 1;
        for (j, (stats, value)) in baseline.features.iter().zip(row).enumerate() {
            self.sums[j] += value;
            self.sum_squares[j] += value * value;
            self.bins[j][stats.bin_index(value)] += 1;
        }
    }

    pub fn remove(&mut self, baseline: &FeatureBaseline, row: impl IntoIterator<Item = f64>) {
        if self.rows == 0 {
            return;
        }
        self.rows -= 1;
        if self.rows == 0 {
            // drop accumulated rounding along with the last row
            *self = Self::new(self.sums.len());
            return;
        }
        for (j, (stats, value)) in baseline.features.iter().zip(row).enumerate() {
            self.sums[j] -= value;
            self.sum_squares[j] -= value * value;
            let bin = &mut self.bins[j][stats.bin_index(value)];
            *bin = bin.saturating_sub(1);
        }
    }

    pub fn mean(&self, column: usize) -> f64 {
        self.sums[column] / self.rows.max(1) as f64
    }

    /// Population standard deviation of a column
    pub fn std_dev(&self, column: usize) -> f64 {
        let n = self.rows.max(1) as f64;
        let mean = self.mean(column);
        (self.sum_squares[column] / n - mean * mean).max(0.0).sqrt()
    }

    fn proportions(&self, column: usize) -> Vec<f64> {
        let total = self.rows.max(1) as f64;
        self.bins[column].iter().map(|&c| c as f64 / total).collect()
    }
}

/// Compare the columns of `current` against the baseline
pub fn compare(
    baseline: &FeatureBaseline,
    current: &Array2<f64>,
    method: DriftMethod,
    threshold: f64,
) -> DriftReport {
    compare_summary(
        baseline,
        &SampleSummary::of_matrix(baseline, current),
        method,
        threshold,
    )
}

/// Compare a pre-aggregated sample against the baseline
pub fn compare_summary(
    baseline: &FeatureBaseline,
    current: &SampleSummary,
    method: DriftMethod,
    threshold: f64,
) -> DriftReport {
    if current.rows() == 0 {
        return DriftReport {
            status: DriftStatus::InsufficientData,
            drift_detected: false,
            method,
            threshold,
            sample_size: 0,
            features: Vec::new(),
        };
    }

    let features: Vec<FeatureDrift> = baseline
        .features
        .iter()
        .enumerate()
        .map(|(j, stats)| {
            let current_mean = current.mean(j);
            let statistic = method.statistic_of(stats, current_mean, &current.proportions(j));
            FeatureDrift {
                feature: stats.name.clone(),
                baseline_mean: stats.mean,
                current_mean,
                current_std_dev: current.std_dev(j),
                statistic,
                drifted: statistic > threshold,
            }
        })
        .collect();

    let drift_detected = features.iter().any(|f| f.drifted);
    DriftReport {
        status: if drift_detected {
            DriftStatus::DriftDetected
        } else {
            DriftStatus::Stable
        },
        drift_detected,
        method,
        threshold,
        sample_size: current.rows(),
        features,
    }
}
