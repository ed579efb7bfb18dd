use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Histogram resolution of baseline distributions
pub const HISTOGRAM_BINS: usize = 10;

/// Distribution summary of one model input column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub name: String,
    pub mean: f64,
    /// Population variance
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    /// Counts over [`HISTOGRAM_BINS`] equal-width bins spanning `[min, max]`
    pub histogram: Vec<usize>,
}

impl FeatureStats {
    pub fn from_values(name: impl Into<String>, values: ArrayView1<'_, f64>) -> Self {
        let n = values.len().max(1) as f64;
        let mean = values.sum() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut stats = Self {
            name: name.into(),
            mean,
            variance,
            min,
            max,
            histogram: vec![0; HISTOGRAM_BINS],
        };
        for &value in values.iter() {
            let bin = stats.bin_index(value);
            stats.histogram[bin] += 1;
        }
        stats
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Bin of `value`; values outside the baseline range go to the edge bins
    pub fn bin_index(&self, value: f64) -> usize {
        let width = self.max - self.min;
        if width.is_nan() || width <= 0.0 || value <= self.min {
            return 0;
        }
        let bin = ((value - self.min) / width * HISTOGRAM_BINS as f64) as usize;
        bin.min(HISTOGRAM_BINS - 1)
    }

    /// Baseline share of samples per bin
    pub fn proportions(&self) -> Vec<f64> {
        let total: usize = self.histogram.iter().sum();
        self.histogram
            .iter()
            .map(|&count| count as f64 / total.max(1) as f64)
            .collect()
    }

    /// Share of `values` per baseline bin
    pub fn proportions_of(&self, values: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut counts = vec![0usize; HISTOGRAM_BINS];
        for &value in values.iter() {
            counts[self.bin_index(value)] += 1;
        }
        let total = values.len().max(1) as f64;
        counts.into_iter().map(|c| c as f64 / total).collect()
    }
}

/// Training-time distribution of every model input, captured once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBaseline {
    pub features: Vec<FeatureStats>,
    pub n_samples: usize,
    pub captured_at: DateTime<Utc>,
}

impl FeatureBaseline {
    /// Summarize the columns of `matrix`; `names` labels them in order
    pub fn capture(names: &[String], matrix: &Array2<f64>) -> Result<Self> {
        if matrix.nrows() == 0 {
            return Err(AppError::Validation(
                "Cannot capture a baseline from zero rows".to_string(),
            ));
        }
        if names.len() != matrix.ncols() {
            return Err(AppError::Validation(format!(
                "{} feature names for {} columns",
                names.len(),
                matrix.ncols()
            )));
        }

        let features = names
            .iter()
            .zip(matrix.axis_iter(Axis(1)))
            .map(|(name, column)| FeatureStats::from_values(name.clone(), column))
            .collect();

        Ok(Self {
            features,
            n_samples: matrix.nrows(),
            captured_at: Utc::now(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    pub fn means(&self) -> Vec<f64> {
        self.features.iter().map(|f| f.mean).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_stats_of_column() {
        let values = array![1.0, 2.0, 3.0, 4.0];
        let stats = FeatureStats::from_values("x", values.view());

        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.variance, 1.25);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.histogram.iter().sum::<usize>(), 4);
        assert_eq!(stats.histogram[0], 1);
        assert_eq!(stats.histogram[HISTOGRAM_BINS - 1], 1);
    }

    #[test]
    fn test_constant_column_uses_first_bin() {
        let values = array![7.0, 7.0, 7.0];
        let stats = FeatureStats::from_values("c", values.view());

        assert_eq!(stats.variance, 0.0);
        assert_eq!(stats.histogram[0], 3);
        assert_eq!(stats.bin_index(100.0), 0);
    }

    #[test]
    fn test_out_of_range_values_clamp_to_edges() {
        let values = array![0.0, 10.0];
        let stats = FeatureStats::from_values("x", values.view());

        assert_eq!(stats.bin_index(-5.0), 0);
        assert_eq!(stats.bin_index(50.0), HISTOGRAM_BINS - 1);
        assert_eq!(stats.bin_index(5.0), 5);
    }

    #[test]
    fn test_capture_baseline() {
        let matrix = array![[0.0, 10.0], [2.0, 10.0], [4.0, 10.0]];
        let names = vec!["a".to_string(), "b".to_string()];
        let baseline = FeatureBaseline::capture(&names, &matrix).unwrap();

        assert_eq!(baseline.n_samples, 3);
        assert_eq!(baseline.means(), vec![2.0, 10.0]);
        assert_eq!(baseline.features[1].name, "b");
    }

    #[test]
    fn test_capture_rejects_name_mismatch() {
        let matrix = array![[0.0, 1.0]];
        assert!(FeatureBaseline::capture(&["a".to_string()], &matrix).is_err());
        assert!(FeatureBaseline::capture(&[], &Array2::zeros((0, 0))).is_err());
    }
}
