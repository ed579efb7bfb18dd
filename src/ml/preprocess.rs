use crate::data::{Dataset, FeatureRow, Scalar};
use crate::error::{AppError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Column treatment for the preprocessor
///
/// The three lists must be disjoint. Columns in none of them are passed through
/// unchanged and must be numeric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    #[serde(default)]
    pub drop: Vec<String>,

    #[serde(default)]
    pub scale: Vec<String>,

    #[serde(default)]
    pub encode: Vec<String>,
}

impl FeatureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drop<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.drop = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scale<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.scale = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_encode<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.encode = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Every named column, in drop/scale/encode order
    pub fn named_columns(&self) -> impl Iterator<Item = &String> {
        self.drop.iter().chain(self.scale.iter()).chain(self.encode.iter())
    }

    /// Reject overlapping or repeated column names
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in self.named_columns() {
            if !seen.insert(column.as_str()) {
                return Err(AppError::Validation(format!(
                    "Column '{}' appears more than once in drop/scale/encode",
                    column
                )));
            }
        }
        Ok(())
    }

    fn contains(&self, column: &str) -> bool {
        self.named_columns().any(|c| c == column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ColumnScaler {
    column: String,
    mean: f64,
    scale: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ColumnEncoder {
    column: String,
    categories: Vec<String>,
}

/// Fitted column transformer
///
/// Produced once by [`Preprocessor::fit`] on a training split and then shared,
/// read-only, by evaluation and serving. Unseen categories of an encoded column
/// are encoded as all zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    spec: FeatureSpec,
    scalers: Vec<ColumnScaler>,
    encoders: Vec<ColumnEncoder>,
    passthrough: Vec<String>,
    feature_names: Vec<String>,
}

impl Preprocessor {
    /// Learn scaling statistics and category vocabularies from a training split
    pub fn fit(data: &Dataset, spec: &FeatureSpec) -> Result<Self> {
        Self::fit_rows(data.rows(), spec)
    }

    pub fn fit_rows<'a, I>(rows: I, spec: &FeatureSpec) -> Result<Self>
    where
        I: IntoIterator<Item = &'a FeatureRow>,
    {
        spec.validate()?;
        let rows: Vec<&FeatureRow> = rows.into_iter().collect();
        if rows.is_empty() {
            return Err(AppError::Validation(
                "Cannot fit preprocessor on an empty dataset".to_string(),
            ));
        }

        for column in spec.named_columns() {
            if rows.iter().any(|row| !row.contains_key(column)) {
                return Err(AppError::MissingColumn(column.clone()));
            }
        }

        let scalers = spec
            .scale
            .iter()
            .map(|column| {
                let values = numeric_column(&rows, column)?;
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = variance.sqrt();
                let scale = if std.is_finite() && std > 0.0 { std } else { 1.0 };
                Ok(ColumnScaler {
                    column: column.clone(),
                    mean,
                    scale,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let encoders: Vec<ColumnEncoder> = spec
            .encode
            .iter()
            .map(|column| {
                let categories: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|row| row.get(column))
                    .map(Scalar::category_key)
                    .collect();
                ColumnEncoder {
                    column: column.clone(),
                    categories: categories.into_iter().collect(),
                }
            })
            .collect();

        let remainder: BTreeSet<&String> = rows
            .iter()
            .flat_map(|row| row.keys())
            .filter(|column| !spec.contains(column))
            .collect();
        let mut passthrough = Vec::with_capacity(remainder.len());
        for column in remainder {
            if rows.iter().any(|row| !row.contains_key(column)) {
                return Err(AppError::MissingColumn(column.clone()));
            }
            numeric_column(&rows, column)?;
            passthrough.push(column.clone());
        }

        let mut feature_names: Vec<String> =
            scalers.iter().map(|s| s.column.clone()).collect();
        for encoder in &encoders {
            feature_names.extend(
                encoder
                    .categories
                    .iter()
                    .map(|category| format!("{}={}", encoder.column, category)),
            );
        }
        feature_names.extend(passthrough.iter().cloned());

        debug!(
            scaled = scalers.len(),
            encoded = encoders.len(),
            passthrough = passthrough.len(),
            width = feature_names.len(),
            "Fitted preprocessor"
        );

        Ok(Self {
            spec: spec.clone(),
            scalers,
            encoders,
            passthrough,
            feature_names,
        })
    }

    /// Transform a dataset with the fitted parameters
    pub fn transform(&self, data: &Dataset) -> Result<Array2<f64>> {
        self.transform_rows(data.rows())
    }

    /// Transform any collection of feature rows into a fixed-width matrix
    pub fn transform_rows<'a, I>(&self, rows: I) -> Result<Array2<f64>>
    where
        I: IntoIterator<Item = &'a FeatureRow>,
    {
        let rows: Vec<&FeatureRow> = rows.into_iter().collect();
        let mut matrix = Array2::zeros((rows.len(), self.n_features()));
        for (i, row) in rows.iter().enumerate() {
            let encoded = self.transform_row(row)?;
            matrix.row_mut(i).assign(&encoded);
        }
        Ok(matrix)
    }

    /// Transform a single row
    pub fn transform_row(&self, row: &FeatureRow) -> Result<Array1<f64>> {
        let mut out = Array1::zeros(self.n_features());
        let mut offset = 0;

        for scaler in &self.scalers {
            let value = required_number(row, &scaler.column)?;
            out[offset] = (value - scaler.mean) / scaler.scale;
            offset += 1;
        }

        for encoder in &self.encoders {
            let value = row
                .get(&encoder.column)
                .ok_or_else(|| AppError::MissingColumn(encoder.column.clone()))?;
            let key = value.category_key();
            // binary search: categories are kept sorted
            if let Ok(position) = encoder.categories.binary_search(&key) {
                out[offset + position] = 1.0;
            }
            offset += encoder.categories.len();
        }

        for column in &self.passthrough {
            out[offset] = required_number(row, column)?;
            offset += 1;
        }

        Ok(out)
    }

    /// Output width
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Names of the transformed columns, in output order
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// Learned vocabulary of an encoded column
    pub fn categories(&self, column: &str) -> Option<&[String]> {
        self.encoders
            .iter()
            .find(|e| e.column == column)
            .map(|e| e.categories.as_slice())
    }

    /// Learned (mean, scale) of a scaled column
    pub fn scaling(&self, column: &str) -> Option<(f64, f64)> {
        self.scalers
            .iter()
            .find(|s| s.column == column)
            .map(|s| (s.mean, s.scale))
    }
}

fn numeric_column(rows: &[&FeatureRow], column: &str) -> Result<Vec<f64>> {
    rows.iter().map(|row| required_number(row, column)).collect()
}

fn required_number(row: &FeatureRow, column: &str) -> Result<f64> {
    match row.get(column) {
        Some(Scalar::Number(v)) => Ok(*v),
        Some(Scalar::Category(value)) => Err(AppError::Validation(format!(
            "Column '{}' must be numeric, got '{}'",
            column, value
        ))),
        None => Err(AppError::MissingColumn(column.to_string())),
    }
}
