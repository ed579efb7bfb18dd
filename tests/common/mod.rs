//! Shared fixtures for integration tests: synthetic telemetry and training
//! configurations that write their artifacts into a temporary directory.

#![allow(dead_code)]

use predictive_maintenance::config::Config;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const TARGET: &str = "Machine failure";

const TYPES: [&str; 3] = ["L", "M", "H"];

/// Deterministic telemetry where failures are exactly the high-torque rows
pub fn telemetry_csv(rows: usize) -> String {
    let mut csv = String::from(
        "UDI,Type,Air temperature [K],Torque [Nm],Tool wear [min],Machine failure\n",
    );
    for i in 0..rows {
        let torque = 20.0 + ((i * 37) % 60) as f64;
        let wear = ((i * 53) % 250) as f64;
        let air = 298.0 + (i % 10) as f64 * 0.1;
        let failed = u8::from(torque > 55.0);
        writeln!(
            csv,
            "{},{},{:.1},{:.1},{:.1},{}",
            i + 1,
            TYPES[i % TYPES.len()],
            air,
            torque,
            wear,
            failed
        )
        .unwrap();
    }
    csv
}

/// Same layout as [`telemetry_csv`] but every torque reading is shifted upward
pub fn drifted_csv(rows: usize, shift: f64) -> String {
    let mut csv = String::from(
        "UDI,Type,Air temperature [K],Torque [Nm],Tool wear [min],Machine failure\n",
    );
    for i in 0..rows {
        let torque = 20.0 + ((i * 37) % 60) as f64 + shift;
        writeln!(
            csv,
            "{},{},298.0,{:.1},{:.1},{}",
            i + 1,
            TYPES[i % TYPES.len()],
            torque,
            ((i * 53) % 250) as f64,
            u8::from(torque > 55.0)
        )
        .unwrap();
    }
    csv
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// Logistic regression with one grid value and a forest with two
pub fn training_document(data_path: &Path, model_dir: &Path) -> String {
    format!(
        r#"
training:
  data_path: "{data}"
  target_column: "{TARGET}"
  columns_to_drop: [UDI]
  columns_to_scale: ["Torque [Nm]", "Tool wear [min]"]
  columns_to_encode: [Type]
  train_test_split:
    test_size: 0.25
    random_state: 7
    stratify: true
  models:
    logistic_regression:
      kind: logistic_regression
    random_forest:
      kind: random_forest
      params:
        seed: 3
  param_grids:
    logistic_regression:
      alpha: [1.0]
    random_forest:
      n_estimators: [5, 10]
  feature_selection:
    top_n: 4
    n_estimators: 20
  tuning:
    cv_folds: 3
artifacts:
  model_directory: "{models}"
monitoring:
  enabled: true
  drift_method: mean_shift
  drift_threshold: 0.5
"#,
        data = data_path.display(),
        models = model_dir.display(),
    )
}

pub fn training_config(data_path: &Path, model_dir: &Path) -> Config {
    Config::from_document(
        &training_document(data_path, model_dir),
        config::FileFormat::Yaml,
    )
    .unwrap()
}
