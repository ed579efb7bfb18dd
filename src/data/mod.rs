/// Telemetry datasets: records, labels, splitting and CSV loading
pub mod dataset;
pub mod loader;

pub use dataset::{Dataset, FailureLabel, FeatureRow, Sample, Scalar, SplitOptions};
pub use loader::{load_csv, read_csv, resolve_data_path};
