//! Serving-time monitoring: a training baseline, the log of served
//! predictions, and drift and performance reports computed from them.

pub mod baseline;
pub mod drift;
pub mod monitor;

pub use baseline::{FeatureBaseline, FeatureStats, HISTOGRAM_BINS};
pub use drift::{
    compare, compare_summary, DriftMethod, DriftReport, DriftStatus, FeatureDrift, SampleSummary,
};
pub use monitor::{
    BatchComparison, ModelMonitor, MonitorReport, MonitorSettings, Observation,
    PerformanceReport, PerformanceStatus,
};
