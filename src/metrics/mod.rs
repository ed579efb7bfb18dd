//! Prometheus metrics for the prediction service.
//!
//! All collectors live in one process-wide registry exported on `/metrics`.
//!
//! # Example
//! ```no_run
//! use predictive_maintenance::metrics::PREDICTIONS_TOTAL;
//!
//! PREDICTIONS_TOTAL.with_label_values(&["Failed"]).inc();
//! ```

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};

const NAMESPACE: &str = "predictive_maintenance";

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Predictions served
    ///
    /// Labels: label
    pub static ref PREDICTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("predictions_total", "Total number of predictions served")
            .namespace(NAMESPACE),
        &["label"]
    ).expect("Failed to create PREDICTIONS_TOTAL metric");

    /// Prediction latency in seconds, preprocessing included
    pub static ref PREDICTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "prediction_duration_seconds",
            "Prediction latency in seconds"
        )
        .namespace(NAMESPACE)
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0])
    ).expect("Failed to create PREDICTION_DURATION_SECONDS metric");

    /// Observations appended to the monitor log
    pub static ref OBSERVATIONS_TOTAL: Counter = Counter::with_opts(
        Opts::new("monitor_observations_total", "Observations recorded by the monitor")
            .namespace(NAMESPACE)
    ).expect("Failed to create OBSERVATIONS_TOTAL metric");

    /// Ground-truth feedback requests
    ///
    /// Labels: accepted
    pub static ref FEEDBACK_TOTAL: CounterVec = CounterVec::new(
        Opts::new("monitor_feedback_total", "Ground-truth feedback received")
            .namespace(NAMESPACE),
        &["accepted"]
    ).expect("Failed to create FEEDBACK_TOTAL metric");

    /// Reports in which at least one feature drifted
    ///
    /// Labels: source (live, batch)
    pub static ref DRIFT_DETECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("drift_detected_total", "Drift reports that flagged drift")
            .namespace(NAMESPACE),
        &["source"]
    ).expect("Failed to create DRIFT_DETECTED_TOTAL metric");

    /// Request errors by code
    ///
    /// Labels: code
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("errors_total", "Errors returned to clients")
            .namespace(NAMESPACE),
        &["code"]
    ).expect("Failed to create ERRORS_TOTAL metric");
}

/// Register every collector with [`PROMETHEUS_REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(PREDICTIONS_TOTAL.clone()),
        Box::new(PREDICTION_DURATION_SECONDS.clone()),
        Box::new(OBSERVATIONS_TOTAL.clone()),
        Box::new(FEEDBACK_TOTAL.clone()),
        Box::new(DRIFT_DETECTED_TOTAL.clone()),
        Box::new(ERRORS_TOTAL.clone()),
    ];

    for collector in collectors {
        match PROMETHEUS_REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Render the registry in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
