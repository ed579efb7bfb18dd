//! Equipment failure prediction from sensor telemetry.
//!
//! Training compares and tunes candidate classifiers offline and persists the
//! winner together with a baseline of its inputs. The server loads both, scores
//! requests, and reports drift and live performance.

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;
pub mod ml;
pub mod monitoring;

pub use config::Config;
pub use error::{AppError, Result};
