pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::ml::PersistedArtifact;
use crate::monitoring::{ModelMonitor, MonitorSettings};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Loaded once at startup and read without locks
    pub artifact: Arc<PersistedArtifact>,
    pub monitor: Arc<ModelMonitor>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(artifact: PersistedArtifact, monitor: ModelMonitor, config: Config) -> Result<Self> {
        if monitor.baseline().n_features() != artifact.feature_indices.len() {
            return Err(AppError::Configuration(format!(
                "Monitor baseline has {} features but the model uses {}",
                monitor.baseline().n_features(),
                artifact.feature_indices.len()
            )));
        }

        Ok(Self {
            artifact: Arc::new(artifact),
            monitor: Arc::new(monitor),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }

    /// Load the artifact and monitor named by the configuration
    pub fn load(config: Config) -> Result<Self> {
        let artifact = PersistedArtifact::load(config.artifacts.model_path())?;
        let monitor = ModelMonitor::load(
            config.artifacts.monitor_path(),
            MonitorSettings::from(&config.monitoring),
        )?;
        Self::new(artifact, monitor, config)
    }
}
