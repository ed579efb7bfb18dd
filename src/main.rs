use anyhow::Context;
use clap::Parser;
use predictive_maintenance::{
    api::{build_router, AppState},
    config::{Config, ObservabilityConfig},
};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "pdm-server")]
#[command(about = "Serve equipment failure predictions with drift monitoring", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (TOML or YAML); falls back to PDM_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "predictive_maintenance={0},tower_http={0}",
            observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.observability);

    tracing::info!("Starting predictive maintenance server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = predictive_maintenance::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
            tracing::warn!("Continuing without metrics");
        } else {
            tracing::info!("✅ Prometheus metrics initialized");
        }
    } else {
        tracing::info!("⚠️  Prometheus metrics disabled in configuration");
    }

    let monitor_path = config.artifacts.monitor_path();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState::load(config).context("Failed to load the trained model")?;
    tracing::info!(
        candidate = %state.artifact.metadata.candidate,
        kind = %state.artifact.metadata.kind,
        features = ?state.artifact.metadata.feature_names,
        observations = state.monitor.len(),
        "✅ Model loaded"
    );
    if !state.config.monitoring.enabled {
        tracing::info!("⚠️  Live monitoring disabled; predict responses omit metrics");
    }

    let app = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("🚀 HTTP API server listening on http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    // Keep observations and feedback across restarts
    state
        .monitor
        .save(&monitor_path)
        .context("Failed to persist the monitor")?;
    tracing::info!(path = %monitor_path.display(), "Monitor persisted");

    tracing::info!("Shutdown complete");
    Ok(())
}
