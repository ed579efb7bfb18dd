use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use predictive_maintenance::{config::Config, ml::TrainingPipeline};
use reqwest::{Client, Response};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pdm-cli")]
#[command(about = "Predictive maintenance CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train, tune and persist a model offline
    Train {
        /// Configuration file (TOML or YAML); falls back to PDM_CONFIG
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Score one row of telemetry
    Predict {
        /// Feature map as JSON, e.g. '{"Type": "L", "Torque [Nm]": 40.1}'
        #[arg(value_name = "FEATURES_JSON")]
        features: String,

        /// Ground truth, if already known
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Attach ground truth to an earlier prediction
    Feedback {
        #[arg(value_name = "OBSERVATION_ID")]
        observation_id: u64,

        #[arg(value_name = "LABEL")]
        label: String,
    },

    /// Show the live drift and performance report
    Report,

    /// Evaluate a labeled CSV file under the server's monitoring.data_directory
    Monitor {
        #[arg(value_name = "DATA_PATH")]
        data_path: String,
    },

    /// Check server health
    Health,
}

/// Labels on the command line may be numbers, booleans or text
fn label_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!(raw))
}

async fn print_response(response: Response) -> anyhow::Result<()> {
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("Server returned {}", status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    match cli.command {
        Commands::Train { config } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "predictive_maintenance=info".into()),
                )
                .init();

            let config = Config::load(config.as_deref()).context("Failed to load configuration")?;
            let summary = tokio::task::spawn_blocking(move || TrainingPipeline::run(&config))
                .await
                .context("Training task panicked")?
                .context("Training failed")?;

            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Predict { features, label } => {
            let features: serde_json::Value =
                serde_json::from_str(&features).context("FEATURES_JSON is not valid JSON")?;

            let response = client
                .post(format!("{}/v1/predict", cli.endpoint))
                .json(&json!({
                    "features": features,
                    "label": label.as_deref().map(label_value),
                }))
                .send()
                .await?;

            print_response(response).await?;
        }

        Commands::Feedback {
            observation_id,
            label,
        } => {
            let response = client
                .post(format!("{}/v1/feedback", cli.endpoint))
                .json(&json!({
                    "observation_id": observation_id,
                    "label": label_value(&label),
                }))
                .send()
                .await?;

            print_response(response).await?;
        }

        Commands::Report => {
            let response = client
                .get(format!("{}/v1/monitor/report", cli.endpoint))
                .send()
                .await?;

            print_response(response).await?;
        }

        Commands::Monitor { data_path } => {
            let response = client
                .post(format!("{}/v1/monitor", cli.endpoint))
                .json(&json!({ "data_path": data_path }))
                .send()
                .await?;

            print_response(response).await?;
        }

        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;

            print_response(response).await?;
        }
    }

    Ok(())
}
