//! Idle Compute CLI
//!
//! Runs the forecasting pipeline stages against local files and controls
//! background computation on a running idle-agent.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{agent, offline};
use forecast_lib::forecast::DEFAULT_HORIZON_DAYS;
use forecast_lib::predictor::DEFAULT_TEST_FRACTION;
use forecast_lib::synth::DEFAULT_SEED;
use forecast_lib::Intensity;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Idle Compute CLI
#[derive(Parser)]
#[command(name = "idlectl")]
#[command(author, version, about = "CLI for the Idle Compute forecaster and scheduler", long_about = None)]
pub struct Cli {
    /// Agent API endpoint URL (can also be set via IDLE_AGENT_URL env var)
    #[arg(long, env = "IDLE_AGENT_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize a CPU usage history CSV
    Generate {
        /// Output CSV path
        #[arg(long, short, default_value = "data/cpu_usage_data.csv")]
        output: PathBuf,

        /// First timestamp (e.g. "2023-07-01 00:00:00")
        #[arg(long)]
        start: Option<String>,

        /// Last timestamp, inclusive
        #[arg(long)]
        end: Option<String>,

        /// Random seed
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Train the usage classifier on a history CSV
    Train {
        /// History CSV path
        #[arg(long, default_value = "data/cpu_usage_data.csv")]
        history: PathBuf,

        /// Where to write the model artifact
        #[arg(long, short, default_value = "data/usage_classifier.json")]
        model: PathBuf,

        /// Trailing fraction of the history held out for evaluation
        #[arg(long, default_value_t = DEFAULT_TEST_FRACTION)]
        test_fraction: f64,
    },

    /// Forecast usage for the slots after the training data
    Forecast {
        /// Model artifact path
        #[arg(long, short, default_value = "data/usage_classifier.json")]
        model: PathBuf,

        /// Output CSV path
        #[arg(long, short, default_value = "data/future_schedule.csv")]
        output: PathBuf,

        /// Days to forecast
        #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS)]
        horizon_days: u32,

        /// Forecast from this instant instead of the model's last observation
        #[arg(long)]
        after: Option<String>,
    },

    /// Show the job plan derived from a forecast CSV
    Plan {
        /// Forecast CSV path
        #[arg(long, default_value = "data/future_schedule.csv")]
        forecast: PathBuf,

        /// Show at most this many jobs
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show agent health and computation state
    Status,

    /// Start background computation on the agent
    Start {
        /// Intensity (HIGH, MEDIUM or LOW)
        intensity: Intensity,
    },

    /// Stop background computation on the agent
    Stop,

    /// Show the forecast slot covering an instant
    Slot {
        /// Instant to look up (e.g. "2023-10-02 13:05")
        at: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("debug"))
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Generate {
            output,
            start,
            end,
            seed,
        } => {
            offline::generate_history(&output, start.as_deref(), end.as_deref(), seed, cli.format)?;
        }
        Commands::Train {
            history,
            model,
            test_fraction,
        } => {
            offline::train_model(&history, &model, test_fraction, cli.format)?;
        }
        Commands::Forecast {
            model,
            output,
            horizon_days,
            after,
        } => {
            offline::build_forecast(&model, &output, horizon_days, after.as_deref(), cli.format)?;
        }
        Commands::Plan { forecast, limit } => {
            offline::show_plan(&forecast, limit, cli.format)?;
        }
        Commands::Status => {
            let client = client::ApiClient::new(&cli.api_url)?;
            agent::show_status(&client, cli.format).await?;
        }
        Commands::Start { intensity } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            agent::start_computation(&client, intensity, cli.format).await?;
        }
        Commands::Stop => {
            let client = client::ApiClient::new(&cli.api_url)?;
            agent::stop_computation(&client, cli.format).await?;
        }
        Commands::Slot { at } => {
            let client = client::ApiClient::new(&cli.api_url)?;
            agent::show_slot(&client, &at, cli.format).await?;
        }
    }

    Ok(())
}
