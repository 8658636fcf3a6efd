//! Agent configuration
//!
//! Read from an optional `idle-agent.{toml,yaml,json}` file (path overridable
//! with `IDLE_AGENT_CONFIG`) and `IDLE_AGENT_*` environment variables, the
//! latter taking precedence.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use forecast_lib::computation::{ComputationConfig, DEFAULT_JOB_LABEL};
use forecast_lib::forecast::{ForecastBuilder, DEFAULT_HORIZON_DAYS};
use forecast_lib::models::{align_to_slot, is_slot_aligned, parse_timestamp};
use forecast_lib::pipeline::PipelineConfig;
use forecast_lib::schedule::{Clock, SystemClock};
use forecast_lib::synth::{SynthesizerConfig, DEFAULT_SEED};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "IDLE_AGENT_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "idle-agent";
const ENV_PREFIX: &str = "IDLE_AGENT";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/forecast
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Historical usage CSV
    #[serde(default = "default_history_path")]
    pub history_path: PathBuf,

    /// Synthesize history when `history_path` does not exist
    #[serde(default = "default_generate_history")]
    pub generate_history: bool,

    /// Synthesized history window. The end defaults to the current slot and
    /// the start to thirteen weeks before the end.
    #[serde(default)]
    pub history_start: Option<String>,
    #[serde(default)]
    pub history_end: Option<String>,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Where the trained classifier artifact is written
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Where the forecast table is written
    #[serde(default = "default_forecast_path")]
    pub forecast_path: PathBuf,

    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,

    #[serde(default = "default_job_label")]
    pub job_label: String,

    /// Computation loop delay per intensity, in milliseconds
    #[serde(default = "default_high_tick_ms")]
    pub high_tick_ms: u64,
    #[serde(default = "default_medium_tick_ms")]
    pub medium_tick_ms: u64,
    #[serde(default = "default_low_tick_ms")]
    pub low_tick_ms: u64,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_history_path() -> PathBuf {
    PathBuf::from("data/cpu_usage_data.csv")
}

fn default_generate_history() -> bool {
    true
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_model_path() -> PathBuf {
    PathBuf::from("data/usage_classifier.json")
}

fn default_forecast_path() -> PathBuf {
    PathBuf::from("data/future_schedule.csv")
}

fn default_horizon_days() -> u32 {
    DEFAULT_HORIZON_DAYS
}

fn default_job_label() -> String {
    DEFAULT_JOB_LABEL.to_string()
}

fn default_high_tick_ms() -> u64 {
    1_000
}

fn default_medium_tick_ms() -> u64 {
    2_000
}

fn default_low_tick_ms() -> u64 {
    3_000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            history_path: default_history_path(),
            generate_history: default_generate_history(),
            history_start: None,
            history_end: None,
            seed: default_seed(),
            model_path: default_model_path(),
            forecast_path: default_forecast_path(),
            horizon_days: default_horizon_days(),
            job_label: default_job_label(),
            high_tick_ms: default_high_tick_ms(),
            medium_tick_ms: default_medium_tick_ms(),
            low_tick_ms: default_low_tick_ms(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name(&file).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read agent configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon_days == 0 {
            anyhow::bail!("horizon_days must be at least 1");
        }
        for (name, ms) in [
            ("high_tick_ms", self.high_tick_ms),
            ("medium_tick_ms", self.medium_tick_ms),
            ("low_tick_ms", self.low_tick_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("{} must be positive", name);
            }
        }
        self.synthesizer_config()?;
        Ok(())
    }

    pub fn synthesizer_config(&self) -> Result<SynthesizerConfig> {
        self.synthesizer_config_at(SystemClock.now())
    }

    /// History window for synthesis, with unset bounds resolved against `now`
    pub fn synthesizer_config_at(&self, now: NaiveDateTime) -> Result<SynthesizerConfig> {
        let end = match &self.history_end {
            Some(raw) => parse_window_bound("history_end", raw)?,
            None => align_to_slot(now),
        };
        let window = SynthesizerConfig::ending_at(end);
        let start = match &self.history_start {
            Some(raw) => parse_window_bound("history_start", raw)?,
            None => window.start,
        };
        if end < start {
            anyhow::bail!("history_end {} precedes history_start {}", end, start);
        }
        Ok(SynthesizerConfig {
            start,
            seed: self.seed,
            ..window
        })
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            forecast: ForecastBuilder::new(self.horizon_days)?,
            ..PipelineConfig::default()
        })
    }

    pub fn computation_config(&self) -> ComputationConfig {
        ComputationConfig {
            high_tick: Duration::from_millis(self.high_tick_ms),
            medium_tick: Duration::from_millis(self.medium_tick_ms),
            low_tick: Duration::from_millis(self.low_tick_ms),
            job_label: self.job_label.clone(),
        }
    }
}

fn parse_window_bound(name: &str, raw: &str) -> Result<NaiveDateTime> {
    let timestamp = parse_timestamp(raw).with_context(|| format!("Invalid {}", name))?;
    if !is_slot_aligned(timestamp) {
        anyhow::bail!("{} {} is not on a 15-minute boundary", name, raw);
    }
    Ok(timestamp)
}
