//! Commands that talk to a running agent

use anyhow::Result;
use colored::Colorize;
use forecast_lib::computation::{StartOutcome, StopOutcome};
use forecast_lib::models::format_timestamp;
use forecast_lib::Intensity;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, ComputationResponse, HealthResponse, SlotView};
use crate::output::{
    color_intensity, color_label, color_status, format_action, format_state, print_info,
    print_json, print_success, print_table, print_warning, OutputFormat,
};

#[derive(Tabled, Serialize)]
struct HistoryRow {
    #[tabled(rename = "Run")]
    name: String,
    #[tabled(rename = "Started")]
    date: String,
    #[tabled(rename = "Intensity")]
    intensity: String,
    #[tabled(rename = "Cycles")]
    score: u64,
    #[tabled(rename = "CPU Time")]
    cpu_time: String,
}

/// Show agent health, computation state and run history
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthResponse = client.get("healthz").await?;
    let computation: ComputationResponse = client.get("computation").await?;

    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Status<'a> {
                health: &'a HealthResponse,
                computation: &'a ComputationResponse,
            }
            print_json(&Status {
                health: &health,
                computation: &computation,
            });
        }
        OutputFormat::Table => {
            println!("{}", "Agent Status".bold());
            println!("{}", "=".repeat(50));
            println!("Health:          {}", color_status(&health.status));
            for (name, component) in &health.components {
                let detail = component
                    .message
                    .as_deref()
                    .map(|m| format!(" ({})", m))
                    .unwrap_or_default();
                println!("  {:<14} {}{}", name, color_status(&component.status), detail);
            }
            println!();

            println!("{}", "Computation".bold());
            println!("{}", "-".repeat(50));
            println!("State:           {}", format_state(&computation.state));
            let current = &computation.current_calculation;
            if let Some(run_id) = current.run_id {
                println!(
                    "Current run:     #{} {} cycle {}",
                    run_id,
                    current.label.as_deref().unwrap_or("-"),
                    current.cycle
                );
            }
            if let Some(pending) = computation.pending_jobs {
                println!("Pending jobs:    {}", pending);
            }
            match &computation.next_job {
                Some(job) => println!(
                    "Next job:        {} at {}",
                    format_action(&job.action),
                    format_timestamp(job.run_at)
                ),
                None => println!("Next job:        {}", "none".dimmed()),
            }
            println!();

            if computation.calculation_history.is_empty() {
                print_info("No computation has run yet");
                return Ok(());
            }

            let rows: Vec<HistoryRow> = computation
                .calculation_history
                .iter()
                .map(|r| HistoryRow {
                    name: r.name.clone(),
                    date: format_timestamp(r.date),
                    intensity: color_intensity(r.intensity),
                    score: r.score,
                    cpu_time: format!("{:.1}s", r.cpu_time_secs),
                })
                .collect();
            print_table(&rows, format);
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct StartRequest {
    intensity: Intensity,
}

/// Start background computation on the agent
pub async fn start_computation(
    client: &ApiClient,
    intensity: Intensity,
    format: OutputFormat,
) -> Result<()> {
    let outcome: StartOutcome = client
        .post("computation/start", &StartRequest { intensity })
        .await?;

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Table => match outcome {
            StartOutcome::Started { run_id, intensity } => print_success(&format!(
                "Started run #{} at {}",
                run_id,
                color_intensity(intensity)
            )),
            StartOutcome::AlreadyRunning { intensity } => print_warning(&format!(
                "Computation already running at {}",
                color_intensity(intensity)
            )),
            StartOutcome::Closed => print_warning("Agent is shutting down"),
        },
    }

    Ok(())
}

/// Stop background computation on the agent
pub async fn stop_computation(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let outcome: StopOutcome = client.post("computation/stop", &()).await?;

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Table => match outcome {
            StopOutcome::Stopped { run_id, intensity } => print_success(&format!(
                "Stopped run #{} ({})",
                run_id,
                color_intensity(intensity)
            )),
            StopOutcome::AlreadyIdle => print_info("No computation was running"),
        },
    }

    Ok(())
}

/// Look up the forecast slot covering an instant
pub async fn show_slot(client: &ApiClient, at: &str, format: OutputFormat) -> Result<()> {
    let slot: SlotView = client.get_with_query("forecast/slot", &[("at", at)]).await?;

    match format {
        OutputFormat::Json => print_json(&slot),
        OutputFormat::Table => {
            println!("{}", "Forecast Slot".bold());
            println!("{}", "=".repeat(50));
            println!("Slot:            #{}", slot.index);
            println!("Window:          {} to {}", slot.timestamp, slot.end);
            println!("Predicted:       {}", color_label(slot.predicted_label));
            match slot.predicted_label.permitted_intensity() {
                Some(intensity) => {
                    println!("Computation:     {}", color_intensity(intensity))
                }
                None => println!("Computation:     {}", "none".red()),
            }
        }
    }

    Ok(())
}
