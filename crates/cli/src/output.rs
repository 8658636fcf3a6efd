//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use forecast_lib::{ComputationState, Intensity, JobAction, UsageLabel};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return;
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => print_json(&items),
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => print_error(&format!("Failed to serialize output: {}", e)),
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a ratio as percentage
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Color a usage label by how much room it leaves for background work
pub fn color_label(label: UsageLabel) -> String {
    match label {
        UsageLabel::Idle => label.name().green().to_string(),
        UsageLabel::Medium => label.name().cyan().to_string(),
        UsageLabel::High => label.name().yellow().to_string(),
        UsageLabel::VeryHigh => label.name().red().to_string(),
    }
}

pub fn color_intensity(intensity: Intensity) -> String {
    match intensity {
        Intensity::High => intensity.as_str().green().bold().to_string(),
        Intensity::Medium => intensity.as_str().cyan().to_string(),
        Intensity::Low => intensity.as_str().yellow().to_string(),
    }
}

pub fn format_action(action: &JobAction) -> String {
    match action {
        JobAction::Start(intensity) => format!("start {}", color_intensity(*intensity)),
        JobAction::Stop => "stop".dimmed().to_string(),
    }
}

pub fn format_state(state: &ComputationState) -> String {
    match state {
        ComputationState::Idle => "idle".dimmed().to_string(),
        ComputationState::Running(intensity) => {
            format!("{} ({})", "running".green(), color_intensity(*intensity))
        }
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "running" => status.green().to_string(),
        "degraded" | "warning" => status.yellow().to_string(),
        "unhealthy" | "error" | "failed" => status.red().to_string(),
        _ => status.to_string(),
    }
}
