//! File based commands that run the pipeline stages without an agent

use anyhow::{Context, Result};
use colored::Colorize;
use forecast_lib::forecast::{ForecastBuilder, ForecastTable};
use forecast_lib::models::{format_timestamp, parse_timestamp};
use forecast_lib::predictor::{
    load_model, prepare_samples, save_model, Trainer, TrainingConfig, TrainingReport,
    UsagePredictor,
};
use forecast_lib::schedule::plan_jobs;
use forecast_lib::synth::{read_history_file, write_history_file, SynthesizerConfig, UsageSynthesizer};
use forecast_lib::{JobAction, UsageLabel};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_label, format_action, format_percent, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat,
};

/// Synthesize a usage history CSV
pub fn generate_history(
    output: &Path,
    start: Option<&str>,
    end: Option<&str>,
    seed: u64,
    format: OutputFormat,
) -> Result<()> {
    let defaults = SynthesizerConfig::default();
    let config = SynthesizerConfig {
        start: start.map(parse_timestamp).transpose()?.unwrap_or(defaults.start),
        end: end.map(parse_timestamp).transpose()?.unwrap_or(defaults.end),
        seed,
        ..defaults
    };

    let mut synthesizer = UsageSynthesizer::new(config)?;
    let samples = synthesizer.generate();
    write_history_file(output, &samples)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    #[derive(Serialize)]
    struct Generated<'a> {
        path: &'a Path,
        rows: usize,
        first: Option<String>,
        last: Option<String>,
    }

    let summary = Generated {
        path: output,
        rows: samples.len(),
        first: samples.first().map(|s| format_timestamp(s.timestamp)),
        last: samples.last().map(|s| format_timestamp(s.timestamp)),
    };

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            print_success(&format!(
                "Wrote {} samples to {}",
                summary.rows,
                output.display()
            ));
            if let (Some(first), Some(last)) = (&summary.first, &summary.last) {
                print_info(&format!("Covering {} to {}", first, last));
            }
        }
    }

    Ok(())
}

#[derive(Tabled, Serialize)]
struct ClassRow {
    #[tabled(rename = "Class")]
    label: String,
    #[tabled(rename = "Precision")]
    precision: String,
    #[tabled(rename = "Recall")]
    recall: String,
    #[tabled(rename = "F1")]
    f1: String,
    #[tabled(rename = "Support")]
    support: usize,
}

/// Train a classifier on a history CSV and save the artifact
pub fn train_model(
    history: &Path,
    model_path: &Path,
    test_fraction: f64,
    format: OutputFormat,
) -> Result<()> {
    let samples = read_history_file(history)
        .with_context(|| format!("Failed to read {}", history.display()))?;
    let labeled = prepare_samples(&samples);

    let trainer = Trainer::new(TrainingConfig {
        test_fraction,
        ..TrainingConfig::default()
    });
    let (model, report) = trainer.train(&labeled)?;
    let artifact = save_model(model_path, &model, Some(&report))?;

    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct Trained<'a> {
                artifact: &'a forecast_lib::predictor::ArtifactInfo,
                report: &'a TrainingReport,
            }
            print_json(&Trained {
                artifact: &artifact,
                report: &report,
            });
        }
        OutputFormat::Table => {
            println!("{}", "Training Report".bold());
            println!("{}", "=".repeat(50));
            println!("Train samples:   {}", report.train_size);
            println!("Test samples:    {}", report.test_size);
            println!(
                "Accuracy:        {}",
                report
                    .evaluation
                    .accuracy
                    .map(format_percent)
                    .unwrap_or_else(|| "n/a".to_string())
            );
            println!("Duration:        {} ms", report.duration_ms);
            println!();

            if report.degenerate {
                print_warning("Training data holds a single class; predictions are constant");
            }

            let rows: Vec<ClassRow> = report
                .evaluation
                .per_class
                .iter()
                .map(|m| ClassRow {
                    label: color_label(m.label),
                    precision: format_percent(m.precision),
                    recall: format_percent(m.recall),
                    f1: format!("{:.3}", m.f1),
                    support: m.support,
                })
                .collect();
            print_table(&rows, format);
            println!();
            print_success(&format!(
                "Saved model {} to {}",
                artifact.version.cyan(),
                model_path.display()
            ));
        }
    }

    Ok(())
}

#[derive(Tabled, Serialize)]
struct LabelRow {
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Slots")]
    slots: usize,
    #[tabled(rename = "Share")]
    share: String,
}

/// Predict the slots following the model's training data
pub fn build_forecast(
    model_path: &Path,
    output: &Path,
    horizon_days: u32,
    after: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let (model, artifact) = load_model(model_path)
        .with_context(|| format!("Failed to load model {}", model_path.display()))?;
    let last_observed = match after {
        Some(raw) => parse_timestamp(raw)?,
        None => model.last_observed(),
    };
    let predictor = UsagePredictor::with_model(model, artifact.version.clone());

    let forecast = ForecastBuilder::new(horizon_days)?.build(last_observed, &predictor)?;
    forecast
        .write_file(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let counts = forecast.label_counts();
    let rows: Vec<LabelRow> = UsageLabel::ALL
        .iter()
        .zip(counts)
        .map(|(&label, slots)| LabelRow {
            label: match format {
                OutputFormat::Table => color_label(label),
                OutputFormat::Json => label.name().to_string(),
            },
            slots,
            share: format_percent(slots as f64 / forecast.len().max(1) as f64),
        })
        .collect();

    match format {
        OutputFormat::Json => print_table(&rows, format),
        OutputFormat::Table => {
            println!("{}", "Forecast".bold());
            println!("{}", "=".repeat(50));
            println!("Model:   {}", artifact.version.cyan());
            if let (Some(first), Some(last)) = (forecast.first(), forecast.last()) {
                println!("From:    {}", format_timestamp(first.timestamp));
                println!("To:      {}", format_timestamp(last.end()));
            }
            println!();
            print_table(&rows, format);
            println!();
            print_success(&format!(
                "Wrote {} slots to {}",
                forecast.len(),
                output.display()
            ));
        }
    }

    Ok(())
}

#[derive(Tabled, Serialize)]
struct JobRow {
    #[tabled(rename = "Job")]
    id: String,
    #[tabled(rename = "Run At")]
    run_at: String,
    #[tabled(rename = "Action")]
    action: String,
}

/// Show the start/stop jobs derived from a forecast CSV
pub fn show_plan(forecast_path: &Path, limit: Option<usize>, format: OutputFormat) -> Result<()> {
    let forecast = ForecastTable::read_file(forecast_path)
        .with_context(|| format!("Failed to read {}", forecast_path.display()))?;
    let plan = plan_jobs(forecast.slots());

    match format {
        OutputFormat::Json => print_json(&plan),
        OutputFormat::Table => {
            let shown = limit.unwrap_or(plan.len()).min(plan.len());
            let rows: Vec<JobRow> = plan.jobs[..shown]
                .iter()
                .map(|job| JobRow {
                    id: job.id.to_string(),
                    run_at: format_timestamp(job.run_at),
                    action: format_action(&job.action),
                })
                .collect();
            print_table(&rows, format);

            let starts = plan
                .jobs
                .iter()
                .filter(|j| matches!(j.action, JobAction::Start(_)))
                .count();
            println!(
                "\nTotal: {} jobs ({} runs), {} slots skipped",
                plan.len(),
                starts,
                plan.skipped_slots.len()
            );
            if shown < plan.len() {
                print_info(&format!("Showing first {} jobs", shown));
            }
        }
    }

    Ok(())
}
