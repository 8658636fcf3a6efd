//! Idle Agent - idle-time computation scheduler
//!
//! Forecasts CPU usage for the coming week and runs background computation
//! only in the slots predicted to be quiet enough.

use anyhow::Result;
use forecast_lib::{
    health::{Component, HealthRegistry},
    observability::{SchedulerMetrics, StructuredLogger},
};
use idle_agent::{api, config::AgentConfig, startup};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting idle-agent");

    let config = AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        history = ?config.history_path,
        horizon_days = config.horizon_days,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_pipeline().await;

    let metrics = SchedulerMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION);

    let runtime = match startup::start(&config, &health_registry, &logger).await {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Startup pipeline failed");
            health_registry
                .set_unhealthy(Component::Classifier, e.to_string())
                .await;
            return Err(e);
        }
    };
    startup::publish_initial_metrics(&runtime);

    let startup::AgentRuntime {
        forecast,
        predictor,
        controller,
        scheduler,
        fired_rx,
    } = runtime;

    let mut app_state = api::AppState::new(
        health_registry.clone(),
        metrics,
        forecast,
        controller.clone(),
    )
    .with_scheduler(scheduler.clone());
    if let Some(version) = predictor.model_version() {
        app_state = app_state.with_model_version(version);
    }
    let app_state = Arc::new(app_state);

    let (shutdown_tx, _) = broadcast::channel(1);

    let dispatcher_handle = tokio::spawn(scheduler.clone().run(shutdown_tx.subscribe()));
    let watcher_handle = tokio::spawn(startup::watch_fired_jobs(
        fired_rx,
        scheduler,
        health_registry.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = dispatcher_handle.await {
        error!(error = %e, "Dispatcher task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }
    controller.shutdown().await;
    watcher_handle.abort();

    logger.log_shutdown("SIGINT received");
    Ok(())
}
