//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use forecast_lib::{
    computation::{ComputationConfig, ComputationController, ComputationManager},
    forecast::ForecastBuilder,
    health::{Component, HealthRegistry},
    observability::SchedulerMetrics,
    predictor::UsageClassifier,
    schedule::{plan_jobs, FiredJob, JobExecutor, JobScheduler, SystemClock},
    CalendarFeatures, UsageLabel,
};
use idle_agent::api::{create_router, AppState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Quiet nights, busy afternoons
struct ByHour;

impl UsageClassifier for ByHour {
    fn classify(&self, features: &CalendarFeatures) -> forecast_lib::Result<UsageLabel> {
        Ok(match features.hour {
            0..=5 => UsageLabel::Idle,
            6..=11 => UsageLabel::Medium,
            12..=17 => UsageLabel::VeryHigh,
            _ => UsageLabel::High,
        })
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _fired_rx: mpsc::Receiver<FiredJob>,
}

async fn setup_test_app() -> TestApp {
    let health_registry = HealthRegistry::new();
    health_registry.register_pipeline().await;
    for name in Component::ALL {
        health_registry.set_healthy(name).await;
    }

    let last_observed = NaiveDate::from_ymd_opt(2024, 1, 7)
        .unwrap()
        .and_hms_opt(23, 45, 0)
        .unwrap();
    let forecast = ForecastBuilder::new(1)
        .unwrap()
        .build(last_observed, &ByHour)
        .unwrap();
    let plan = plan_jobs(forecast.slots());

    let controller = Arc::new(ComputationController::new(
        ComputationConfig::default(),
        Arc::new(ComputationManager::new()),
    ));
    let executor: Arc<dyn JobExecutor> = controller.clone();
    let (scheduler, fired_rx) = JobScheduler::new(executor, Arc::new(SystemClock));
    let scheduler = Arc::new(scheduler);
    scheduler.schedule_all(plan.jobs.iter().copied());

    let state = Arc::new(
        AppState::new(
            health_registry,
            SchedulerMetrics::new(),
            Arc::new(forecast),
            controller,
        )
        .with_scheduler(scheduler)
        .with_model_version("abc123def456"),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        _fired_rx: fired_rx,
    }
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn post(app: &TestApp, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app().await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["classifier"].is_object());
    assert!(health["components"]["scheduler"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_degraded(Component::Scheduler, "Plan exhausted, restart to re-plan")
        .await;

    let (status, health) = get(&app, "/healthz").await;

    // Degraded still returns 200 (operational)
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app().await;

    app.state
        .health_registry
        .set_unhealthy(Component::Classifier, "Training failed")
        .await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_follows_readiness_flag() {
    let app = setup_test_app().await;

    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);

    app.state.health_registry.set_ready(true).await;

    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_readyz_returns_503_when_ready_but_unhealthy() {
    let app = setup_test_app().await;

    app.state.health_registry.set_ready(true).await;
    app.state
        .health_registry
        .set_unhealthy(Component::Forecast, "Failed")
        .await;

    let (status, _) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let app = setup_test_app().await;

    app.state.metrics.observe_prediction_latency(0.0002);
    app.state.metrics.set_model_version("abc123def456");
    app.state.metrics.set_forecast_slots(96);

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("idle_scheduler_prediction_latency_seconds_bucket"));
    assert!(metrics_text.contains("idle_scheduler_model_version_info"));
    assert!(metrics_text.contains("idle_scheduler_forecast_slots"));
}

#[tokio::test]
async fn test_forecast_lists_every_slot() {
    let app = setup_test_app().await;

    let (status, forecast) = get(&app, "/forecast").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(forecast["slot_count"], 96);
    assert_eq!(forecast["model_version"], "abc123def456");
    assert_eq!(forecast["label_counts"]["Idle"], 24);
    assert_eq!(forecast["label_counts"]["Very High Usage"], 24);

    let slots = forecast["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 96);
    assert_eq!(slots[0]["timestamp"], "2024-01-08 00:00:00");
    assert_eq!(slots[0]["end"], "2024-01-08 00:15:00");
    assert_eq!(slots[95]["timestamp"], "2024-01-08 23:45:00");
}

#[tokio::test]
async fn test_forecast_slot_lookup() {
    let app = setup_test_app().await;

    let (status, slot) = get(&app, "/forecast/slot?at=2024-01-08T13:07:00").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(slot["index"], 52);
    assert_eq!(slot["timestamp"], "2024-01-08 13:00:00");
    assert_eq!(slot["predicted_status"], 3);

    let (status, _) = get(&app, "/forecast/slot?at=2024-01-10T00:00").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(&app, "/forecast/slot?at=tomorrow").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("tomorrow"));
}

#[tokio::test]
async fn test_computation_reports_plan() {
    let app = setup_test_app().await;

    let (status, computation) = get(&app, "/computation").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(computation["state"]["state"], "idle");
    // 72 schedulable slots, each a start and a stop
    assert_eq!(computation["pending_jobs"], 144);
    assert_eq!(computation["next_job"]["run_at"], "2024-01-08T00:00:00");
    assert_eq!(computation["next_job"]["action"]["action"], "start");
    assert_eq!(computation["calculation_history"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_manual_start_and_stop() {
    let app = setup_test_app().await;

    let (status, outcome) = post(&app, "/computation/start", r#"{"intensity":"LOW"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "started");
    assert_eq!(outcome["intensity"], "LOW");

    let (_, outcome) = post(&app, "/computation/start", r#"{"intensity":"HIGH"}"#).await;
    assert_eq!(outcome["outcome"], "already_running");
    assert_eq!(outcome["intensity"], "LOW");

    let (_, computation) = get(&app, "/computation").await;
    assert_eq!(computation["state"]["state"], "running");
    assert_eq!(computation["state"]["intensity"], "LOW");

    let (status, outcome) = post(&app, "/computation/stop", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["outcome"], "stopped");

    let (_, outcome) = post(&app, "/computation/stop", "").await;
    assert_eq!(outcome["outcome"], "already_idle");

    app.state.controller.shutdown().await;
    let (_, computation) = get(&app, "/computation").await;
    assert_eq!(computation["calculation_history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_rejected_after_shutdown() {
    let app = setup_test_app().await;
    app.state.controller.shutdown().await;

    let (status, _) = post(&app, "/computation/start", r#"{"intensity":"MEDIUM"}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_start_rejects_unknown_intensity() {
    let app = setup_test_app().await;

    let (status, _) = post(&app, "/computation/start", r#"{"intensity":"TURBO"}"#).await;
    assert!(status.is_client_error());
}
