//! HTTP API for health checks, metrics, the forecast and computation control

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDateTime;
use forecast_lib::{
    computation::{
        CalculationRecord, ComputationController, CurrentCalculation, StartOutcome, StopOutcome,
    },
    forecast::ForecastTable,
    health::{ComponentStatus, HealthRegistry},
    models::{format_timestamp, parse_timestamp, CalendarFeatures, ForecastSlot, UsageLabel},
    observability::SchedulerMetrics,
    schedule::JobScheduler,
    ComputationState, ForecastError, Intensity, ScheduledJob,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: SchedulerMetrics,
    pub forecast: Arc<ForecastTable>,
    pub controller: Arc<ComputationController>,
    pub scheduler: Option<Arc<JobScheduler>>,
    pub model_version: Option<String>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: SchedulerMetrics,
        forecast: Arc<ForecastTable>,
        controller: Arc<ComputationController>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            forecast,
            controller,
            scheduler: None,
            model_version: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<ForecastError> for ApiError {
    fn from(err: ForecastError) -> Self {
        let status = match &err {
            ForecastError::NoForecastForInstant(_) => StatusCode::NOT_FOUND,
            ForecastError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ForecastError::ModelUnavailable(_) | ForecastError::ChecksumMismatch { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// One forecast slot as served over HTTP
#[derive(Debug, Serialize, Deserialize)]
pub struct SlotView {
    pub index: usize,
    pub timestamp: String,
    pub end: String,
    pub features: CalendarFeatures,
    pub predicted_status: usize,
    pub predicted_label: UsageLabel,
    pub predicted_label_name: String,
}

impl SlotView {
    fn new(index: usize, slot: &ForecastSlot) -> Self {
        Self {
            index,
            timestamp: format_timestamp(slot.timestamp),
            end: format_timestamp(slot.end()),
            features: slot.features,
            predicted_status: slot.predicted_label.index(),
            predicted_label: slot.predicted_label,
            predicted_label_name: slot.predicted_label_name().to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub model_version: Option<String>,
    pub slot_count: usize,
    pub label_counts: BTreeMap<String, usize>,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComputationResponse {
    pub state: ComputationState,
    pub current_calculation: CurrentCalculation,
    pub calculation_history: Vec<CalculationRecord>,
    pub pending_jobs: Option<usize>,
    pub next_job: Option<ScheduledJob>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRequest {
    pub intensity: Intensity,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

async fn forecast(State(state): State<Arc<AppState>>) -> Json<ForecastResponse> {
    let label_counts = UsageLabel::ALL
        .iter()
        .zip(state.forecast.label_counts())
        .map(|(label, count)| (label.name().to_string(), count))
        .collect();

    Json(ForecastResponse {
        model_version: state.model_version.clone(),
        slot_count: state.forecast.len(),
        label_counts,
        slots: state
            .forecast
            .slots()
            .iter()
            .enumerate()
            .map(|(i, slot)| SlotView::new(i, slot))
            .collect(),
    })
}

async fn forecast_slot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotQuery>,
) -> Result<Json<SlotView>, ApiError> {
    let instant: NaiveDateTime = parse_timestamp(&query.at)?;
    let slot = state.forecast.slot_at(instant)?;
    let index = state
        .forecast
        .slots()
        .partition_point(|s| s.timestamp < slot.timestamp);
    Ok(Json(SlotView::new(index, slot)))
}

fn computation_response(state: &AppState) -> ComputationResponse {
    let snapshot = state.controller.manager().snapshot();
    ComputationResponse {
        state: state.controller.state(),
        current_calculation: snapshot.current_calculation,
        calculation_history: snapshot.calculation_history,
        pending_jobs: state.scheduler.as_ref().map(|s| s.pending()),
        next_job: state.scheduler.as_ref().and_then(|s| s.next_due()),
    }
}

async fn computation(State(state): State<Arc<AppState>>) -> Json<ComputationResponse> {
    Json(computation_response(&state))
}

async fn start_computation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<StartOutcome>, ApiError> {
    match state.controller.start(request.intensity) {
        StartOutcome::Closed => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "agent is shutting down",
        )),
        outcome => {
            info!(?outcome, "Manual computation start");
            Ok(Json(outcome))
        }
    }
}

async fn stop_computation(State(state): State<Arc<AppState>>) -> Json<StopOutcome> {
    let outcome = state.controller.stop();
    info!(?outcome, "Manual computation stop");
    Json(outcome)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/forecast", get(forecast))
        .route("/forecast/slot", get(forecast_slot))
        .route("/computation", get(computation))
        .route("/computation/start", post(start_computation))
        .route("/computation/stop", post(stop_computation))
        .with_state(state)
}

/// Start the API server, returning once `shutdown` fires
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if shutdown.recv().await.is_err() {
                warn!("Shutdown channel closed");
            }
        })
        .await?;

    Ok(())
}
