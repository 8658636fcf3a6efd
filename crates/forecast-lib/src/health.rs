//! Component health tracking
//!
//! Backs the agent's liveness and readiness probes. Every pipeline stage
//! starts out degraded and reports in once its startup work is done; the
//! agent becomes ready when the dispatcher has been populated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, e.g. starting up or running out of planned jobs
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

/// Pipeline stages tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Classifier,
    Forecast,
    Scheduler,
    Controller,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Classifier,
        Component::Forecast,
        Component::Scheduler,
        Component::Controller,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Classifier => "classifier",
            Component::Forecast => "forecast",
            Component::Scheduler => "scheduler",
            Component::Controller => "controller",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest report from one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When this status was reported
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status among the components, healthy when there are none
    pub fn compute_status(components: &BTreeMap<Component, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Components that have not reported healthy yet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waiting_on: Vec<Component>,
}

/// Shared registry of component health plus the readiness flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<Component, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every pipeline stage as degraded until it reports in
    pub async fn register_pipeline(&self) {
        let mut components = self.components.write().await;
        for component in Component::ALL {
            components.insert(component, ComponentHealth::degraded("starting"));
        }
    }

    pub async fn update(&self, component: Component, health: ComponentHealth) {
        self.components.write().await.insert(component, health);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.update(component, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.update(component, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.update(component, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = self.is_ready().await;
        let health = self.health().await;

        let waiting_on: Vec<Component> = health
            .components
            .iter()
            .filter(|(_, h)| h.status != ComponentStatus::Healthy)
            .map(|(component, _)| *component)
            .collect();
        let failed: Vec<&str> = health
            .components
            .iter()
            .filter(|(_, h)| !h.status.is_operational())
            .map(|(component, _)| component.as_str())
            .collect();

        let reason = if !failed.is_empty() {
            Some(format!("Unhealthy components: {}", failed.join(", ")))
        } else if !ready {
            Some("Schedule not yet populated".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
            waiting_on,
        }
    }
}
