//! API client for communicating with a running idle-agent

use anyhow::{Context, Result};
use forecast_lib::computation::{CalculationRecord, CurrentCalculation};
use forecast_lib::{CalendarFeatures, ComputationState, ScheduledJob, UsageLabel};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// API client for the agent HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        self.get_url(url).await
    }

    /// Make a GET request with query parameters
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut url = self.base_url.join(path).context("Invalid path")?;
        url.query_pairs_mut().extend_pairs(query);
        self.get_url(url).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotView {
    pub index: usize,
    pub timestamp: String,
    pub end: String,
    pub features: CalendarFeatures,
    pub predicted_status: usize,
    pub predicted_label: UsageLabel,
    pub predicted_label_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub model_version: Option<String>,
    pub slot_count: usize,
    pub label_counts: BTreeMap<String, usize>,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationResponse {
    pub state: ComputationState,
    pub current_calculation: CurrentCalculation,
    pub calculation_history: Vec<CalculationRecord>,
    pub pending_jobs: Option<usize>,
    pub next_job: Option<ScheduledJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}
