// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use lift_core::domain::experiment::{ExperimentSpec, OutcomeRecord};

/// One experiment with its latest recorded outcome, as served by the daemon.
#[derive(Debug, Deserialize)]
pub struct ExperimentView {
    pub spec: ExperimentSpec,
    pub latest_outcome: Option<OutcomeRecord>,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        // No global timeout: the event-watch stream is long-lived
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, port)
        } else {
            format!("http://{}:{}", host, port)
        };

        Ok(Self { client, base_url })
    }

    pub async fn submit_experiment(
        &self,
        spec: &ExperimentSpec,
        requested_by: Option<String>,
    ) -> Result<String> {
        let mut body = serde_json::to_value(spec).context("Failed to serialize experiment")?;
        if let Some(who) = requested_by {
            body["requested_by"] = serde_json::Value::String(who);
        }

        let response = self
            .client
            .post(format!("{}/api/experiments", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to submit experiment")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to submit experiment: {}", error_text(response).await);
        }

        #[derive(Deserialize)]
        struct SubmitResponse {
            experiment_key: String,
        }

        let submit_response: SubmitResponse = response
            .json()
            .await
            .context("Failed to parse submit response")?;

        Ok(submit_response.experiment_key)
    }

    pub async fn list_experiments(&self) -> Result<Vec<ExperimentSpec>> {
        let response = self
            .client
            .get(format!("{}/api/experiments", self.base_url))
            .send()
            .await
            .context("Failed to list experiments")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list experiments: {}", error_text(response).await);
        }

        #[derive(Deserialize)]
        struct ListResponse {
            experiments: Vec<ExperimentSpec>,
        }

        let list_response: ListResponse = response
            .json()
            .await
            .context("Failed to parse experiment list")?;

        Ok(list_response.experiments)
    }

    pub async fn get_experiment(&self, key: &str) -> Result<Option<ExperimentView>> {
        let response = self
            .client
            .get(format!("{}/api/experiments/{}", self.base_url, key))
            .send()
            .await
            .context("Failed to get experiment")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!("Failed to get experiment: {}", error_text(response).await);
        }

        let view: ExperimentView = response
            .json()
            .await
            .context("Failed to parse experiment status")?;

        Ok(Some(view))
    }

    pub async fn stop_experiment(
        &self,
        key: &str,
        reason: Option<String>,
    ) -> Result<OutcomeRecord> {
        #[derive(Serialize)]
        struct StopRequest {
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<String>,
        }

        let response = self
            .client
            .post(format!("{}/api/experiments/{}/stop", self.base_url, key))
            .json(&StopRequest { reason })
            .send()
            .await
            .context("Failed to stop experiment")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to stop experiment: {}", error_text(response).await);
        }

        let outcome: OutcomeRecord = response
            .json()
            .await
            .context("Failed to parse stop outcome")?;

        Ok(outcome)
    }

    /// Open the SSE event stream for one experiment. The caller consumes the
    /// raw response body; frames arrive as `data: {json}` lines.
    pub async fn watch_events(&self, key: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(format!("{}/api/experiments/{}/events", self.base_url, key))
            .send()
            .await
            .context("Failed to open event stream")?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to open event stream: {}", error_text(response).await);
        }

        Ok(response)
    }
}

/// Best-effort extraction of the `error` field from an API error body.
async fn error_text(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(v) if v["error"].is_string() => v["error"].as_str().unwrap_or_default().to_string(),
        _ if !body.is_empty() => body,
        _ => format!("HTTP {}", status),
    }
}
