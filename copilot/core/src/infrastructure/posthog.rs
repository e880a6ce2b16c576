// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostHog Metrics Source
//!
//! Queries experiment observations out of PostHog with HogQL. Exposures come
//! from `$feature_flag_called` events split by flag response; conversions and
//! mean observations come from the metric's source event split by the
//! `ab_variant` property stamped by the client SDK.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Analytics backend adapter
//! - **Pattern:** Anti-Corruption Layer for the PostHog query API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::domain::analysis::{MeanSamples, RateCounts};
use crate::domain::experiment::ExperimentSpec;
use crate::domain::metrics::{MetricsError, MetricsSource};

const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

pub struct PosthogMetricsSource {
    client: Client,
    base_url: String,
    project_id: String,
    api_key: String,
    lookback_days: u32,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<Vec<serde_json::Value>>,
}

impl PosthogMetricsSource {
    pub fn new(
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        api_key: impl Into<String>,
        lookback_days: u32,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            project_id: project_id.into(),
            api_key: api_key.into(),
            lookback_days,
        }
    }

    async fn run_query(&self, query: String) -> Result<Vec<Vec<serde_json::Value>>, MetricsError> {
        let url = format!(
            "{}/api/projects/{}/query",
            self.base_url.trim_end_matches('/'),
            self.project_id
        );
        debug!(query = %query, "Running HogQL query");

        let body = serde_json::json!({
            "query": { "kind": "HogQLQuery", "query": query }
        });

        let response = self
            .client
            .post(&url)
            .timeout(QUERY_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| MetricsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            return Err(if status == 401 || status == 403 {
                MetricsError::Authentication(error_text)
            } else if status == 429 {
                MetricsError::RateLimit
            } else {
                MetricsError::Query(format!("HTTP {}: {}", status, error_text))
            });
        }

        let payload: QueryResponse = response
            .json()
            .await
            .map_err(|e| MetricsError::InvalidResponse(e.to_string()))?;

        Ok(payload.results)
    }

    /// Sum `(variant, count)` rows into (control, treatment); rows for any
    /// other flag response value are ignored.
    fn split_counts(rows: &[Vec<serde_json::Value>]) -> (u64, u64) {
        let mut control = 0;
        let mut treatment = 0;
        for row in rows {
            let variant = row.first().and_then(|v| v.as_str()).unwrap_or_default();
            let count = row.get(1).and_then(Self::as_count).unwrap_or(0);
            match variant {
                "control" => control += count,
                "treatment" => treatment += count,
                _ => {}
            }
        }
        (control, treatment)
    }

    fn as_count(value: &serde_json::Value) -> Option<u64> {
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    fn as_observation(value: &serde_json::Value) -> Option<f64> {
        value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    fn quoted(value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}

#[async_trait]
impl MetricsSource for PosthogMetricsSource {
    async fn rate_counts(&self, spec: &ExperimentSpec) -> Result<RateCounts, MetricsError> {
        let exposures = self
            .run_query(format!(
                "SELECT properties.$feature_flag_response AS variant, count() AS exposures \
                 FROM events \
                 WHERE event = '$feature_flag_called' \
                 AND properties.$feature_flag = {} \
                 AND timestamp >= now() - INTERVAL {} DAY \
                 GROUP BY variant",
                Self::quoted(&spec.flag_key()),
                self.lookback_days
            ))
            .await?;

        let conversions = self
            .run_query(format!(
                "SELECT properties.ab_variant AS variant, count() AS conversions \
                 FROM events \
                 WHERE event = {} \
                 AND properties.experiment_key = {} \
                 AND timestamp >= now() - INTERVAL {} DAY \
                 GROUP BY variant",
                Self::quoted(&spec.primary_metric.event),
                Self::quoted(spec.key.as_str()),
                self.lookback_days
            ))
            .await?;

        let (total_control, total_treatment) = Self::split_counts(&exposures);
        let (successes_control, successes_treatment) = Self::split_counts(&conversions);

        Ok(RateCounts::new(
            successes_control.min(total_control),
            total_control,
            successes_treatment.min(total_treatment),
            total_treatment,
        ))
    }

    async fn mean_samples(&self, spec: &ExperimentSpec) -> Result<MeanSamples, MetricsError> {
        let property = spec.primary_metric.property.as_deref().ok_or_else(|| {
            MetricsError::Query(format!(
                "Mean metric '{}' has no value property",
                spec.primary_metric.name
            ))
        })?;

        let rows = self
            .run_query(format!(
                "SELECT properties.ab_variant AS variant, properties.{} AS value \
                 FROM events \
                 WHERE event = {} \
                 AND properties.experiment_key = {} \
                 AND properties.{} IS NOT NULL \
                 AND timestamp >= now() - INTERVAL {} DAY",
                property,
                Self::quoted(&spec.primary_metric.event),
                Self::quoted(spec.key.as_str()),
                property,
                self.lookback_days
            ))
            .await?;

        let mut control = Vec::new();
        let mut treatment = Vec::new();
        for row in &rows {
            let variant = row.first().and_then(|v| v.as_str()).unwrap_or_default();
            let Some(value) = row.get(1).and_then(Self::as_observation) else {
                continue;
            };
            match variant {
                "control" => control.push(value),
                "treatment" => treatment.push(value),
                _ => {}
            }
        }

        Ok(MeanSamples::new(control, treatment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::Metric;
    use mockito::Matcher;

    fn rate_spec() -> ExperimentSpec {
        ExperimentSpec::new(
            "checkout_cta_color",
            "Green CTA converts better",
            Metric::rate("purchase_conversion", "purchase_completed"),
        )
    }

    #[tokio::test]
    async fn test_rate_counts_joins_exposures_and_conversions() {
        let mut server = mockito::Server::new_async().await;

        let exposures = server
            .mock("POST", "/api/projects/42/query")
            .match_header("authorization", "Bearer phx_test")
            .match_body(Matcher::Regex("feature_flag_called".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [["control", 5000], ["treatment", 5000]]}"#)
            .create_async()
            .await;
        let conversions = server
            .mock("POST", "/api/projects/42/query")
            .match_body(Matcher::Regex("purchase_completed".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [["control", 480], ["treatment", 560]]}"#)
            .create_async()
            .await;

        let source = PosthogMetricsSource::new(server.url(), "42", "phx_test", 30);
        let counts = source.rate_counts(&rate_spec()).await.unwrap();

        assert_eq!(counts.control.successes, 480);
        assert_eq!(counts.control.total, 5000);
        assert_eq!(counts.treatment.successes, 560);
        assert_eq!(counts.treatment.total, 5000);

        exposures.assert_async().await;
        conversions.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_counts_missing_variant_rows_default_to_zero() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/api/projects/42/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [["treatment", 120], ["", 7]]}"#)
            .create_async()
            .await;

        let source = PosthogMetricsSource::new(server.url(), "42", "phx_test", 30);
        let counts = source.rate_counts(&rate_spec()).await.unwrap();

        assert_eq!(counts.control.total, 0);
        assert_eq!(counts.treatment.total, 120);
    }

    #[tokio::test]
    async fn test_mean_samples_partitions_by_variant() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/api/projects/42/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            // Numbers may arrive as JSON numbers or strings
            .with_body(
                r#"{"results": [["control", 310.0], ["treatment", "295.5"], ["control", 330.0]]}"#,
            )
            .create_async()
            .await;

        let spec = ExperimentSpec::new(
            "checkout_latency",
            "New cache lowers checkout latency",
            Metric::mean("checkout_latency", "checkout_completed", "duration_ms"),
        );

        let source = PosthogMetricsSource::new(server.url(), "42", "phx_test", 30);
        let samples = source.mean_samples(&spec).await.unwrap();

        assert_eq!(samples.control, vec![310.0, 330.0]);
        assert_eq!(samples.treatment, vec![295.5]);
    }

    #[tokio::test]
    async fn test_mean_metric_without_property_is_a_query_error() {
        let server = mockito::Server::new_async().await;
        let mut spec = rate_spec();
        spec.primary_metric.kind = crate::domain::experiment::MetricKind::Mean;

        let source = PosthogMetricsSource::new(server.url(), "42", "phx_test", 30);
        let err = source.mean_samples(&spec).await.unwrap_err();
        assert!(matches!(err, MetricsError::Query(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_authentication_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/api/projects/42/query")
            .with_status(401)
            .with_body(r#"{"detail": "Invalid personal API key"}"#)
            .create_async()
            .await;

        let source = PosthogMetricsSource::new(server.url(), "42", "phx_bad", 30);
        let err = source.rate_counts(&rate_spec()).await.unwrap_err();
        assert!(matches!(err, MetricsError::Authentication(_)));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_query_error() {
        let mut server = mockito::Server::new_async().await;

        server
            .mock("POST", "/api/projects/42/query")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let source = PosthogMetricsSource::new(server.url(), "42", "phx_test", 30);
        let err = source.rate_counts(&rate_spec()).await.unwrap_err();
        assert!(matches!(err, MetricsError::Query(_)));
    }
}
