// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Slack Notifier
//!
//! Posts experiment milestones to a Slack incoming webhook: one message when
//! a spec is registered for monitoring, one when a terminal decision lands.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Notification sink
//! - **Pattern:** Anti-Corruption Layer for the Slack webhook API

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::domain::experiment::{Decision, ExperimentSpec, OutcomeRecord};
use crate::domain::notifier::{DecisionNotifier, NotifyError};
use crate::infrastructure::format;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
    channel: Option<String>,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
}

impl SlackNotifier {
    pub fn new(webhook_url: impl Into<String>, channel: Option<String>) -> Self {
        Self {
            client: Client::new(),
            webhook_url: webhook_url.into(),
            channel,
        }
    }

    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let payload = WebhookMessage {
            text: message,
            channel: self.channel.as_deref(),
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .timeout(NOTIFY_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        info!("Sent Slack message via webhook");
        Ok(())
    }

    fn decision_emoji(decision: Decision) -> &'static str {
        match decision {
            Decision::ShipTreatment => "✅",
            Decision::ShipControl => "❌",
            Decision::Extend => "⏳",
            Decision::Stop => "🛑",
        }
    }
}

#[async_trait]
impl DecisionNotifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn notify_registered(&self, spec: &ExperimentSpec) -> Result<(), NotifyError> {
        let message = format!(
            "\n🚀 *Experiment Update: {}*\nStatus: specification_complete\nDetails: {}\nTime: {}",
            spec.key,
            spec.hypothesis,
            Utc::now().format(TIME_FORMAT),
        );
        self.send(&message).await
    }

    async fn notify_decision(
        &self,
        spec: &ExperimentSpec,
        outcome: &OutcomeRecord,
    ) -> Result<(), NotifyError> {
        let message = format!(
            "\n{} *Experiment Decision: {}*\nDecision: {}\nConfidence: {}\nSample Size: {}\nTime: {}\n",
            Self::decision_emoji(outcome.decision),
            spec.key,
            outcome.decision.title(),
            format::percent(outcome.confidence),
            format::thousands(outcome.final_sample_size),
            outcome.recorded_at.format(TIME_FORMAT),
        );
        self.send(&message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::Metric;
    use mockito::Matcher;

    fn spec() -> ExperimentSpec {
        ExperimentSpec::new(
            "checkout_cta_color",
            "Green CTA converts better",
            Metric::rate("purchase_conversion", "purchase_completed"),
        )
    }

    #[tokio::test]
    async fn test_decision_message_carries_formatted_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(serde_json::json!({"channel": "#growth-experiments"})),
                Matcher::Regex("✅ \\*Experiment Decision: checkout_cta_color\\*".to_string()),
                Matcher::Regex("Decision: Ship Treatment".to_string()),
                Matcher::Regex("Confidence: 99.5%".to_string()),
                Matcher::Regex("Sample Size: 10,000".to_string()),
            ]))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let notifier =
            SlackNotifier::new(server.url(), Some("#growth-experiments".to_string()));
        let outcome = OutcomeRecord::new(
            "checkout_cta_color".into(),
            Decision::ShipTreatment,
            0.995,
            10_000,
            "Strong evidence treatment is better",
        );

        notifier.notify_decision(&spec(), &outcome).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_registered_message_reports_specification_complete() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("🚀 \\*Experiment Update: checkout_cta_color\\*".to_string()),
                Matcher::Regex("Status: specification_complete".to_string()),
                Matcher::Regex("Details: Green CTA converts better".to_string()),
            ]))
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let notifier = SlackNotifier::new(server.url(), None);
        notifier.notify_registered(&spec()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_webhook_failure_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(500)
            .with_body("invalid_payload")
            .create_async()
            .await;

        let notifier = SlackNotifier::new(server.url(), None);
        let outcome = OutcomeRecord::new(
            "checkout_cta_color".into(),
            Decision::Stop,
            0.0,
            100,
            "test_error: zero variance",
        );

        let err = notifier
            .notify_decision(&spec(), &outcome)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Api(_)));
    }
}
