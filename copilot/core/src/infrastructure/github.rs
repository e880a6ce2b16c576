// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! GitHub Notifier
//!
//! Comments terminal experiment decisions on the pull request that shipped
//! the experiment, so the decision lands next to the code it judges. Specs
//! without a tracked PR number are skipped silently.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Notification sink
//! - **Pattern:** Anti-Corruption Layer for the GitHub REST API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::domain::experiment::{ExperimentSpec, OutcomeRecord};
use crate::domain::notifier::{DecisionNotifier, NotifyError};
use crate::infrastructure::format;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "growth-experiment-copilot";

pub struct GitHubNotifier {
    client: Client,
    api_base: String,
    /// Repository in "owner/name" form.
    repo: String,
    token: String,
}

impl GitHubNotifier {
    pub fn new(
        api_base: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            repo: repo.into(),
            token: token.into(),
        }
    }

    fn decision_comment(spec: &ExperimentSpec, outcome: &OutcomeRecord) -> String {
        format!(
            "\n## Experiment Decision: {}\n\n\
             **Decision**: {}\n\
             **Confidence**: {}\n\
             **Sample Size**: {}\n\
             **Reason**: {}\n\n\
             *This decision was made automatically by the Growth Experiment Co-Pilot*\n",
            spec.key,
            outcome.decision.title(),
            format::percent(outcome.confidence),
            format::thousands(outcome.final_sample_size),
            outcome.reason,
        )
    }
}

#[async_trait]
impl DecisionNotifier for GitHubNotifier {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn notify_registered(&self, spec: &ExperimentSpec) -> Result<(), NotifyError> {
        // Registration has nothing to comment on; the PR itself predates us.
        debug!(experiment_key = %spec.key, "No GitHub notification for registration");
        Ok(())
    }

    async fn notify_decision(
        &self,
        spec: &ExperimentSpec,
        outcome: &OutcomeRecord,
    ) -> Result<(), NotifyError> {
        let Some(pr_number) = spec.pr_number else {
            debug!(
                experiment_key = %spec.key,
                "No PR tracked for experiment, skipping GitHub comment"
            );
            return Ok(());
        };

        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_base.trim_end_matches('/'),
            self.repo,
            pr_number
        );
        let body = serde_json::json!({
            "body": Self::decision_comment(spec, outcome)
        });

        let response = self
            .client
            .post(&url)
            .timeout(NOTIFY_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        Ok(())
    }
}
