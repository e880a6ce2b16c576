// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostHog Flag Client
//!
//! Manages the feature flags that split experiment traffic. A flag is created
//! at 50% rollout when monitoring starts; a ship_treatment decision rolls it
//! to 100%, ship_control and stop disable it.
//!
//! Rollout updates follow PostHog's read-modify-write contract: fetch the
//! flag, rewrite the rollout percentage of its first group, PATCH the whole
//! document back.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Feature flag provider adapter
//! - **Pattern:** Anti-Corruption Layer for the PostHog flags API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::domain::flags::{FlagClient, FlagError};

const FLAG_TIMEOUT: Duration = Duration::from_secs(10);
const INITIAL_ROLLOUT_PERCENTAGE: f64 = 50.0;

pub struct PosthogFlagClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PosthogFlagClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn flags_url(&self) -> String {
        format!("{}/api/feature_flags/", self.base_url.trim_end_matches('/'))
    }

    fn flag_url(&self, flag_key: &str) -> String {
        format!(
            "{}/api/feature_flags/{}/",
            self.base_url.trim_end_matches('/'),
            flag_key
        )
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FlagError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(if status == 401 || status == 403 {
            FlagError::Authentication(error_text)
        } else {
            FlagError::Api(format!("HTTP {}: {}", status, error_text))
        })
    }
}

#[async_trait]
impl FlagClient for PosthogFlagClient {
    async fn create_experiment_flag(
        &self,
        flag_key: &str,
        variants: &[String],
    ) -> Result<(), FlagError> {
        debug!(flag_key, ?variants, "Creating experiment feature flag");

        let payload = serde_json::json!({
            "name": flag_key,
            "key": flag_key,
            "filters": {
                "groups": [
                    {
                        "properties": [],
                        "rollout_percentage": INITIAL_ROLLOUT_PERCENTAGE
                    }
                ]
            },
            "deleted": false,
            "active": true,
            "ensure_experience_continuity": true
        });

        let response = self
            .client
            .post(self.flags_url())
            .timeout(FLAG_TIMEOUT)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| FlagError::Network(e.to_string()))?;
        Self::ensure_success(response).await?;

        info!("Created PostHog feature flag: {}", flag_key);
        Ok(())
    }

    async fn update_rollout(
        &self,
        flag_key: &str,
        rollout_percentage: f64,
    ) -> Result<(), FlagError> {
        let url = self.flag_url(flag_key);

        let response = self
            .client
            .get(&url)
            .timeout(FLAG_TIMEOUT)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| FlagError::Network(e.to_string()))?;
        let response = Self::ensure_success(response).await?;

        let mut flag: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FlagError::Api(format!("Malformed flag document: {}", e)))?;

        match flag.pointer_mut("/filters/groups/0/rollout_percentage") {
            Some(slot) => *slot = serde_json::json!(rollout_percentage),
            None => {
                return Err(FlagError::Api(format!(
                    "Flag {} has no rollout group to update",
                    flag_key
                )))
            }
        }

        let response = self
            .client
            .patch(&url)
            .timeout(FLAG_TIMEOUT)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&flag)
            .send()
            .await
            .map_err(|e| FlagError::Network(e.to_string()))?;
        Self::ensure_success(response).await?;

        info!(
            "Updated PostHog flag {} rollout to {}%",
            flag_key, rollout_percentage
        );
        Ok(())
    }

    async fn disable_flag(&self, flag_key: &str) -> Result<(), FlagError> {
        let response = self
            .client
            .patch(self.flag_url(flag_key))
            .timeout(FLAG_TIMEOUT)
            .header("Authorization", self.auth_header())
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({ "active": false }))
            .send()
            .await
            .map_err(|e| FlagError::Network(e.to_string()))?;
        Self::ensure_success(response).await?;

        info!("Disabled PostHog feature flag: {}", flag_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn variants() -> Vec<String> {
        vec!["control".to_string(), "treatment".to_string()]
    }

    #[tokio::test]
    async fn test_create_flag_sends_full_definition() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/feature_flags/")
            .match_header("authorization", "Bearer phx_test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "name": "experiment_checkout_cta_color",
                "key": "experiment_checkout_cta_color",
                "filters": {
                    "groups": [{"properties": [], "rollout_percentage": 50.0}]
                },
                "active": true,
                "ensure_experience_continuity": true
            })))
            .with_status(201)
            .with_body(r#"{"key": "experiment_checkout_cta_color"}"#)
            .create_async()
            .await;

        let client = PosthogFlagClient::new(server.url(), "phx_test");
        client
            .create_experiment_flag("experiment_checkout_cta_color", &variants())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_rollout_rewrites_fetched_flag() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", "/api/feature_flags/experiment_checkout_cta_color/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "key": "experiment_checkout_cta_color",
                    "active": true,
                    "filters": {"groups": [{"properties": [], "rollout_percentage": 50.0}]}
                }"#,
            )
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/api/feature_flags/experiment_checkout_cta_color/")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "filters": {"groups": [{"rollout_percentage": 100.0}]}
            })))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = PosthogFlagClient::new(server.url(), "phx_test");
        client
            .update_rollout("experiment_checkout_cta_color", 100.0)
            .await
            .unwrap();

        get.assert_async().await;
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_rollout_without_groups_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/feature_flags/experiment_checkout_cta_color/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"key": "experiment_checkout_cta_color", "filters": {"groups": []}}"#)
            .create_async()
            .await;

        let client = PosthogFlagClient::new(server.url(), "phx_test");
        let err = client
            .update_rollout("experiment_checkout_cta_color", 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::Api(_)));
    }

    #[tokio::test]
    async fn test_disable_patches_active_false() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/api/feature_flags/experiment_pricing_display/")
            .match_body(Matcher::PartialJson(serde_json::json!({"active": false})))
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = PosthogFlagClient::new(server.url(), "phx_test");
        client
            .disable_flag("experiment_pricing_display")
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forbidden_maps_to_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/feature_flags/")
            .with_status(403)
            .with_body(r#"{"detail": "Invalid API key"}"#)
            .create_async()
            .await;

        let client = PosthogFlagClient::new(server.url(), "phx_bad");
        let err = client
            .create_experiment_flag("experiment_checkout_cta_color", &variants())
            .await
            .unwrap_err();
        assert!(matches!(err, FlagError::Authentication(_)));
    }
}
