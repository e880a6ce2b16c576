// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! LLM Advisory Reviewer
//!
//! Asks an LLM to second-guess the numeric decision for one monitoring tick.
//! The model is shown the experiment, its primary metric, and the numeric
//! analysis, and replies in a loose `DECISION / CONFIDENCE / RATIONALE` line
//! format. Anything that goes wrong here degrades to "no override": a
//! timeout, a provider error, or a reply we cannot parse never blocks the
//! decision pipeline.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Optional second-opinion reviewer backed by an LLM provider

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::domain::advisory::{AdvisoryOverride, AdvisoryReviewer};
use crate::domain::analysis::DecisionResult;
use crate::domain::experiment::{Decision, ExperimentSpec};
use crate::domain::llm::{GenerationOptions, LLMProvider};

const DEFAULT_CONFIDENCE: f64 = 0.8;
const DEFAULT_RATIONALE: &str = "AI analysis";

pub struct LlmAdvisoryReviewer {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
}

impl LlmAdvisoryReviewer {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    fn review_prompt(spec: &ExperimentSpec, numeric: &DecisionResult) -> String {
        format!(
            "\nExperiment: {}\n\
             Primary Metric: {}\n\
             Metric Type: {}\n\n\
             Current Analysis:\n\
             - Decision: {}\n\
             - Confidence: {}\n\
             - Sample Size: {}\n\
             - Reason: {}\n\n\
             Please review this analysis and provide your recommendation.\n",
            spec.key,
            spec.primary_metric.name,
            spec.primary_metric.kind,
            numeric.decision,
            numeric.confidence,
            numeric.sample_size,
            numeric.reason,
        )
    }

    /// Pull an override proposal out of a free-form model reply.
    ///
    /// `DECISION:` is mandatory and must name a known decision; `CONFIDENCE:`
    /// defaults to 0.8 when absent but must be a fraction in [0, 1] when
    /// present; `RATIONALE:` defaults to a stock phrase. Returns `None` for
    /// anything else, including a malformed confidence.
    fn parse_override(text: &str) -> Option<AdvisoryOverride> {
        let decision_re = Regex::new(r"(?i)DECISION:\s*(\w+)").ok()?;
        let confidence_re = Regex::new(r"(?i)CONFIDENCE:\s*([\d.]+)").ok()?;
        let rationale_re = Regex::new(r"(?i)RATIONALE:\s*(.+)").ok()?;

        let decision_word = decision_re.captures(text)?.get(1)?.as_str().to_lowercase();
        let decision = Decision::parse(&decision_word)?;

        let confidence = match confidence_re.captures(text) {
            Some(caps) => caps.get(1)?.as_str().parse::<f64>().ok()?,
            None => DEFAULT_CONFIDENCE,
        };
        if !(0.0..=1.0).contains(&confidence) {
            return None;
        }

        let rationale = rationale_re
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_else(|| DEFAULT_RATIONALE.to_string());

        Some(AdvisoryOverride {
            decision,
            confidence,
            rationale,
        })
    }
}

#[async_trait]
impl AdvisoryReviewer for LlmAdvisoryReviewer {
    async fn review(
        &self,
        spec: &ExperimentSpec,
        numeric: &DecisionResult,
    ) -> Option<AdvisoryOverride> {
        let prompt = Self::review_prompt(spec, numeric);

        let response = match timeout(
            self.timeout,
            self.provider.generate(&prompt, &GenerationOptions::default()),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(experiment_key = %spec.key, error = %e, "Advisory review failed");
                return None;
            }
            Err(_) => {
                warn!(
                    experiment_key = %spec.key,
                    timeout_secs = self.timeout.as_secs(),
                    "Advisory review timed out"
                );
                return None;
            }
        };

        let parsed = Self::parse_override(&response.text);
        if parsed.is_none() {
            debug!(
                experiment_key = %spec.key,
                "Advisory reply carried no parseable override"
            );
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::Metric;
    use crate::domain::llm::{FinishReason, GenerationResponse, LLMError, TokenUsage};
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: String,
        seen_prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn generate(
            &self,
            prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, LLMError> {
            self.seen_prompts.lock().unwrap().push(prompt.to_string());
            Ok(GenerationResponse {
                text: self.reply.clone(),
                usage: TokenUsage::default(),
                provider: "test".to_string(),
                model: "test".to_string(),
                finish_reason: FinishReason::Stop,
            })
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LLMProvider for FailingProvider {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, LLMError> {
            Err(LLMError::RateLimit)
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Err(LLMError::RateLimit)
        }
    }

    struct HangingProvider;

    #[async_trait]
    impl LLMProvider for HangingProvider {
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, LLMError> {
            std::future::pending().await
        }

        async fn health_check(&self) -> Result<(), LLMError> {
            Ok(())
        }
    }

    fn spec() -> ExperimentSpec {
        ExperimentSpec::new(
            "checkout_cta_color",
            "Green CTA converts better",
            Metric::rate("purchase_conversion", "purchase_completed"),
        )
    }

    fn numeric_extend() -> DecisionResult {
        DecisionResult {
            decision: Decision::Extend,
            confidence: 0.9086,
            sample_size: 10_000,
            reason: "Inconclusive results".to_string(),
            prob_treatment_better: Some(0.9086),
        }
    }

    fn reviewer(provider: Arc<dyn LLMProvider>) -> LlmAdvisoryReviewer {
        LlmAdvisoryReviewer::new(provider, Duration::from_secs(30))
    }

    // ── Reply parsing ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_structured_reply_becomes_override() {
        let provider = Arc::new(ScriptedProvider::new(
            "DECISION: stop\nCONFIDENCE: 0.92\nRATIONALE: Guardrail metric regressed",
        ));
        let advisory = reviewer(provider)
            .review(&spec(), &numeric_extend())
            .await
            .unwrap();

        assert_eq!(advisory.decision, Decision::Stop);
        assert_eq!(advisory.confidence, 0.92);
        assert_eq!(advisory.rationale, "Guardrail metric regressed");
    }

    #[tokio::test]
    async fn test_parsing_is_case_insensitive() {
        let provider = Arc::new(ScriptedProvider::new(
            "decision: SHIP_TREATMENT\nconfidence: 0.97",
        ));
        let advisory = reviewer(provider)
            .review(&spec(), &numeric_extend())
            .await
            .unwrap();

        assert_eq!(advisory.decision, Decision::ShipTreatment);
        assert_eq!(advisory.confidence, 0.97);
    }

    #[tokio::test]
    async fn test_missing_confidence_and_rationale_take_defaults() {
        let provider = Arc::new(ScriptedProvider::new("DECISION: ship_control"));
        let advisory = reviewer(provider)
            .review(&spec(), &numeric_extend())
            .await
            .unwrap();

        assert_eq!(advisory.decision, Decision::ShipControl);
        assert_eq!(advisory.confidence, 0.8);
        assert_eq!(advisory.rationale, "AI analysis");
    }

    #[tokio::test]
    async fn test_reply_without_decision_is_no_override() {
        let provider = Arc::new(ScriptedProvider::new(
            "The analysis looks sound, keep collecting data.",
        ));
        assert!(reviewer(provider)
            .review(&spec(), &numeric_extend())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_decision_word_is_no_override() {
        let provider = Arc::new(ScriptedProvider::new("DECISION: escalate"));
        assert!(reviewer(provider)
            .review(&spec(), &numeric_extend())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_confidence_outside_unit_interval_is_no_override() {
        let provider = Arc::new(ScriptedProvider::new("DECISION: stop\nCONFIDENCE: 95"));
        assert!(reviewer(provider)
            .review(&spec(), &numeric_extend())
            .await
            .is_none());
    }

    // ── Prompt content ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_prompt_reports_numeric_analysis() {
        let provider = Arc::new(ScriptedProvider::new("no recommendation"));
        reviewer(provider.clone())
            .review(&spec(), &numeric_extend())
            .await;

        let prompts = provider.seen_prompts.lock().unwrap();
        let prompt = prompts.first().unwrap();
        assert!(prompt.contains("Experiment: checkout_cta_color"));
        assert!(prompt.contains("Primary Metric: purchase_conversion"));
        assert!(prompt.contains("Metric Type: rate"));
        assert!(prompt.contains("- Decision: extend"));
        assert!(prompt.contains("- Sample Size: 10000"));
        assert!(prompt.contains("provide your recommendation"));
    }

    // ── Failure containment ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_provider_error_is_no_override() {
        assert!(reviewer(Arc::new(FailingProvider))
            .review(&spec(), &numeric_extend())
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_to_no_override() {
        let reviewer = LlmAdvisoryReviewer::new(Arc::new(HangingProvider), Duration::from_secs(5));
        assert!(reviewer.review(&spec(), &numeric_extend()).await.is_none());
    }
}
