// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Advisory
//!
//! Provides advisory-review functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the optional second-opinion interface
//!
//! The advisory reviewer is a strictly bounded layer on top of the numeric
//! decision engine: it may replace a decision only when it claims *strictly*
//! higher confidence than the numbers, and any failure inside the reviewer
//! (timeout, provider error, unparseable output) degrades to "no override".
//! The numeric result always stands on its own.

use async_trait::async_trait;

use crate::domain::analysis::DecisionResult;
use crate::domain::experiment::{Decision, ExperimentSpec};

/// A reviewer's proposal to replace the numeric decision.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryOverride {
    pub decision: Decision,
    pub confidence: f64,
    pub rationale: String,
}

impl AdvisoryOverride {
    /// Whether this override takes precedence over a numeric result with the
    /// given confidence. Ties go to the numbers.
    pub fn applies_over(&self, numeric_confidence: f64) -> bool {
        self.confidence > numeric_confidence
    }
}

/// Domain interface for advisory reviewers
///
/// `None` means "no override": the reviewer is disabled, declined to
/// override, errored, or produced output that could not be parsed. Callers
/// never distinguish these cases.
#[async_trait]
pub trait AdvisoryReviewer: Send + Sync {
    async fn review(
        &self,
        spec: &ExperimentSpec,
        numeric: &DecisionResult,
    ) -> Option<AdvisoryOverride>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Override precedence ─────────────────────────────────────────────

    #[test]
    fn test_override_requires_strictly_higher_confidence() {
        let advisory = AdvisoryOverride {
            decision: Decision::Stop,
            confidence: 0.95,
            rationale: "Guardrail metric regressed".to_string(),
        };
        assert!(advisory.applies_over(0.90));
        assert!(!advisory.applies_over(0.95));
        assert!(!advisory.applies_over(0.99));
    }
}
