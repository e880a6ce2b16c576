// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Notifier
//!
//! Provides decision-notification functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the notification sink interface

// Decision Notifier Domain Interface (Anti-Corruption Layer)
//
// Defines the domain interface for channels that announce experiment
// lifecycle milestones to humans: Slack channels, GitHub pull requests.
// Notification failures never fail a decision: the monitor worker logs
// them per sink and moves on, because the decision is already durable
// in the outcome store by the time any sink is called.
//
// Implementations in infrastructure/ directory.

use async_trait::async_trait;

use crate::domain::experiment::{ExperimentSpec, OutcomeRecord};

/// Domain interface for notification sinks
#[async_trait]
pub trait DecisionNotifier: Send + Sync {
    /// Sink name for log lines ("slack", "github")
    fn name(&self) -> &'static str;

    /// Announce that an experiment spec was registered and monitoring begins
    async fn notify_registered(&self, spec: &ExperimentSpec) -> Result<(), NotifyError>;

    /// Announce a terminal decision
    async fn notify_decision(
        &self,
        spec: &ExperimentSpec,
        outcome: &OutcomeRecord,
    ) -> Result<(), NotifyError>;
}

/// Errors that can occur while delivering a notification
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),
}
