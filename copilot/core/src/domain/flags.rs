// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Flags
//!
//! Provides feature-flag functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the feature flag provider interface

// Feature Flag Domain Interface (Anti-Corruption Layer)
//
// Defines the domain interface for the flag provider that splits traffic
// between experiment variants. Decisions actuate flags as follows:
// ship_treatment rolls the flag out to 100%, ship_control and stop disable
// it. Flag actuation is best-effort; the decision itself is already
// persisted when these methods run.
//
// Implementations in infrastructure/ directory.

use async_trait::async_trait;

/// Domain interface for feature flag providers
#[async_trait]
pub trait FlagClient: Send + Sync {
    /// Create a flag splitting traffic across the given variants (50% rollout)
    async fn create_experiment_flag(
        &self,
        flag_key: &str,
        variants: &[String],
    ) -> Result<(), FlagError>;

    /// Change the rollout percentage of an existing flag
    async fn update_rollout(&self, flag_key: &str, rollout_percentage: f64)
        -> Result<(), FlagError>;

    /// Disable a flag entirely
    async fn disable_flag(&self, flag_key: &str) -> Result<(), FlagError>;
}

/// Errors that can occur during flag operations
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("API error: {0}")]
    Api(String),
}
