// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metrics
//!
//! Provides metrics-source functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the analytics backend interface

// Metrics Source Domain Interface (Anti-Corruption Layer)
//
// Defines the domain interface for analytics backends that hold raw
// experiment observations. Prevents vendor lock-in by abstracting the
// PostHog query API (and any future backend) behind a domain port.
//
// Implementations in infrastructure/ directory.

use async_trait::async_trait;

use crate::domain::analysis::{MeanSamples, RateCounts};
use crate::domain::experiment::ExperimentSpec;

/// Domain interface for analytics backends
///
/// Both methods aggregate per experiment variant: the backend splits events
/// by the experiment's feature flag into the `control` and `treatment` arms.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Conversion counts per variant since the experiment started
    async fn rate_counts(&self, spec: &ExperimentSpec) -> Result<RateCounts, MetricsError>;

    /// Raw per-event values of the metric property, per variant
    async fn mean_samples(&self, spec: &ExperimentSpec) -> Result<MeanSamples, MetricsError>;
}

/// Errors that can occur while querying an analytics backend
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
