// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root, following the DDD Repository
//! pattern: one repository per aggregate, interface defined in the domain layer,
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `ExperimentRepository` | `ExperimentSpec` | `InMemoryExperimentRepository`, `PostgresExperimentRepository` |
//! | `OutcomeRepository` | `OutcomeRecord` | `InMemoryOutcomeRepository`, `PostgresOutcomeRepository` |
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at daemon startup based on
//! configuration (`lift-config.yaml`). In-memory implementations are used
//! for development and testing; PostgreSQL implementations for production.
//!
//! `OutcomeRepository` is append-only by contract: records are inserted and
//! never updated or deleted, and `latest_outcome` resolves by `recorded_at`.

use async_trait::async_trait;

use crate::domain::experiment::{ExperimentKey, ExperimentSpec, OutcomeRecord};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Repository interface for `ExperimentSpec` aggregates
/// One repository per aggregate root (Experiment Lifecycle Context)
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    /// Save experiment spec (create or update)
    async fn save_spec(&self, spec: &ExperimentSpec) -> Result<(), StoreError>;

    /// Find experiment spec by key
    async fn get_spec(&self, key: &ExperimentKey) -> Result<Option<ExperimentSpec>, StoreError>;

    /// List all experiment specs
    async fn list_specs(&self) -> Result<Vec<ExperimentSpec>, StoreError>;
}

/// Repository interface for `OutcomeRecord` aggregates
/// Append-only: no update or delete operations are exposed
#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    /// Append a decision outcome for an experiment
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError>;

    /// Latest outcome for an experiment by `recorded_at`, if any
    async fn latest_outcome(&self, key: &ExperimentKey)
        -> Result<Option<OutcomeRecord>, StoreError>;

    /// All outcomes for an experiment, newest first
    async fn outcome_history(&self, key: &ExperimentKey)
        -> Result<Vec<OutcomeRecord>, StoreError>;
}

/// Repository operation errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Row not found".to_string()),
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
