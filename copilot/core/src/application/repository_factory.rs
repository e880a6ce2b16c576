// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, keeping the Domain Layer pure and free of infrastructure
//! dependencies:
//! - Domain layer: defines repository traits (pure interfaces)
//! - Application layer: factories that create repository instances
//! - Infrastructure layer: concrete implementations
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Maps storage backend config to repository implementations

use std::sync::Arc;

use anyhow::{anyhow, Result};
use sqlx::PgPool;

use crate::domain::repository::{ExperimentRepository, OutcomeRepository, StorageBackend};
use crate::infrastructure::repositories::{
    InMemoryExperimentRepository, InMemoryOutcomeRepository, PostgresExperimentRepository,
    PostgresOutcomeRepository,
};

/// Creates an ExperimentRepository for the configured backend.
///
/// The pool is required only for the PostgreSQL backend; in-memory
/// deployments run without one.
pub fn create_experiment_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn ExperimentRepository>> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryExperimentRepository::new())),
        StorageBackend::PostgreSQL(_) => {
            let pool = pool
                .ok_or_else(|| anyhow!("PostgreSQL backend selected without a connection pool"))?;
            Ok(Arc::new(PostgresExperimentRepository::new(pool.clone())))
        }
    }
}

/// Creates an OutcomeRepository for the configured backend.
pub fn create_outcome_repository(
    backend: &StorageBackend,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn OutcomeRepository>> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryOutcomeRepository::new())),
        StorageBackend::PostgreSQL(_) => {
            let pool = pool
                .ok_or_else(|| anyhow!("PostgreSQL backend selected without a connection pool"))?;
            Ok(Arc::new(PostgresOutcomeRepository::new(pool.clone())))
        }
    }
}
