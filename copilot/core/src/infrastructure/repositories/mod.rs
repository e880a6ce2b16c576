// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! This module provides infrastructure implementations of repository abstractions
//! defined in the domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve domain aggregates
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Production-ready implementations backed by PostgreSQL:
//! - **PostgresExperimentRepository** - Experiment spec persistence
//! - **PostgresOutcomeRepository** - Append-only decision outcomes
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and development:
//! - **InMemoryExperimentRepository** - Thread-safe HashMap-backed storage
//! - **InMemoryOutcomeRepository** - Ephemeral outcome log

pub mod postgres;

pub use postgres::{PostgresExperimentRepository, PostgresOutcomeRepository};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::experiment::{ExperimentKey, ExperimentSpec, OutcomeRecord};
use crate::domain::repository::{ExperimentRepository, OutcomeRepository, StoreError};

#[derive(Clone)]
pub struct InMemoryExperimentRepository {
    specs: Arc<RwLock<HashMap<ExperimentKey, ExperimentSpec>>>,
}

impl InMemoryExperimentRepository {
    pub fn new() -> Self {
        Self {
            specs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryExperimentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExperimentRepository for InMemoryExperimentRepository {
    async fn save_spec(&self, spec: &ExperimentSpec) -> Result<(), StoreError> {
        let mut specs = self.specs.write().unwrap();
        specs.insert(spec.key.clone(), spec.clone());
        Ok(())
    }

    async fn get_spec(&self, key: &ExperimentKey) -> Result<Option<ExperimentSpec>, StoreError> {
        let specs = self.specs.read().unwrap();
        Ok(specs.get(key).cloned())
    }

    async fn list_specs(&self) -> Result<Vec<ExperimentSpec>, StoreError> {
        let specs = self.specs.read().unwrap();
        let mut all: Vec<ExperimentSpec> = specs.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}

#[derive(Clone)]
pub struct InMemoryOutcomeRepository {
    outcomes: Arc<RwLock<Vec<OutcomeRecord>>>,
}

impl InMemoryOutcomeRepository {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryOutcomeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutcomeRepository for InMemoryOutcomeRepository {
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError> {
        let mut outcomes = self.outcomes.write().unwrap();
        outcomes.push(outcome.clone());
        Ok(())
    }

    async fn latest_outcome(
        &self,
        key: &ExperimentKey,
    ) -> Result<Option<OutcomeRecord>, StoreError> {
        let outcomes = self.outcomes.read().unwrap();
        Ok(outcomes
            .iter()
            .filter(|o| &o.experiment_key == key)
            .max_by_key(|o| o.recorded_at)
            .cloned())
    }

    async fn outcome_history(
        &self,
        key: &ExperimentKey,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        let outcomes = self.outcomes.read().unwrap();
        let mut history: Vec<OutcomeRecord> = outcomes
            .iter()
            .filter(|o| &o.experiment_key == key)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{Decision, Metric};

    fn sample_spec(key: &str) -> ExperimentSpec {
        ExperimentSpec::new(
            key,
            "Green CTA converts better",
            Metric::rate("purchase_conversion", "purchase_completed"),
        )
    }

    // ── Experiment specs ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_save_and_get_spec() {
        let repo = InMemoryExperimentRepository::new();
        let spec = sample_spec("checkout_cta_color");
        repo.save_spec(&spec).await.unwrap();

        let found = repo.get_spec(&spec.key).await.unwrap().unwrap();
        assert_eq!(found.key, spec.key);
        assert_eq!(found.hypothesis, spec.hypothesis);

        assert!(repo
            .get_spec(&ExperimentKey::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_save_spec_overwrites_existing() {
        let repo = InMemoryExperimentRepository::new();
        let mut spec = sample_spec("checkout_cta_color");
        repo.save_spec(&spec).await.unwrap();

        spec.approve();
        repo.save_spec(&spec).await.unwrap();

        let found = repo.get_spec(&spec.key).await.unwrap().unwrap();
        assert_eq!(found.status, spec.status);
        assert_eq!(repo.list_specs().await.unwrap().len(), 1);
    }

    // ── Outcome log ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_latest_outcome_resolves_by_recorded_at() {
        let repo = InMemoryOutcomeRepository::new();
        let key = ExperimentKey::new("checkout_cta_color");

        let mut earlier = OutcomeRecord::new(
            key.clone(),
            Decision::Stop,
            1.0,
            500,
            "Stopped by operator: bad instrumentation",
        );
        earlier.recorded_at = earlier.recorded_at - chrono::Duration::minutes(10);
        let later = OutcomeRecord::new(
            key.clone(),
            Decision::ShipTreatment,
            0.97,
            10_000,
            "Strong evidence treatment is better",
        );

        // Inserted out of order on purpose
        repo.append_outcome(&later).await.unwrap();
        repo.append_outcome(&earlier).await.unwrap();

        let latest = repo.latest_outcome(&key).await.unwrap().unwrap();
        assert_eq!(latest.id, later.id);

        let history = repo.outcome_history(&key).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, later.id);
        assert_eq!(history[1].id, earlier.id);
    }

    #[tokio::test]
    async fn test_outcomes_scoped_by_experiment() {
        let repo = InMemoryOutcomeRepository::new();
        let a = ExperimentKey::new("checkout_cta_color");
        let b = ExperimentKey::new("pricing_display");

        repo.append_outcome(&OutcomeRecord::new(
            a.clone(),
            Decision::ShipTreatment,
            0.97,
            10_000,
            "Strong evidence treatment is better",
        ))
        .await
        .unwrap();

        assert!(repo.latest_outcome(&b).await.unwrap().is_none());
        assert!(repo.outcome_history(&b).await.unwrap().is_empty());
        assert_eq!(repo.outcome_history(&a).await.unwrap().len(), 1);
    }
}
