// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Experiment Repositories
//!
//! Production `ExperimentRepository` and `OutcomeRepository` implementations
//! backed by the `experiment_specs` and `experiment_outcomes` tables via
//! `sqlx`. Aggregates are stored as JSONB and reconstructed with serde, so
//! schema churn stays confined to the domain types.
//!
//! `experiment_outcomes` is insert-only; `latest_outcome` resolves by
//! `recorded_at` which keeps redeliveries of old monitor ticks from ever
//! shadowing a newer decision.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::experiment::{ExperimentKey, ExperimentSpec, OutcomeRecord};
use crate::domain::repository::{ExperimentRepository, OutcomeRepository, StoreError};

pub struct PostgresExperimentRepository {
    pool: PgPool,
}

impl PostgresExperimentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExperimentRepository for PostgresExperimentRepository {
    async fn save_spec(&self, spec: &ExperimentSpec) -> Result<(), StoreError> {
        let spec_json = serde_json::to_value(spec)?;

        sqlx::query(
            r#"
            INSERT INTO experiment_specs (key, status, spec_json, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE SET
                status = EXCLUDED.status,
                spec_json = EXCLUDED.spec_json,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(spec.key.as_str())
        .bind(spec.status.as_str())
        .bind(&spec_json)
        .bind(spec.created_at)
        .bind(spec.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to save experiment spec: {}", e)))?;

        Ok(())
    }

    async fn get_spec(&self, key: &ExperimentKey) -> Result<Option<ExperimentSpec>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT spec_json
            FROM experiment_specs
            WHERE key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if let Some(row) = row {
            let spec_json: serde_json::Value = row
                .try_get("spec_json")
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let spec: ExperimentSpec = serde_json::from_value(spec_json)?;
            Ok(Some(spec))
        } else {
            Ok(None)
        }
    }

    async fn list_specs(&self) -> Result<Vec<ExperimentSpec>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT spec_json
            FROM experiment_specs
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut specs = Vec::new();
        for row in rows {
            let spec_json: serde_json::Value = row
                .try_get("spec_json")
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let spec: ExperimentSpec = serde_json::from_value(spec_json)?;
            specs.push(spec);
        }
        Ok(specs)
    }
}

pub struct PostgresOutcomeRepository {
    pool: PgPool,
}

impl PostgresOutcomeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutcomeRepository for PostgresOutcomeRepository {
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<(), StoreError> {
        let outcome_json = serde_json::to_value(outcome)?;

        sqlx::query(
            r#"
            INSERT INTO experiment_outcomes (id, experiment_key, outcome_json, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(outcome.id)
        .bind(outcome.experiment_key.as_str())
        .bind(&outcome_json)
        .bind(outcome.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(format!("Failed to append outcome: {}", e)))?;

        Ok(())
    }

    async fn latest_outcome(
        &self,
        key: &ExperimentKey,
    ) -> Result<Option<OutcomeRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT outcome_json
            FROM experiment_outcomes
            WHERE experiment_key = $1
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if let Some(row) = row {
            let outcome_json: serde_json::Value = row
                .try_get("outcome_json")
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let outcome: OutcomeRecord = serde_json::from_value(outcome_json)?;
            Ok(Some(outcome))
        } else {
            Ok(None)
        }
    }

    async fn outcome_history(
        &self,
        key: &ExperimentKey,
    ) -> Result<Vec<OutcomeRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT outcome_json
            FROM experiment_outcomes
            WHERE experiment_key = $1
            ORDER BY recorded_at DESC
            "#,
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut history = Vec::new();
        for row in rows {
            let outcome_json: serde_json::Value = row
                .try_get("outcome_json")
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let outcome: OutcomeRecord = serde_json::from_value(outcome_json)?;
            history.push(outcome);
        }
        Ok(history)
    }
}
