// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Experiment lifecycle application service
//!
//! The operator-facing surface over the experiment store: submitting specs,
//! inspecting status, stopping experiments, and watching their event stream.
//! Submission is asynchronous by design: `submit` validates and enqueues, the
//! intake worker does the actual registration, so the HTTP API can answer
//! with 202 Accepted and never blocks on flag providers or webhooks.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::events::ExperimentEvent;
use crate::domain::experiment::{Decision, ExperimentKey, ExperimentSpec, OutcomeRecord};
use crate::domain::flags::FlagClient;
use crate::domain::notifier::DecisionNotifier;
use crate::domain::queue::{IntakeEvent, JobQueue};
use crate::domain::repository::{ExperimentRepository, OutcomeRepository};
use crate::infrastructure::event_bus::EventBus;

/// Spec plus its decision trail, as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentStatusView {
    pub spec: ExperimentSpec,
    pub latest_outcome: Option<OutcomeRecord>,
}

/// Errors from spec submission
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid experiment spec: {0}")]
    Invalid(String),

    #[error("Experiment already exists: {0}")]
    Duplicate(ExperimentKey),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Errors from an operator stop
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("Experiment not found: {0}")]
    NotFound(ExperimentKey),

    #[error("Experiment already decided: {0}")]
    AlreadyDecided(ExperimentKey),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[async_trait]
pub trait ExperimentLifecycleService: Send + Sync {
    /// Validate a spec and queue it for registration
    async fn submit(
        &self,
        spec: ExperimentSpec,
        requested_by: Option<String>,
    ) -> Result<ExperimentKey, SubmitError>;

    /// Spec and latest outcome for one experiment
    async fn get_experiment(&self, key: &ExperimentKey) -> Result<Option<ExperimentStatusView>>;

    /// All registered experiment specs
    async fn list_experiments(&self) -> Result<Vec<ExperimentSpec>>;

    /// Record an operator stop as a terminal outcome
    async fn stop_experiment(
        &self,
        key: &ExperimentKey,
        reason: &str,
    ) -> Result<OutcomeRecord, StopError>;

    /// Live event stream for one experiment
    fn watch_experiment(
        &self,
        key: &ExperimentKey,
    ) -> Pin<Box<dyn Stream<Item = ExperimentEvent> + Send>>;
}

pub struct StandardExperimentLifecycleService {
    experiments: Arc<dyn ExperimentRepository>,
    outcomes: Arc<dyn OutcomeRepository>,
    intake_queue: Arc<dyn JobQueue<IntakeEvent>>,
    event_bus: EventBus,
    flags: Option<Arc<dyn FlagClient>>,
    notifiers: Vec<Arc<dyn DecisionNotifier>>,
}

impl StandardExperimentLifecycleService {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        outcomes: Arc<dyn OutcomeRepository>,
        intake_queue: Arc<dyn JobQueue<IntakeEvent>>,
        event_bus: EventBus,
        flags: Option<Arc<dyn FlagClient>>,
        notifiers: Vec<Arc<dyn DecisionNotifier>>,
    ) -> Self {
        Self {
            experiments,
            outcomes,
            intake_queue,
            event_bus,
            flags,
            notifiers,
        }
    }
}

#[async_trait]
impl ExperimentLifecycleService for StandardExperimentLifecycleService {
    async fn submit(
        &self,
        spec: ExperimentSpec,
        requested_by: Option<String>,
    ) -> Result<ExperimentKey, SubmitError> {
        spec.validate().map_err(SubmitError::Invalid)?;

        let key = spec.key.clone();
        let existing = self
            .experiments
            .get_spec(&key)
            .await
            .map_err(anyhow::Error::from)?;
        if existing.is_some() {
            return Err(SubmitError::Duplicate(key));
        }

        self.intake_queue
            .publish(IntakeEvent { spec, requested_by })
            .await
            .map_err(anyhow::Error::from)?;

        info!(experiment_key = %key, "Experiment spec queued for intake");
        Ok(key)
    }

    async fn get_experiment(&self, key: &ExperimentKey) -> Result<Option<ExperimentStatusView>> {
        let Some(spec) = self.experiments.get_spec(key).await? else {
            return Ok(None);
        };
        let latest_outcome = self.outcomes.latest_outcome(key).await?;
        Ok(Some(ExperimentStatusView {
            spec,
            latest_outcome,
        }))
    }

    async fn list_experiments(&self) -> Result<Vec<ExperimentSpec>> {
        Ok(self.experiments.list_specs().await?)
    }

    async fn stop_experiment(
        &self,
        key: &ExperimentKey,
        reason: &str,
    ) -> Result<OutcomeRecord, StopError> {
        let Some(mut spec) = self
            .experiments
            .get_spec(key)
            .await
            .map_err(anyhow::Error::from)?
        else {
            return Err(StopError::NotFound(key.clone()));
        };

        if spec.status.is_terminal() {
            return Err(StopError::AlreadyDecided(key.clone()));
        }

        // A previous decide or stop may have recorded its outcome and then
        // failed to save the spec. Finish that transition instead of
        // appending a second outcome.
        if let Some(existing) = self
            .outcomes
            .latest_outcome(key)
            .await
            .map_err(anyhow::Error::from)?
        {
            spec.conclude(existing.decision)
                .map_err(|e| StopError::Internal(anyhow::anyhow!(e)))?;
            self.experiments
                .save_spec(&spec)
                .await
                .map_err(anyhow::Error::from)?;
            warn!(experiment_key = %key, "Repaired spec status from existing outcome instead of stopping again");
            return Ok(existing);
        }

        let outcome = OutcomeRecord::new(
            key.clone(),
            Decision::Stop,
            1.0,
            0,
            format!("Stopped by operator: {}", reason),
        );
        self.outcomes
            .append_outcome(&outcome)
            .await
            .map_err(anyhow::Error::from)?;

        spec.conclude(Decision::Stop)
            .map_err(|e| StopError::Internal(anyhow::anyhow!(e)))?;
        self.experiments
            .save_spec(&spec)
            .await
            .map_err(anyhow::Error::from)?;

        self.event_bus.publish(ExperimentEvent::ExperimentStopped {
            experiment_key: key.clone(),
            reason: outcome.reason.clone(),
            stopped_at: outcome.recorded_at,
        });

        if let Some(flags) = &self.flags {
            let flag_key = spec.flag_key();
            if let Err(e) = flags.disable_flag(&flag_key).await {
                warn!(experiment_key = %key, flag_key = %flag_key, error = %e, "Failed to disable feature flag after stop");
            }
        }

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify_decision(&spec, &outcome).await {
                warn!(sink = notifier.name(), experiment_key = %key, error = %e, "Failed to deliver stop notification");
            }
        }

        info!(experiment_key = %key, reason, "Experiment stopped by operator");
        Ok(outcome)
    }

    fn watch_experiment(
        &self,
        key: &ExperimentKey,
    ) -> Pin<Box<dyn Stream<Item = ExperimentEvent> + Send>> {
        self.event_bus.watch(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::experiment::{ExperimentStatus, Metric};
    use crate::infrastructure::queue::InProcessQueue;
    use crate::infrastructure::repositories::{
        InMemoryExperimentRepository, InMemoryOutcomeRepository,
    };

    fn sample_spec(key: &str) -> ExperimentSpec {
        ExperimentSpec::new(
            key,
            "Green CTA converts better",
            Metric::rate("purchase_conversion", "purchase_completed"),
        )
    }

    struct Harness {
        service: StandardExperimentLifecycleService,
        experiments: Arc<InMemoryExperimentRepository>,
        outcomes: Arc<InMemoryOutcomeRepository>,
        intake_queue: Arc<InProcessQueue<IntakeEvent>>,
        event_bus: EventBus,
    }

    fn harness() -> Harness {
        let experiments = Arc::new(InMemoryExperimentRepository::new());
        let outcomes = Arc::new(InMemoryOutcomeRepository::new());
        let intake_queue = Arc::new(InProcessQueue::new());
        let event_bus = EventBus::new(16);
        let service = StandardExperimentLifecycleService::new(
            experiments.clone(),
            outcomes.clone(),
            intake_queue.clone(),
            event_bus.clone(),
            None,
            vec![],
        );
        Harness {
            service,
            experiments,
            outcomes,
            intake_queue,
            event_bus,
        }
    }

    // ── Submission ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_submit_queues_valid_spec() {
        let h = harness();
        let key = h
            .service
            .submit(sample_spec("checkout_cta_color"), Some("dana".to_string()))
            .await
            .unwrap();
        assert_eq!(key.as_str(), "checkout_cta_color");

        let delivery = h.intake_queue.recv().await.unwrap();
        assert_eq!(delivery.attempt, 1);
        assert_eq!(delivery.job.spec.key, key);
        assert_eq!(delivery.job.requested_by.as_deref(), Some("dana"));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_spec() {
        let h = harness();
        let mut spec = sample_spec("checkout_cta_color");
        spec.hypothesis = String::new();
        let err = h.service.submit(spec, None).await.unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicate_key() {
        let h = harness();
        h.experiments
            .save_spec(&sample_spec("checkout_cta_color"))
            .await
            .unwrap();
        let err = h
            .service
            .submit(sample_spec("checkout_cta_color"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Duplicate(_)));
    }

    // ── Status ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_experiment_includes_latest_outcome() {
        let h = harness();
        let spec = sample_spec("pricing_display");
        h.experiments.save_spec(&spec).await.unwrap();
        assert!(h
            .service
            .get_experiment(&spec.key)
            .await
            .unwrap()
            .unwrap()
            .latest_outcome
            .is_none());

        let outcome = OutcomeRecord::new(
            spec.key.clone(),
            Decision::ShipTreatment,
            0.97,
            10_000,
            "Strong evidence treatment is better",
        );
        h.outcomes.append_outcome(&outcome).await.unwrap();

        let view = h.service.get_experiment(&spec.key).await.unwrap().unwrap();
        assert_eq!(view.latest_outcome.unwrap().decision, Decision::ShipTreatment);
    }

    #[tokio::test]
    async fn test_get_experiment_unknown_key_is_none() {
        let h = harness();
        assert!(h
            .service
            .get_experiment(&ExperimentKey::new("missing"))
            .await
            .unwrap()
            .is_none());
    }

    // ── Operator stop ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_stop_records_terminal_outcome() {
        let h = harness();
        let mut spec = sample_spec("pricing_display");
        spec.start_monitoring();
        h.experiments.save_spec(&spec).await.unwrap();

        let mut events = h.event_bus.subscribe();
        let outcome = h
            .service
            .stop_experiment(&spec.key, "metric instrumentation broken")
            .await
            .unwrap();
        assert_eq!(outcome.decision, Decision::Stop);
        assert!(outcome.reason.contains("metric instrumentation broken"));

        let stored = h.experiments.get_spec(&spec.key).await.unwrap().unwrap();
        assert_eq!(stored.status, ExperimentStatus::Stopped);
        assert_eq!(stored.decision, Some(Decision::Stop));

        let history = h.outcomes.outcome_history(&spec.key).await.unwrap();
        assert_eq!(history.len(), 1);

        let event = events.try_recv().unwrap();
        assert!(matches!(event, ExperimentEvent::ExperimentStopped { .. }));
    }

    #[tokio::test]
    async fn test_stop_twice_reports_already_decided() {
        let h = harness();
        let mut spec = sample_spec("pricing_display");
        spec.start_monitoring();
        h.experiments.save_spec(&spec).await.unwrap();

        h.service
            .stop_experiment(&spec.key, "first stop")
            .await
            .unwrap();
        let err = h
            .service
            .stop_experiment(&spec.key, "second stop")
            .await
            .unwrap_err();
        assert!(matches!(err, StopError::AlreadyDecided(_)));
    }

    #[tokio::test]
    async fn test_stop_unknown_key_reports_not_found() {
        let h = harness();
        let err = h
            .service
            .stop_experiment(&ExperimentKey::new("missing"), "why not")
            .await
            .unwrap_err();
        assert!(matches!(err, StopError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stop_reuses_orphaned_outcome() {
        // Outcome exists but the spec never reached a terminal status:
        // the stop must repair the spec and not append a second outcome.
        let h = harness();
        let mut spec = sample_spec("pricing_display");
        spec.start_monitoring();
        h.experiments.save_spec(&spec).await.unwrap();

        let orphan = OutcomeRecord::new(
            spec.key.clone(),
            Decision::ShipControl,
            0.96,
            8_000,
            "Strong evidence control is better",
        );
        h.outcomes.append_outcome(&orphan).await.unwrap();

        let outcome = h
            .service
            .stop_experiment(&spec.key, "cleanup")
            .await
            .unwrap();
        assert_eq!(outcome.id, orphan.id);
        assert_eq!(outcome.decision, Decision::ShipControl);

        let stored = h.experiments.get_spec(&spec.key).await.unwrap().unwrap();
        assert_eq!(stored.status, ExperimentStatus::Completed);
        assert_eq!(
            h.outcomes.outcome_history(&spec.key).await.unwrap().len(),
            1
        );
    }
}
