// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Intake worker - registers submitted experiment specs
//!
//! Consumes `IntakeEvent`s, persists the spec, provisions the feature flag,
//! announces the registration, and schedules the first monitor tick.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Turns a submitted spec into a monitored experiment
//!
//! Registration is first-write-wins: a duplicate key keeps the stored spec
//! untouched but still schedules a tick, so a lost first tick can never
//! strand an experiment. Malformed specs are dropped with a log line; they
//! would fail the same way on every redelivery.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::events::ExperimentEvent;
use crate::domain::flags::FlagClient;
use crate::domain::notifier::DecisionNotifier;
use crate::domain::queue::{IntakeEvent, JobQueue, MonitorEvent};
use crate::domain::repository::ExperimentRepository;
use crate::infrastructure::event_bus::EventBus;

/// Intake worker - background task
pub struct IntakeWorker {
    experiments: Arc<dyn ExperimentRepository>,
    intake_queue: Arc<dyn JobQueue<IntakeEvent>>,
    monitor_queue: Arc<dyn JobQueue<MonitorEvent>>,
    event_bus: EventBus,
    flags: Option<Arc<dyn FlagClient>>,
    notifiers: Vec<Arc<dyn DecisionNotifier>>,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl IntakeWorker {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        intake_queue: Arc<dyn JobQueue<IntakeEvent>>,
        monitor_queue: Arc<dyn JobQueue<MonitorEvent>>,
        event_bus: EventBus,
        flags: Option<Arc<dyn FlagClient>>,
        notifiers: Vec<Arc<dyn DecisionNotifier>>,
    ) -> Self {
        Self {
            experiments,
            intake_queue,
            monitor_queue,
            event_bus,
            flags,
            notifiers,
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the intake background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the intake loop with graceful shutdown support
    async fn run(&self) {
        info!("Intake worker started, waiting for experiment specs");

        loop {
            tokio::select! {
                delivery = self.intake_queue.recv() => {
                    match delivery {
                        Some(delivery) => self.handle_intake(delivery.job).await,
                        None => {
                            info!("Intake queue closed, stopping intake worker");
                            break;
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping intake worker");
                    break;
                }
            }
        }

        info!("Intake worker stopped");
    }

    async fn handle_intake(&self, event: IntakeEvent) {
        let key = event.spec.key.clone();

        if let Err(reason) = event.spec.validate() {
            warn!(experiment_key = %key, reason, "Dropping invalid experiment spec");
            return;
        }

        match self.experiments.get_spec(&key).await {
            Ok(Some(_)) => {
                warn!(experiment_key = %key, "Experiment already registered, keeping stored spec");
                // Still schedule a tick: registration and monitoring must not
                // drift apart when the original tick was lost.
                if let Err(e) = self
                    .monitor_queue
                    .publish(MonitorEvent {
                        experiment_key: key.clone(),
                    })
                    .await
                {
                    warn!(experiment_key = %key, error = %e, "Failed to schedule monitor tick for duplicate registration");
                }
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(experiment_key = %key, error = %e, "Intake store lookup failed, dropping registration");
                return;
            }
        }

        let mut spec = event.spec;
        spec.approve();
        if let Err(e) = self.experiments.save_spec(&spec).await {
            warn!(experiment_key = %key, error = %e, "Failed to persist experiment spec");
            return;
        }

        // Flag creation is best-effort; a registered experiment without a
        // flag shows up in the monitor gate, not as a lost registration.
        if let Some(flags) = &self.flags {
            let flag_key = spec.flag_key();
            match flags.create_experiment_flag(&flag_key, &spec.variants).await {
                Ok(()) => {
                    info!(experiment_key = %key, flag_key = %flag_key, "Created experiment feature flag")
                }
                Err(e) => {
                    warn!(experiment_key = %key, flag_key = %flag_key, error = %e, "Failed to create feature flag")
                }
            }
        }

        self.event_bus.publish(ExperimentEvent::SpecRegistered {
            experiment_key: key.clone(),
            hypothesis: spec.hypothesis.clone(),
            registered_at: Utc::now(),
        });

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify_registered(&spec).await {
                warn!(sink = notifier.name(), experiment_key = %key, error = %e, "Failed to deliver registration notification");
            }
        }

        if let Err(e) = self
            .monitor_queue
            .publish(MonitorEvent {
                experiment_key: key.clone(),
            })
            .await
        {
            warn!(experiment_key = %key, error = %e, "Failed to schedule first monitor tick");
            return;
        }

        info!(
            experiment_key = %key,
            requested_by = event.requested_by.as_deref().unwrap_or("unknown"),
            "Experiment registered and monitoring scheduled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::domain::experiment::{ExperimentSpec, ExperimentStatus, Metric};
    use crate::domain::flags::FlagError;
    use crate::infrastructure::queue::InProcessQueue;
    use crate::infrastructure::repositories::InMemoryExperimentRepository;

    fn sample_spec(key: &str) -> ExperimentSpec {
        ExperimentSpec::new(
            key,
            "Green CTA converts better",
            Metric::rate("purchase_conversion", "purchase_completed"),
        )
    }

    struct Harness {
        worker: IntakeWorker,
        experiments: Arc<InMemoryExperimentRepository>,
        monitor_queue: Arc<InProcessQueue<MonitorEvent>>,
        event_bus: EventBus,
    }

    fn harness(flags: Option<Arc<dyn FlagClient>>) -> Harness {
        let experiments = Arc::new(InMemoryExperimentRepository::new());
        let intake_queue: Arc<InProcessQueue<IntakeEvent>> = Arc::new(InProcessQueue::new());
        let monitor_queue = Arc::new(InProcessQueue::new());
        let event_bus = EventBus::new(16);
        let worker = IntakeWorker::new(
            experiments.clone(),
            intake_queue,
            monitor_queue.clone(),
            event_bus.clone(),
            flags,
            vec![],
        );
        Harness {
            worker,
            experiments,
            monitor_queue,
            event_bus,
        }
    }

    struct FailingFlags;

    #[async_trait]
    impl FlagClient for FailingFlags {
        async fn create_experiment_flag(
            &self,
            _flag_key: &str,
            _variants: &[String],
        ) -> Result<(), FlagError> {
            Err(FlagError::Api("posthog is down".to_string()))
        }

        async fn update_rollout(&self, _: &str, _: f64) -> Result<(), FlagError> {
            Err(FlagError::Api("posthog is down".to_string()))
        }

        async fn disable_flag(&self, _: &str) -> Result<(), FlagError> {
            Err(FlagError::Api("posthog is down".to_string()))
        }
    }

    struct RecordingFlags {
        created: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl FlagClient for RecordingFlags {
        async fn create_experiment_flag(
            &self,
            flag_key: &str,
            variants: &[String],
        ) -> Result<(), FlagError> {
            self.created
                .lock()
                .unwrap()
                .push((flag_key.to_string(), variants.to_vec()));
            Ok(())
        }

        async fn update_rollout(&self, _: &str, _: f64) -> Result<(), FlagError> {
            Ok(())
        }

        async fn disable_flag(&self, _: &str) -> Result<(), FlagError> {
            Ok(())
        }
    }

    // ── Registration ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_intake_registers_and_schedules_first_tick() {
        let flags = Arc::new(RecordingFlags {
            created: Mutex::new(vec![]),
        });
        let h = harness(Some(flags.clone()));
        let mut events = h.event_bus.subscribe();

        h.worker
            .handle_intake(IntakeEvent {
                spec: sample_spec("checkout_cta_color"),
                requested_by: Some("dana".to_string()),
            })
            .await;

        let stored = h
            .experiments
            .get_spec(&"checkout_cta_color".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExperimentStatus::Approved);

        let created = flags.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, "experiment_checkout_cta_color");
        assert_eq!(created[0].1, vec!["control", "treatment"]);
        drop(created);

        let event = events.try_recv().unwrap();
        assert!(matches!(event, ExperimentEvent::SpecRegistered { .. }));

        let tick = h.monitor_queue.recv().await.unwrap();
        assert_eq!(tick.job.experiment_key.as_str(), "checkout_cta_color");
        assert_eq!(tick.attempt, 1);
    }

    #[tokio::test]
    async fn test_intake_duplicate_key_keeps_stored_spec() {
        let h = harness(None);
        let original = sample_spec("checkout_cta_color");
        h.experiments.save_spec(&original).await.unwrap();

        let mut replacement = sample_spec("checkout_cta_color");
        replacement.hypothesis = "Entirely different idea".to_string();
        h.worker
            .handle_intake(IntakeEvent {
                spec: replacement,
                requested_by: None,
            })
            .await;

        let stored = h
            .experiments
            .get_spec(&original.key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.hypothesis, original.hypothesis);

        // The duplicate still gets a tick scheduled
        let tick = h.monitor_queue.recv().await.unwrap();
        assert_eq!(tick.job.experiment_key, original.key);
    }

    #[tokio::test]
    async fn test_intake_drops_invalid_spec() {
        let h = harness(None);
        let mut spec = sample_spec("bad spec key!");
        spec.hypothesis = String::new();

        h.worker
            .handle_intake(IntakeEvent {
                spec,
                requested_by: None,
            })
            .await;

        assert!(h.experiments.list_specs().await.unwrap().is_empty());
        assert!(h.monitor_queue.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_intake_survives_flag_provider_outage() {
        let h = harness(Some(Arc::new(FailingFlags)));

        h.worker
            .handle_intake(IntakeEvent {
                spec: sample_spec("pricing_display"),
                requested_by: None,
            })
            .await;

        // Registration and the first tick proceed despite the flag failure
        assert!(h
            .experiments
            .get_spec(&"pricing_display".into())
            .await
            .unwrap()
            .is_some());
        let tick = h.monitor_queue.recv().await.unwrap();
        assert_eq!(tick.job.experiment_key.as_str(), "pricing_display");
    }
}
