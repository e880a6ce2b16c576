// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Monitor worker - drives experiments from first tick to terminal decision
//!
//! Consumes `MonitorEvent`s, fetches a metric snapshot, runs the decision
//! engine, and either schedules a delayed re-check (`extend`) or persists a
//! terminal outcome and actuates flags and notifications.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** The monitoring decision loop
//!
//! Delivery is at-least-once, so everything here is written to be re-run:
//! a tick for a decided experiment acks without side effects, ticks for the
//! same key serialize through a per-key lock, and the outcome row is written
//! before the spec flips to a terminal status so a torn write is repaired on
//! the next delivery instead of decided twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::advisory::AdvisoryReviewer;
use crate::domain::analysis::{analyze, AnalysisConfig, DecisionResult, MetricSnapshot};
use crate::domain::events::ExperimentEvent;
use crate::domain::experiment::{
    Decision, ExperimentKey, ExperimentSpec, ExperimentStatus, MetricKind, OutcomeRecord,
};
use crate::domain::flags::FlagClient;
use crate::domain::metrics::MetricsSource;
use crate::domain::notifier::DecisionNotifier;
use crate::domain::queue::{JobQueue, MonitorEvent};
use crate::domain::repository::{ExperimentRepository, OutcomeRepository};
use crate::infrastructure::event_bus::EventBus;

/// Configuration for the monitor worker
#[derive(Debug, Clone)]
pub struct MonitorWorkerConfig {
    /// Delay before an inconclusive experiment is re-checked
    pub interval: Duration,

    /// Delay before a failed tick is redelivered
    pub retry_delay: Duration,

    /// Deliveries of the same tick before it is dropped
    pub max_delivery_attempts: u32,

    /// Decision engine tuning
    pub analysis: AnalysisConfig,
}

impl Default for MonitorWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            retry_delay: Duration::from_secs(30),
            max_delivery_attempts: 5,
            analysis: AnalysisConfig::default(),
        }
    }
}

/// What to do with a tick after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDisposition {
    /// Done; nothing further scheduled by the caller
    Ack,
    /// Transient failure; redeliver with the attempt counter advanced
    Requeue,
    /// Unprocessable; do not redeliver
    Drop,
}

/// Monitor worker - background task
pub struct MonitorWorker {
    experiments: Arc<dyn ExperimentRepository>,
    outcomes: Arc<dyn OutcomeRepository>,
    metrics: Arc<dyn MetricsSource>,
    monitor_queue: Arc<dyn JobQueue<MonitorEvent>>,
    event_bus: EventBus,
    flags: Option<Arc<dyn FlagClient>>,
    notifiers: Vec<Arc<dyn DecisionNotifier>>,
    advisory: Option<Arc<dyn AdvisoryReviewer>>,
    config: MonitorWorkerConfig,
    /// Per-key tick locks; concurrent deliveries for one experiment serialize here.
    in_flight: parking_lot::Mutex<HashMap<ExperimentKey, Arc<tokio::sync::Mutex<()>>>>,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl MonitorWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        outcomes: Arc<dyn OutcomeRepository>,
        metrics: Arc<dyn MetricsSource>,
        monitor_queue: Arc<dyn JobQueue<MonitorEvent>>,
        event_bus: EventBus,
        flags: Option<Arc<dyn FlagClient>>,
        notifiers: Vec<Arc<dyn DecisionNotifier>>,
        advisory: Option<Arc<dyn AdvisoryReviewer>>,
        config: MonitorWorkerConfig,
    ) -> Self {
        Self {
            experiments,
            outcomes,
            metrics,
            monitor_queue,
            event_bus,
            flags,
            notifiers,
            advisory,
            config,
            in_flight: parking_lot::Mutex::new(HashMap::new()),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the monitor background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the monitor loop with graceful shutdown support
    async fn run(&self) {
        info!(
            interval_seconds = self.config.interval.as_secs(),
            max_delivery_attempts = self.config.max_delivery_attempts,
            "Monitor worker started"
        );

        loop {
            tokio::select! {
                delivery = self.monitor_queue.recv() => {
                    match delivery {
                        Some(delivery) => {
                            match self.handle_tick(&delivery.job, delivery.attempt).await {
                                TickDisposition::Ack | TickDisposition::Drop => {}
                                TickDisposition::Requeue => {
                                    if delivery.attempt >= self.config.max_delivery_attempts {
                                        warn!(
                                            experiment_key = %delivery.job.experiment_key,
                                            attempt = delivery.attempt,
                                            "Giving up on monitor tick after repeated failures"
                                        );
                                    } else if let Err(e) = self
                                        .monitor_queue
                                        .requeue(delivery, self.config.retry_delay)
                                        .await
                                    {
                                        warn!(error = %e, "Failed to requeue monitor tick");
                                    }
                                }
                            }
                        }
                        None => {
                            info!("Monitor queue closed, stopping monitor worker");
                            break;
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping monitor worker");
                    break;
                }
            }
        }

        info!("Monitor worker stopped");
    }

    /// Process one tick for one experiment.
    async fn handle_tick(&self, event: &MonitorEvent, attempt: u32) -> TickDisposition {
        let key = &event.experiment_key;
        let lock = self.tick_lock(key);
        let _held = lock.lock().await;

        let mut spec = match self.experiments.get_spec(key).await {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                warn!("No experiment spec found for {}", key);
                return TickDisposition::Drop;
            }
            Err(e) => {
                warn!(experiment_key = %key, attempt, error = %e, "Store lookup failed for monitor tick");
                return TickDisposition::Requeue;
            }
        };

        // Late or duplicate ticks for decided experiments are no-ops.
        if spec.status.is_terminal() {
            debug!(experiment_key = %key, status = spec.status.as_str(), "Experiment already decided, acking duplicate tick");
            return TickDisposition::Ack;
        }

        // Torn write from an earlier delivery: the outcome row exists but the
        // spec never flipped. Finish the transition, never decide twice.
        match self.outcomes.latest_outcome(key).await {
            Ok(Some(outcome)) => {
                warn!(experiment_key = %key, decision = outcome.decision.as_str(), "Found outcome for undecided spec, repairing status");
                return self.finish_decision(&mut spec, &outcome).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(experiment_key = %key, attempt, error = %e, "Outcome lookup failed for monitor tick");
                return TickDisposition::Requeue;
            }
        }

        // First tick moves an approved spec into monitoring.
        if spec.status == ExperimentStatus::Approved {
            spec.start_monitoring();
            if let Err(e) = self.experiments.save_spec(&spec).await {
                warn!(experiment_key = %key, error = %e, "Failed to mark experiment as monitoring");
                return TickDisposition::Requeue;
            }
            self.event_bus.publish(ExperimentEvent::MonitoringStarted {
                experiment_key: key.clone(),
                started_at: Utc::now(),
            });
            info!(experiment_key = %key, "Experiment monitoring started");
        }

        // Unknown metric kinds still fetch counts so the sample gate runs
        // before the kind is reported; a tiny experiment waits either way.
        let snapshot = match &spec.primary_metric.kind {
            MetricKind::Mean => match self.metrics.mean_samples(&spec).await {
                Ok(samples) => MetricSnapshot::Mean(samples),
                Err(e) => {
                    warn!(experiment_key = %key, attempt, error = %e, "Metrics query failed");
                    return TickDisposition::Requeue;
                }
            },
            MetricKind::Rate | MetricKind::Unknown(_) => {
                match self.metrics.rate_counts(&spec).await {
                    Ok(counts) => MetricSnapshot::Rate(counts),
                    Err(e) => {
                        warn!(experiment_key = %key, attempt, error = %e, "Metrics query failed");
                        return TickDisposition::Requeue;
                    }
                }
            }
        };

        let numeric = analyze(&spec, &snapshot, &self.config.analysis);
        debug!(
            experiment_key = %key,
            decision = numeric.decision.as_str(),
            confidence = numeric.confidence,
            sample_size = numeric.sample_size,
            "Decision engine result"
        );

        let (mut result, advisory_override) = self.apply_advisory(&spec, numeric).await;

        // Hard stop: past max duration an inconclusive experiment will not
        // converge on its own, so extend becomes stop.
        let now = Utc::now();
        if result.decision == Decision::Extend && spec.past_max_duration(now) {
            info!(
                experiment_key = %key,
                elapsed_days = spec.elapsed_days(now),
                max_duration_days = spec.max_duration_days,
                "Experiment exceeded max duration, stopping"
            );
            result.decision = Decision::Stop;
            result.reason = format!(
                "Max duration of {} days reached without a conclusive result",
                spec.max_duration_days
            );
        }

        if result.decision == Decision::Extend {
            self.event_bus.publish(ExperimentEvent::MonitorHeartbeat {
                experiment_key: key.clone(),
                samples_so_far: result.sample_size,
                reason: result.reason.clone(),
                observed_at: now,
            });
            info!(
                experiment_key = %key,
                samples = result.sample_size,
                reason = %result.reason,
                "Experiment inconclusive, extending"
            );
            if let Err(e) = self
                .monitor_queue
                .publish_after(
                    MonitorEvent {
                        experiment_key: key.clone(),
                    },
                    self.config.interval,
                )
                .await
            {
                warn!(experiment_key = %key, error = %e, "Failed to schedule follow-up monitor tick");
                return TickDisposition::Requeue;
            }
            return TickDisposition::Ack;
        }

        // Terminal decision. The outcome row is the authoritative fact and is
        // written first; the spec transition and all actuation follow.
        let mut outcome = OutcomeRecord::new(
            key.clone(),
            result.decision,
            result.confidence,
            result.sample_size,
            result.reason.clone(),
        );
        if advisory_override {
            outcome = outcome.with_advisory_override();
        }
        if let Err(e) = self.outcomes.append_outcome(&outcome).await {
            warn!(experiment_key = %key, error = %e, "Failed to append outcome record");
            return TickDisposition::Requeue;
        }

        self.finish_decision(&mut spec, &outcome).await
    }

    /// Flip the spec to its terminal status and actuate flags, events, and
    /// notifications for an already-persisted outcome.
    async fn finish_decision(
        &self,
        spec: &mut ExperimentSpec,
        outcome: &OutcomeRecord,
    ) -> TickDisposition {
        let key = spec.key.clone();
        if let Err(e) = spec.conclude(outcome.decision) {
            warn!(experiment_key = %key, error = %e, "Refusing terminal transition");
            return TickDisposition::Drop;
        }
        if let Err(e) = self.experiments.save_spec(spec).await {
            // The outcome is already durable; the next delivery repairs the
            // spec status without deciding again.
            warn!(experiment_key = %key, error = %e, "Failed to save decided spec");
            return TickDisposition::Requeue;
        }

        self.event_bus.publish(ExperimentEvent::DecisionReached {
            experiment_key: key.clone(),
            decision: outcome.decision,
            confidence: outcome.confidence,
            sample_size: outcome.final_sample_size,
            reason: outcome.reason.clone(),
            advisory_override: outcome.advisory_override,
            decided_at: outcome.recorded_at,
        });

        if let Some(flags) = &self.flags {
            let flag_key = spec.flag_key();
            let action = match outcome.decision {
                Decision::ShipTreatment => flags.update_rollout(&flag_key, 100.0).await,
                Decision::ShipControl | Decision::Stop => flags.disable_flag(&flag_key).await,
                Decision::Extend => Ok(()),
            };
            match action {
                Ok(()) => {
                    info!(experiment_key = %key, flag_key = %flag_key, decision = outcome.decision.as_str(), "Feature flag actuated for decision")
                }
                Err(e) => {
                    warn!(experiment_key = %key, flag_key = %flag_key, error = %e, "Failed to actuate feature flag for decision")
                }
            }
        }

        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify_decision(spec, outcome).await {
                warn!(sink = notifier.name(), experiment_key = %key, error = %e, "Failed to deliver decision notification");
            }
        }

        info!(
            experiment_key = %key,
            decision = outcome.decision.as_str(),
            confidence = outcome.confidence,
            sample_size = outcome.final_sample_size,
            advisory_override = outcome.advisory_override,
            "Experiment decided"
        );
        self.release_tick_lock(&key);
        TickDisposition::Ack
    }

    async fn apply_advisory(
        &self,
        spec: &ExperimentSpec,
        numeric: DecisionResult,
    ) -> (DecisionResult, bool) {
        let Some(reviewer) = &self.advisory else {
            return (numeric, false);
        };
        let Some(advice) = reviewer.review(spec, &numeric).await else {
            return (numeric, false);
        };
        if !advice.applies_over(numeric.confidence) {
            debug!(
                experiment_key = %spec.key,
                advisory_confidence = advice.confidence,
                numeric_confidence = numeric.confidence,
                "Advisory opinion at or below numeric confidence, ignoring"
            );
            return (numeric, false);
        }

        info!(
            experiment_key = %spec.key,
            decision = advice.decision.as_str(),
            confidence = advice.confidence,
            "Advisory override applied"
        );
        let mut result = numeric;
        result.decision = advice.decision;
        result.confidence = advice.confidence;
        result.reason = format!("AI override: {}", advice.rationale);
        (result, true)
    }

    fn tick_lock(&self, key: &ExperimentKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut registry = self.in_flight.lock();
        registry
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Decided experiments never tick again, so their lock entry can go.
    /// A waiter that already cloned the lock still serializes through it.
    fn release_tick_lock(&self, key: &ExperimentKey) {
        self.in_flight.lock().remove(key);
    }
}
