// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Queue
//!
//! Provides job queue functionality for the system.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the delivery contract for lifecycle jobs
//!
//! Delivery semantics are at-least-once: a job may be redelivered after a
//! requeue, so every consumer must be idempotent. `Delivery::attempt` counts
//! deliveries of the same job (first delivery is attempt 1) so consumers can
//! bound redelivery instead of looping forever.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::experiment::{ExperimentKey, ExperimentSpec};

/// Monitor tick for one experiment. Carries only the key; the consumer
/// re-reads all state from the repositories on every delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub experiment_key: ExperimentKey,
}

/// Experiment registration job consumed by the intake worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub spec: ExperimentSpec,

    /// Operator or automation that submitted the spec, for audit logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

/// One delivery of a job to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    pub job: T,

    /// 1 on first delivery, incremented by each requeue.
    pub attempt: u32,
}

/// Domain interface for job queues
///
/// Publishing never blocks on the consumer. `publish_after` schedules a
/// delayed delivery without occupying a consumer slot in the meantime, which
/// is what keeps one slow experiment from starving the rest.
#[async_trait]
pub trait JobQueue<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Enqueue a job for immediate delivery
    async fn publish(&self, job: T) -> Result<(), QueueError>;

    /// Enqueue a job for delivery no sooner than `delay` from now
    async fn publish_after(&self, job: T, delay: Duration) -> Result<(), QueueError>;

    /// Next delivery, or `None` once the queue is closed and drained
    async fn recv(&self) -> Option<Delivery<T>>;

    /// Redeliver a job after `delay`, with its attempt counter advanced
    async fn requeue(&self, delivery: Delivery<T>, delay: Duration) -> Result<(), QueueError>;
}

/// Errors that can occur during queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,
}
