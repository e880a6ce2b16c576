// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-Process Job Queue
//!
//! Tokio mpsc-backed implementation of the `JobQueue` port. Delayed
//! deliveries are parked in a spawned timer task so they never occupy the
//! consumer while they wait.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Job delivery between the API surface and the workers
//!
//! In-memory only: jobs are lost on restart. A durable broker can implement
//! the same port without touching the workers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::queue::{Delivery, JobQueue, QueueError};

/// Unbounded in-process queue with delayed redelivery.
pub struct InProcessQueue<T> {
    sender: mpsc::UnboundedSender<Delivery<T>>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery<T>>>,
}

impl<T> InProcessQueue<T>
where
    T: Send + 'static,
{
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Next delivery if one is already queued; never waits.
    pub fn try_recv(&self) -> Option<Delivery<T>> {
        match self.receiver.try_lock() {
            Ok(mut receiver) => receiver.try_recv().ok(),
            Err(_) => None,
        }
    }

    fn send_after(&self, delivery: Delivery<T>, delay: Duration) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(delivery).is_err() {
                debug!("Queue dropped before a delayed delivery fired");
            }
        });
    }
}

impl<T> Default for InProcessQueue<T>
where
    T: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> JobQueue<T> for InProcessQueue<T>
where
    T: Send + 'static,
{
    async fn publish(&self, job: T) -> Result<(), QueueError> {
        self.sender
            .send(Delivery { job, attempt: 1 })
            .map_err(|_| QueueError::Closed)
    }

    async fn publish_after(&self, job: T, delay: Duration) -> Result<(), QueueError> {
        self.send_after(Delivery { job, attempt: 1 }, delay);
        Ok(())
    }

    async fn recv(&self) -> Option<Delivery<T>> {
        self.receiver.lock().await.recv().await
    }

    async fn requeue(&self, delivery: Delivery<T>, delay: Duration) -> Result<(), QueueError> {
        self.send_after(
            Delivery {
                job: delivery.job,
                attempt: delivery.attempt + 1,
            },
            delay,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Delivery semantics ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_publish_delivers_in_order_with_first_attempt() {
        let queue = InProcessQueue::new();
        queue.publish("a").await.unwrap();
        queue.publish("b").await.unwrap();

        let first = queue.recv().await.unwrap();
        assert_eq!(first.job, "a");
        assert_eq!(first.attempt, 1);

        let second = queue.recv().await.unwrap();
        assert_eq!(second.job, "b");
        assert_eq!(second.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_after_holds_delivery_until_delay_elapses() {
        let queue = InProcessQueue::new();
        queue
            .publish_after("later", Duration::from_secs(600))
            .await
            .unwrap();

        assert!(queue.try_recv().is_none());

        let delivery = tokio::time::timeout(Duration::from_secs(3600), queue.recv())
            .await
            .expect("delayed delivery")
            .unwrap();
        assert_eq!(delivery.job, "later");
        assert_eq!(delivery.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_advances_attempt_counter() {
        let queue = InProcessQueue::new();
        queue.publish("flaky").await.unwrap();

        let first = queue.recv().await.unwrap();
        assert_eq!(first.attempt, 1);

        queue.requeue(first, Duration::from_secs(30)).await.unwrap();
        assert!(queue.try_recv().is_none());

        let second = tokio::time::timeout(Duration::from_secs(60), queue.recv())
            .await
            .expect("redelivery")
            .unwrap();
        assert_eq!(second.job, "flaky");
        assert_eq!(second.attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_delivery_does_not_block_immediate_jobs() {
        let queue = InProcessQueue::new();
        queue
            .publish_after("slow", Duration::from_secs(600))
            .await
            .unwrap();
        queue.publish("fast").await.unwrap();

        let first = queue.recv().await.unwrap();
        assert_eq!(first.job, "fast");
    }
}
