// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Bus Implementation - Pub/Sub for Experiment Events
//!
//! Provides in-memory event streaming using tokio broadcast channels.
//! Enables real-time event streaming to CLI, SSE endpoints, and observers.
//!
//! In-memory only: events published before a subscriber attaches, or past
//! the channel capacity, are not replayed.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::domain::events::ExperimentEvent;
use crate::domain::experiment::ExperimentKey;

/// Event bus for publishing and subscribing to experiment events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<ExperimentEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: ExperimentEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all experiment events
    pub fn subscribe(&self) -> EventReceiver {
        let receiver = self.sender.subscribe();
        EventReceiver { receiver }
    }

    /// Stream of events for a single experiment, for SSE endpoints.
    /// Lagged gaps are skipped rather than surfaced to the consumer.
    pub fn watch(
        &self,
        key: &ExperimentKey,
    ) -> Pin<Box<dyn Stream<Item = ExperimentEvent> + Send>> {
        let key = key.clone();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |result| {
            match result {
                Ok(event) if event.experiment_key() == &key => Some(event),
                Ok(_) => None,
                Err(e) => {
                    warn!("Event watcher lagged: {}", e);
                    None
                }
            }
        });
        Box::pin(stream)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all experiment events
pub struct EventReceiver {
    receiver: broadcast::Receiver<ExperimentEvent>,
}

impl EventReceiver {
    /// Receive the next event (blocks until event is available)
    pub async fn recv(&mut self) -> Result<ExperimentEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<ExperimentEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn heartbeat(key: &str, samples: u64) -> ExperimentEvent {
        ExperimentEvent::MonitorHeartbeat {
            experiment_key: ExperimentKey::new(key),
            samples_so_far: samples,
            reason: "Inconclusive results".to_string(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish(heartbeat("checkout_cta_color", 140));

        let received = receiver.recv().await.unwrap();
        match received {
            ExperimentEvent::MonitorHeartbeat {
                experiment_key,
                samples_so_far,
                ..
            } => {
                assert_eq!(experiment_key.as_str(), "checkout_cta_color");
                assert_eq!(samples_so_far, 140);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(heartbeat("checkout_cta_color", 5));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_watch_filters_other_experiments() {
        let event_bus = EventBus::new(10);
        let mut stream = event_bus.watch(&ExperimentKey::new("checkout_cta_color"));

        // Interleave events for two experiments
        event_bus.publish(heartbeat("pricing_display", 1));
        event_bus.publish(heartbeat("checkout_cta_color", 2));
        event_bus.publish(heartbeat("pricing_display", 3));
        event_bus.publish(heartbeat("checkout_cta_color", 4));

        let first = stream.next().await.unwrap();
        match first {
            ExperimentEvent::MonitorHeartbeat { samples_so_far, .. } => {
                assert_eq!(samples_so_far, 2)
            }
            _ => panic!("Wrong event type received"),
        }
        let second = stream.next().await.unwrap();
        match second {
            ExperimentEvent::MonitorHeartbeat { samples_so_far, .. } => {
                assert_eq!(samples_so_far, 4)
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }
}
