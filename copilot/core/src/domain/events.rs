// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::experiment::{Decision, ExperimentKey};

/// Lifecycle events broadcast by the workers.
///
/// A stalled experiment is visible through `MonitorHeartbeat` ("still
/// monitoring, N samples so far"); terminal decisions arrive exactly once as
/// `DecisionReached`. Streamed over SSE by the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExperimentEvent {
    SpecRegistered {
        experiment_key: ExperimentKey,
        hypothesis: String,
        registered_at: DateTime<Utc>,
    },
    MonitoringStarted {
        experiment_key: ExperimentKey,
        started_at: DateTime<Utc>,
    },
    MonitorHeartbeat {
        experiment_key: ExperimentKey,
        samples_so_far: u64,
        reason: String,
        observed_at: DateTime<Utc>,
    },
    DecisionReached {
        experiment_key: ExperimentKey,
        decision: Decision,
        confidence: f64,
        sample_size: u64,
        reason: String,
        advisory_override: bool,
        decided_at: DateTime<Utc>,
    },
    ExperimentStopped {
        experiment_key: ExperimentKey,
        reason: String,
        stopped_at: DateTime<Utc>,
    },
}

impl ExperimentEvent {
    /// Key of the experiment this event belongs to; used for SSE filtering.
    pub fn experiment_key(&self) -> &ExperimentKey {
        match self {
            ExperimentEvent::SpecRegistered { experiment_key, .. }
            | ExperimentEvent::MonitoringStarted { experiment_key, .. }
            | ExperimentEvent::MonitorHeartbeat { experiment_key, .. }
            | ExperimentEvent::DecisionReached { experiment_key, .. }
            | ExperimentEvent::ExperimentStopped { experiment_key, .. } => experiment_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── ExperimentEvent serialization ─────────────────────────────────────────

    #[test]
    fn test_decision_reached_serialization() {
        let event = ExperimentEvent::DecisionReached {
            experiment_key: ExperimentKey::new("checkout_button_color"),
            decision: Decision::ShipTreatment,
            confidence: 0.97,
            sample_size: 10_000,
            reason: "Strong evidence treatment is better".to_string(),
            advisory_override: false,
            decided_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("DecisionReached"));
        assert!(json.contains("ship_treatment"));

        let back: ExperimentEvent = serde_json::from_str(&json).unwrap();
        if let ExperimentEvent::DecisionReached {
            decision,
            confidence,
            sample_size,
            ..
        } = back
        {
            assert_eq!(decision, Decision::ShipTreatment);
            assert_eq!(confidence, 0.97);
            assert_eq!(sample_size, 10_000);
        } else {
            panic!("unexpected variant");
        }
    }

    #[test]
    fn test_heartbeat_serialization() {
        let event = ExperimentEvent::MonitorHeartbeat {
            experiment_key: ExperimentKey::new("pricing_display"),
            samples_so_far: 140,
            reason: "Inconclusive results".to_string(),
            observed_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("MonitorHeartbeat"));

        let back: ExperimentEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.experiment_key().as_str(), "pricing_display");
    }

    #[test]
    fn test_experiment_key_accessor_covers_all_variants() {
        let key = ExperimentKey::new("k");
        let now = Utc::now();
        let events = vec![
            ExperimentEvent::SpecRegistered {
                experiment_key: key.clone(),
                hypothesis: "h".to_string(),
                registered_at: now,
            },
            ExperimentEvent::MonitoringStarted {
                experiment_key: key.clone(),
                started_at: now,
            },
            ExperimentEvent::ExperimentStopped {
                experiment_key: key.clone(),
                reason: "stopped by operator".to_string(),
                stopped_at: now,
            },
        ];
        for event in events {
            assert_eq!(event.experiment_key(), &key);
        }
    }
}
