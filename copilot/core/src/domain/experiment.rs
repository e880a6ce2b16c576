// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Experiment aggregate: spec, metrics, lifecycle status, and outcomes.
//!
//! An `ExperimentSpec` is created once per experiment idea and mutated only
//! by the lifecycle workers when its status or decision changes. Outcomes
//! are append-only; the latest record by timestamp is authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique, stable identifier for an experiment (e.g. `checkout_button_color`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentKey(pub String);

impl ExperimentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExperimentKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ExperimentKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How a metric is measured. Unrecognized kinds survive deserialization so
/// the decision engine can surface them as a non-fatal "wait" instead of a
/// parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Binary conversion per subject (success / total).
    Rate,
    /// Continuous observation per subject.
    Mean,
    #[serde(untagged)]
    Unknown(String),
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Rate => f.write_str("rate"),
            MetricKind::Mean => f.write_str("mean"),
            MetricKind::Unknown(other) => f.write_str(other),
        }
    }
}

/// Descriptor for one tracked metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Human-readable metric name (e.g. "checkout_conversion").
    pub name: String,

    /// Metric kind; drives the decision-engine branch.
    #[serde(rename = "type")]
    pub kind: MetricKind,

    /// Source analytics event the metric is derived from.
    pub event: String,

    /// Event property holding the observation value (mean metrics).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Metric {
    pub fn rate(name: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Rate,
            event: event.into(),
            property: None,
            description: None,
        }
    }

    pub fn mean(
        name: impl Into<String>,
        event: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Mean,
            event: event.into(),
            property: Some(property.into()),
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Approved,
    Running,
    Completed,
    Stopped,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Approved => "approved",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Stopped => "stopped",
        }
    }

    pub fn from_str_or_draft(s: &str) -> Self {
        match s {
            "approved" => ExperimentStatus::Approved,
            "running" => ExperimentStatus::Running,
            "completed" => ExperimentStatus::Completed,
            "stopped" => ExperimentStatus::Stopped,
            _ => ExperimentStatus::Draft,
        }
    }

    /// Terminal statuses accept no further monitoring ticks.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Stopped)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a monitoring tick, terminal or continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    ShipTreatment,
    ShipControl,
    Extend,
    Stop,
}

impl Decision {
    /// Terminal decisions end the monitoring loop; `extend` continues it.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Extend)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::ShipTreatment => "ship_treatment",
            Decision::ShipControl => "ship_control",
            Decision::Extend => "extend",
            Decision::Stop => "stop",
        }
    }

    /// Human form for Slack messages and PR comments.
    pub fn title(&self) -> &'static str {
        match self {
            Decision::ShipTreatment => "Ship Treatment",
            Decision::ShipControl => "Ship Control",
            Decision::Extend => "Extend",
            Decision::Stop => "Stop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ship_treatment" => Some(Decision::ShipTreatment),
            "ship_control" => Some(Decision::ShipControl),
            "extend" => Some(Decision::Extend),
            "stop" => Some(Decision::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Experiment specification. Arrives fully designed from the intake flow;
/// only status, decision, and `updated_at` change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub key: ExperimentKey,

    pub hypothesis: String,

    /// Variant names; the first is control by convention.
    #[serde(default = "default_variants")]
    pub variants: Vec<String>,

    pub primary_metric: Metric,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_metrics: Vec<Metric>,

    /// Minimum detectable effect, relative (0.05 = 5% lift).
    #[serde(default = "default_mde")]
    pub mde: f64,

    #[serde(default = "default_alpha")]
    pub alpha: f64,

    #[serde(default = "default_power")]
    pub power: f64,

    /// Gate: no statistical test runs below this total sample size.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,

    /// Hard stop for the monitoring loop.
    #[serde(default = "default_max_duration_days")]
    pub max_duration_days: u32,

    #[serde(default = "default_status")]
    pub status: ExperimentStatus,

    /// Set only when status is `completed` or `stopped`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    /// Feature-flag key controlling exposure; defaults to the experiment key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_key: Option<String>,

    /// Pull request to annotate with the decision, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_variants() -> Vec<String> {
    vec!["control".to_string(), "treatment".to_string()]
}

fn default_mde() -> f64 {
    0.05
}

fn default_alpha() -> f64 {
    0.05
}

fn default_power() -> f64 {
    0.8
}

fn default_min_sample_size() -> u64 {
    2000
}

fn default_max_duration_days() -> u32 {
    21
}

fn default_status() -> ExperimentStatus {
    ExperimentStatus::Draft
}

impl ExperimentSpec {
    pub fn new(
        key: impl Into<ExperimentKey>,
        hypothesis: impl Into<String>,
        primary_metric: Metric,
    ) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            hypothesis: hypothesis.into(),
            variants: default_variants(),
            primary_metric,
            secondary_metrics: Vec::new(),
            mde: default_mde(),
            alpha: default_alpha(),
            power: default_power(),
            min_sample_size: default_min_sample_size(),
            max_duration_days: default_max_duration_days(),
            status: ExperimentStatus::Draft,
            decision: None,
            flag_key: None,
            pr_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Flag key controlling variant exposure. Unless the spec names one
    /// explicitly, flags follow the `experiment_{key}` convention.
    pub fn flag_key(&self) -> String {
        self.flag_key
            .clone()
            .unwrap_or_else(|| format!("experiment_{}", self.key))
    }

    /// Days since the spec was created, floored at zero.
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }

    /// Whether the monitoring loop has outlived `max_duration_days`.
    pub fn past_max_duration(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_days(now) >= i64::from(self.max_duration_days)
    }

    pub fn approve(&mut self) {
        self.status = ExperimentStatus::Approved;
        self.updated_at = Utc::now();
    }

    pub fn start_monitoring(&mut self) {
        self.status = ExperimentStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Record a terminal decision. Ship decisions complete the experiment,
    /// `stop` marks it stopped; `extend` is not terminal and is rejected,
    /// keeping the invariant that `decision` is only set in a terminal status.
    pub fn conclude(&mut self, decision: Decision) -> Result<(), String> {
        if !decision.is_terminal() {
            return Err(format!(
                "cannot conclude experiment '{}' with non-terminal decision '{}'",
                self.key, decision
            ));
        }
        self.status = match decision {
            Decision::Stop => ExperimentStatus::Stopped,
            _ => ExperimentStatus::Completed,
        };
        self.decision = Some(decision);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Validate the spec structure and statistical parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.key.as_str().is_empty() {
            return Err("experiment key cannot be empty".to_string());
        }
        for ch in self.key.as_str().chars() {
            if !ch.is_ascii_alphanumeric() && ch != '_' && ch != '-' {
                return Err(format!(
                    "invalid experiment key '{}': must be alphanumeric with '_' or '-'",
                    self.key
                ));
            }
        }
        if self.hypothesis.trim().is_empty() {
            return Err("hypothesis cannot be empty".to_string());
        }
        if self.variants.len() < 2 {
            return Err(format!(
                "need at least 2 variants, got {}",
                self.variants.len()
            ));
        }
        if let MetricKind::Unknown(kind) = &self.primary_metric.kind {
            return Err(format!("unknown primary metric type: '{}'", kind));
        }
        if self.primary_metric.kind == MetricKind::Mean && self.primary_metric.property.is_none() {
            return Err(format!(
                "mean metric '{}' needs a property to read observations from",
                self.primary_metric.name
            ));
        }
        if !(self.mde > 0.0) {
            return Err(format!("mde must be positive, got {}", self.mde));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(format!("alpha must be in (0, 1), got {}", self.alpha));
        }
        if !(self.power > 0.0 && self.power < 1.0) {
            return Err(format!("power must be in (0, 1), got {}", self.power));
        }
        if self.min_sample_size == 0 {
            return Err("min_sample_size must be positive".to_string());
        }
        if self.max_duration_days == 0 {
            return Err("max_duration_days must be positive".to_string());
        }
        Ok(())
    }
}

/// One appended decision record for an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: Uuid,
    pub experiment_key: ExperimentKey,
    pub decision: Decision,
    pub confidence: f64,
    pub final_sample_size: u64,
    pub reason: String,
    /// True when an advisory reviewer overrode the numeric decision.
    #[serde(default)]
    pub advisory_override: bool,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn new(
        experiment_key: ExperimentKey,
        decision: Decision,
        confidence: f64,
        final_sample_size: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            experiment_key,
            decision,
            confidence,
            final_sample_size,
            reason: reason.into(),
            advisory_override: false,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_advisory_override(mut self) -> Self {
        self.advisory_override = true;
        self
    }
}
