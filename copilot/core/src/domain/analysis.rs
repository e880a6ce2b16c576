// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Decision engine: sequential statistical tests over metric snapshots.
//!
//! Pure functions, no I/O. `analyze` applies the minimum-sample gate first,
//! then dispatches on the primary metric kind: a Bayesian Beta-Binomial
//! two-arm test for rate metrics, a z-style sequential test for mean
//! metrics. Both are repeated-testing shortcuts rather than true
//! group-sequential designs; the thresholds live in [`AnalysisConfig`] so
//! they are named constants rather than magic numbers.

use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::domain::experiment::{Decision, ExperimentSpec, MetricKind};

/// Confidence reported when the engine has no evidence either way.
const NEUTRAL_CONFIDENCE: f64 = 0.5;

/// Engine-level test constants. Experiment specs cannot override these;
/// they are fixed per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Monte-Carlo draws per posterior in the rate test.
    #[serde(default = "default_mc_draws")]
    pub mc_draws: u32,

    /// Posterior probability at which the rate test ships treatment;
    /// control ships at `1 - ship_threshold`.
    #[serde(default = "default_ship_threshold")]
    pub ship_threshold: f64,

    /// Two-sided critical value for the mean test (1.96 ~ alpha 0.05).
    #[serde(default = "default_critical_value")]
    pub critical_value: f64,

    /// Observation floor per variant below which the mean test refuses to run.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
}

fn default_mc_draws() -> u32 {
    20_000
}

fn default_ship_threshold() -> f64 {
    0.95
}

fn default_critical_value() -> f64 {
    1.96
}

fn default_min_observations() -> usize {
    10
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            mc_draws: default_mc_draws(),
            ship_threshold: default_ship_threshold(),
            critical_value: default_critical_value(),
            min_observations: default_min_observations(),
        }
    }
}

/// Success/total counts for one variant of a rate metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounts {
    pub successes: u64,
    pub total: u64,
}

impl VariantCounts {
    pub fn new(successes: u64, total: u64) -> Self {
        Self { successes, total }
    }
}

/// Per-arm counts for a rate metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCounts {
    pub control: VariantCounts,
    pub treatment: VariantCounts,
}

impl RateCounts {
    pub fn new(
        successes_control: u64,
        total_control: u64,
        successes_treatment: u64,
        total_treatment: u64,
    ) -> Self {
        Self {
            control: VariantCounts::new(successes_control, total_control),
            treatment: VariantCounts::new(successes_treatment, total_treatment),
        }
    }
}

/// Raw per-arm observations for a mean metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanSamples {
    pub control: Vec<f64>,
    pub treatment: Vec<f64>,
}

impl MeanSamples {
    pub fn new(control: Vec<f64>, treatment: Vec<f64>) -> Self {
        Self { control, treatment }
    }
}

/// One fetch from the metrics source, shaped by the primary metric kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricSnapshot {
    Rate(RateCounts),
    Mean(MeanSamples),
}

impl MetricSnapshot {
    /// Total sample across all variants; the gate input.
    pub fn total_sample(&self) -> u64 {
        match self {
            MetricSnapshot::Rate(counts) => counts.control.total + counts.treatment.total,
            MetricSnapshot::Mean(samples) => {
                (samples.control.len() + samples.treatment.len()) as u64
            }
        }
    }
}

/// Output of one `analyze` run. Wrapped into an `OutcomeRecord` by the
/// orchestrator when terminal; never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionResult {
    pub decision: Decision,
    pub confidence: f64,
    pub sample_size: u64,
    pub reason: String,
    /// Posterior `P(treatment > control)`; rate metrics only.
    pub prob_treatment_better: Option<f64>,
}

impl DecisionResult {
    fn extend(sample_size: u64, reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Extend,
            confidence: NEUTRAL_CONFIDENCE,
            sample_size,
            reason: reason.into(),
            prob_treatment_better: None,
        }
    }
}

/// Posterior for `successes` out of `total` under a uniform Beta(1,1) prior.
/// `None` for inputs no posterior can be formed from.
fn beta_posterior(successes: u64, total: u64) -> Option<Beta<f64>> {
    if successes > total {
        return None;
    }
    Beta::new((successes + 1) as f64, (total - successes + 1) as f64).ok()
}

/// Estimate `P(treatment rate > control rate)` by drawing `draws` samples
/// from each arm's Beta posterior and counting treatment wins.
///
/// Degenerate inputs (successes exceeding totals, zero draws) yield the
/// neutral 0.5 rather than an error: callers must read that as "no
/// evidence", never as a fatal condition.
pub fn bayes_prob_better(
    successes_control: u64,
    total_control: u64,
    successes_treatment: u64,
    total_treatment: u64,
    draws: u32,
) -> f64 {
    let (Some(control), Some(treatment)) = (
        beta_posterior(successes_control, total_control),
        beta_posterior(successes_treatment, total_treatment),
    ) else {
        return NEUTRAL_CONFIDENCE;
    };
    if draws == 0 {
        return NEUTRAL_CONFIDENCE;
    }

    let mut rng = rand::rng();
    let mut wins = 0u32;
    for _ in 0..draws {
        if treatment.sample(&mut rng) > control.sample(&mut rng) {
            wins += 1;
        }
    }
    f64::from(wins) / f64::from(draws)
}

fn rate_test(counts: &RateCounts, total_sample: u64, cfg: &AnalysisConfig) -> DecisionResult {
    let prob_better = bayes_prob_better(
        counts.control.successes,
        counts.control.total,
        counts.treatment.successes,
        counts.treatment.total,
        cfg.mc_draws,
    );

    let (decision, confidence, reason) = if prob_better >= cfg.ship_threshold {
        (
            Decision::ShipTreatment,
            prob_better,
            "Strong evidence treatment is better",
        )
    } else if prob_better <= 1.0 - cfg.ship_threshold {
        (
            Decision::ShipControl,
            1.0 - prob_better,
            "Strong evidence control is better",
        )
    } else {
        (Decision::Extend, NEUTRAL_CONFIDENCE, "Inconclusive results")
    };

    DecisionResult {
        decision,
        confidence,
        sample_size: total_sample,
        reason: reason.to_string(),
        prob_treatment_better: Some(prob_better),
    }
}

/// Population mean and standard deviation. Empty slices return zeros.
fn mean_and_std(data: &[f64]) -> (f64, f64) {
    if data.is_empty() {
        return (0.0, 0.0);
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    let variance = data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn mean_test(samples: &MeanSamples, total_sample: u64, cfg: &AnalysisConfig) -> DecisionResult {
    if samples.control.len() < cfg.min_observations
        || samples.treatment.len() < cfg.min_observations
    {
        return DecisionResult::extend(total_sample, "insufficient_data");
    }

    let (control_mean, control_std) = mean_and_std(&samples.control);
    let (treatment_mean, treatment_std) = mean_and_std(&samples.treatment);

    let control_se = control_std / (samples.control.len() as f64).sqrt();
    let treatment_se = treatment_std / (samples.treatment.len() as f64).sqrt();
    let pooled_se = (control_se.powi(2) + treatment_se.powi(2)).sqrt();

    if pooled_se == 0.0 {
        return DecisionResult::extend(total_sample, "test_error: zero variance");
    }

    let effect_size = (treatment_mean - control_mean) / pooled_se;

    let (decision, confidence, reason) = if effect_size > cfg.critical_value {
        (
            Decision::ShipTreatment,
            cfg.ship_threshold,
            "significant_positive",
        )
    } else if effect_size < -cfg.critical_value {
        (
            Decision::ShipControl,
            cfg.ship_threshold,
            "significant_negative",
        )
    } else {
        (
            Decision::Extend,
            NEUTRAL_CONFIDENCE,
            "no_significant_difference",
        )
    };

    DecisionResult {
        decision,
        confidence,
        sample_size: total_sample,
        reason: reason.to_string(),
        prob_treatment_better: None,
    }
}

/// Run the sequential test for one monitoring tick.
///
/// The minimum-sample gate runs before any branch: below the floor no
/// statistical conclusion is attempted, however extreme the observed rates.
/// Unknown metric kinds and mismatched snapshots degrade to `extend`; a
/// configuration error is a "wait", never a crash.
pub fn analyze(
    spec: &ExperimentSpec,
    snapshot: &MetricSnapshot,
    cfg: &AnalysisConfig,
) -> DecisionResult {
    let total_sample = snapshot.total_sample();
    if total_sample < spec.min_sample_size {
        return DecisionResult::extend(
            total_sample,
            format!(
                "Insufficient sample size ({} < {})",
                total_sample, spec.min_sample_size
            ),
        );
    }

    match (&spec.primary_metric.kind, snapshot) {
        (MetricKind::Rate, MetricSnapshot::Rate(counts)) => rate_test(counts, total_sample, cfg),
        (MetricKind::Mean, MetricSnapshot::Mean(samples)) => {
            mean_test(samples, total_sample, cfg)
        }
        (MetricKind::Unknown(kind), _) => DecisionResult::extend(
            total_sample,
            format!("Unknown metric type: {}", kind),
        ),
        (kind, _) => DecisionResult::extend(
            total_sample,
            format!(
                "Analysis error: no {} snapshot for metric '{}'",
                kind, spec.primary_metric.name
            ),
        ),
    }
}
