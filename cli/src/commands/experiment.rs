// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Experiment operations commands
//!
//! Commands: submit, list, status, stop, watch, template
//!
//! Everything except `template` talks to a running daemon: submissions go
//! through the intake queue and decisions come from the monitor, so there is
//! no embedded fallback that could silently lose an experiment when the
//! process exits.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use futures::StreamExt;
use std::path::PathBuf;

use lift_core::domain::events::ExperimentEvent;
use lift_core::domain::experiment::{Decision, ExperimentSpec, ExperimentStatus, OutcomeRecord};

use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

#[derive(Subcommand)]
pub enum ExperimentCommand {
    /// Submit an experiment manifest for intake review
    Submit {
        /// Path to experiment manifest YAML file
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Operator recorded in the audit log
        #[arg(long, value_name = "NAME")]
        requested_by: Option<String>,
    },

    /// List registered experiments
    List,

    /// Show one experiment and its latest outcome
    Status {
        /// Experiment key
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Stop a running experiment immediately
    Stop {
        /// Experiment key
        #[arg(value_name = "KEY")]
        key: String,

        /// Reason recorded on the outcome
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Follow live events for an experiment
    Watch {
        /// Experiment key
        #[arg(value_name = "KEY")]
        key: String,
    },

    /// Generate a sample experiment manifest
    Template {
        /// Output path (default: ./experiment.yaml)
        #[arg(short, long, default_value = "./experiment.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ExperimentCommand,
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    match command {
        // Template generation is local
        ExperimentCommand::Template { output } => template(output),

        command => {
            let (host, port) = super::resolve_endpoint(config_path.as_ref(), host, port)?;

            match check_daemon_running(&host, port).await {
                Ok(DaemonStatus::Running { .. }) => {}
                _ => {
                    println!("{}", "✗ Daemon is not running".red());
                    println!("Start it with: lift daemon start");
                    anyhow::bail!("Daemon unavailable at {}:{}", host, port);
                }
            }

            let client = DaemonClient::new(&host, port)?;

            match command {
                ExperimentCommand::Submit { manifest, requested_by } => {
                    submit(manifest, requested_by, client).await
                }
                ExperimentCommand::List => list(client).await,
                ExperimentCommand::Status { key } => status(&key, client).await,
                ExperimentCommand::Stop { key, reason } => stop(&key, reason, client).await,
                ExperimentCommand::Watch { key } => watch(&key, client).await,
                ExperimentCommand::Template { .. } => unreachable!("handled above"),
            }
        }
    }
}

async fn submit(
    manifest: PathBuf,
    requested_by: Option<String>,
    client: DaemonClient,
) -> Result<()> {
    let content = std::fs::read_to_string(&manifest)
        .with_context(|| format!("Failed to read manifest {:?}", manifest))?;

    let spec: ExperimentSpec = serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid experiment manifest {:?}", manifest))?;

    let key = client.submit_experiment(&spec, requested_by).await?;

    println!("{}", format!("✓ Experiment '{}' queued for review", key).green());
    println!("Check progress with: lift experiment status {}", key);

    Ok(())
}

async fn list(client: DaemonClient) -> Result<()> {
    let specs = client.list_experiments().await?;

    if specs.is_empty() {
        println!("{}", "No experiments registered".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("{:<32} {:<11} {:<6} {}", "KEY", "STATUS", "TYPE", "CREATED").bold()
    );
    for spec in specs {
        // Pad before coloring; ANSI escapes would otherwise count toward width
        let status = colorize_status_str(format!("{:<11}", spec.status), &spec.status);
        println!(
            "{:<32} {} {:<6} {}",
            spec.key,
            status,
            spec.primary_metric.kind,
            spec.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    Ok(())
}

async fn status(key: &str, client: DaemonClient) -> Result<()> {
    let Some(view) = client.get_experiment(key).await? else {
        println!("{}", format!("✗ Experiment '{}' not found", key).red());
        anyhow::bail!("Unknown experiment key: {}", key);
    };

    let spec = view.spec;
    println!("{} ({})", spec.key.to_string().bold(), colorize_status(&spec.status));
    println!("  Hypothesis: {}", spec.hypothesis);
    println!(
        "  Primary metric: {} ({}, event {})",
        spec.primary_metric.name, spec.primary_metric.kind, spec.primary_metric.event
    );
    println!("  Variants: {}", spec.variants.join(", "));
    println!("  Min sample size: {}", spec.min_sample_size);
    println!("  Max duration: {} days", spec.max_duration_days);
    println!("  Flag: {}", spec.flag_key());
    println!("  Created: {}", spec.created_at.format("%Y-%m-%d %H:%M:%S"));

    match view.latest_outcome {
        Some(outcome) => {
            println!();
            println!("{}", "Latest outcome:".bold());
            print_outcome(&outcome);
        }
        None => {
            println!();
            println!("{}", "No outcome recorded yet".dimmed());
        }
    }

    Ok(())
}

async fn stop(key: &str, reason: Option<String>, client: DaemonClient) -> Result<()> {
    let outcome = client.stop_experiment(key, reason).await?;

    println!("{}", format!("✓ Experiment '{}' stopped", key).green());
    print_outcome(&outcome);

    Ok(())
}

async fn watch(key: &str, client: DaemonClient) -> Result<()> {
    println!("Watching '{}' (Ctrl+C to exit)...", key);

    let response = client.watch_events(key).await?;
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Event stream interrupted")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end();

            // SSE frames: "data: {json}"; keep-alives are comment lines
            if let Some(data) = line.strip_prefix("data: ") {
                match serde_json::from_str::<ExperimentEvent>(data) {
                    Ok(event) => print_event(&event),
                    Err(_) => println!("{}", data),
                }
            }
        }
    }

    println!("{}", "Event stream closed".yellow());
    Ok(())
}

fn template(output: PathBuf) -> Result<()> {
    let sample = include_str!("../../templates/experiment.yaml");

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write template to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Experiment manifest generated: {}", output.display()).green()
    );
    println!("Edit it, then submit with: lift experiment submit {}", output.display());

    Ok(())
}

fn print_outcome(outcome: &OutcomeRecord) {
    println!("  Decision: {}", colorize_decision(&outcome.decision));
    println!("  Confidence: {:.1}%", outcome.confidence * 100.0);
    println!("  Sample size: {}", outcome.final_sample_size);
    println!("  Reason: {}", outcome.reason);
    if outcome.advisory_override {
        println!("  {}", "(advisory override)".yellow());
    }
    println!("  Recorded: {}", outcome.recorded_at.format("%Y-%m-%d %H:%M:%S"));
}

fn print_event(event: &ExperimentEvent) {
    match event {
        ExperimentEvent::SpecRegistered { experiment_key, hypothesis, registered_at } => {
            println!(
                "{} {} registered: {}",
                registered_at.format("%H:%M:%S"),
                experiment_key,
                hypothesis
            );
        }
        ExperimentEvent::MonitoringStarted { experiment_key, started_at } => {
            println!(
                "{} {} {}",
                started_at.format("%H:%M:%S"),
                experiment_key,
                "monitoring started".green()
            );
        }
        ExperimentEvent::MonitorHeartbeat { experiment_key, samples_so_far, reason, observed_at } => {
            println!(
                "{}",
                format!(
                    "{} {} heartbeat: {} samples ({})",
                    observed_at.format("%H:%M:%S"),
                    experiment_key,
                    samples_so_far,
                    reason
                )
                .dimmed()
            );
        }
        ExperimentEvent::DecisionReached {
            experiment_key,
            decision,
            confidence,
            sample_size,
            reason,
            advisory_override,
            decided_at,
        } => {
            let marker = if *advisory_override { " [advisory]" } else { "" };
            println!(
                "{} {} decision: {} ({:.1}%, n={}){} - {}",
                decided_at.format("%H:%M:%S"),
                experiment_key,
                colorize_decision(decision),
                confidence * 100.0,
                sample_size,
                marker,
                reason
            );
        }
        ExperimentEvent::ExperimentStopped { experiment_key, reason, stopped_at } => {
            println!(
                "{} {} {}: {}",
                stopped_at.format("%H:%M:%S"),
                experiment_key,
                "stopped".red(),
                reason
            );
        }
    }
}

fn colorize_status(status: &ExperimentStatus) -> colored::ColoredString {
    colorize_status_str(status.as_str().to_string(), status)
}

fn colorize_status_str(text: String, status: &ExperimentStatus) -> colored::ColoredString {
    match status {
        ExperimentStatus::Draft => text.dimmed(),
        ExperimentStatus::Approved => text.cyan(),
        ExperimentStatus::Running => text.green(),
        ExperimentStatus::Completed => text.blue(),
        ExperimentStatus::Stopped => text.red(),
    }
}

fn colorize_decision(decision: &Decision) -> colored::ColoredString {
    match decision {
        Decision::ShipTreatment => decision.title().green(),
        Decision::ShipControl => decision.title().red(),
        Decision::Extend => decision.title().yellow(),
        Decision::Stop => decision.title().red(),
    }
}
