// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon runtime: wires repositories, queues, workers, and the HTTP API
//! from the loaded configuration, then serves until SIGTERM/Ctrl+C.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use lift_core::application::repository_factory::{
    create_experiment_repository, create_outcome_repository,
};
use lift_core::application::{
    IntakeWorker, MonitorWorker, MonitorWorkerConfig, StandardExperimentLifecycleService,
};
use lift_core::domain::advisory::AdvisoryReviewer;
use lift_core::domain::config::{resolve_api_key, CopilotConfigManifest};
use lift_core::domain::flags::FlagClient;
use lift_core::domain::llm::LLMProvider;
use lift_core::domain::metrics::MetricsSource;
use lift_core::domain::notifier::DecisionNotifier;
use lift_core::domain::queue::{IntakeEvent, JobQueue, MonitorEvent};
use lift_core::domain::repository::StorageBackend;
use lift_core::infrastructure::advisory::LlmAdvisoryReviewer;
use lift_core::infrastructure::db::Database;
use lift_core::infrastructure::event_bus::EventBus;
use lift_core::infrastructure::flags::PosthogFlagClient;
use lift_core::infrastructure::github::GitHubNotifier;
use lift_core::infrastructure::llm::OpenAIAdapter;
use lift_core::infrastructure::posthog::PosthogMetricsSource;
use lift_core::infrastructure::queue::InProcessQueue;
use lift_core::infrastructure::slack::SlackNotifier;
use lift_core::presentation::api;

use super::{remove_pid_file, write_pid_file};

const GITHUB_API_BASE: &str = "https://api.github.com";

pub async fn start_daemon(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    // Write PID file
    let pid = std::process::id();
    write_pid_file(pid)?;

    // Ensure PID file cleanup on exit
    let _guard = PidFileGuard;

    info!("LIFT copilot daemon starting (PID: {})", pid);

    // Load configuration
    let config = CopilotConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    info!("Configuration loaded: copilot={}", config.metadata.name);

    let host = host.unwrap_or_else(|| config.spec.api.host.clone());
    let port = port.unwrap_or(config.spec.api.port);

    // Storage
    let backend = config.spec.store.storage_backend()?;
    let database = match &backend {
        StorageBackend::PostgreSQL(pg) => {
            let db = Database::new(&pg.connection_string)
                .await
                .context("Failed to connect to PostgreSQL")?;
            db.ensure_schema()
                .await
                .context("Failed to create copilot tables")?;
            Some(db)
        }
        StorageBackend::InMemory => None,
    };
    let pool = database.as_ref().map(|db| db.get_pool());
    let experiments = create_experiment_repository(&backend, pool)?;
    let outcomes = create_outcome_repository(&backend, pool)?;

    // Observation source; the monitor cannot tick without one
    let metrics_config = config
        .spec
        .metrics
        .as_ref()
        .context("spec.metrics is required to start the daemon (the monitor needs an observation source)")?;
    let metrics: Arc<dyn MetricsSource> = Arc::new(PosthogMetricsSource::new(
        metrics_config.base_url.clone(),
        metrics_config.project_id.clone(),
        resolve_api_key(&metrics_config.api_key)?,
        metrics_config.lookback_days,
    ));

    // Feature flag provider
    let flags: Option<Arc<dyn FlagClient>> = match &config.spec.flags {
        Some(f) => Some(Arc::new(PosthogFlagClient::new(
            f.base_url.clone(),
            resolve_api_key(&f.api_key)?,
        ))),
        None => None,
    };

    // Notification sinks
    let mut notifiers: Vec<Arc<dyn DecisionNotifier>> = Vec::new();
    if let Some(slack) = &config.spec.notifications.slack {
        let webhook_url = resolve_api_key(&Some(slack.webhook_url.clone()))?;
        notifiers.push(Arc::new(SlackNotifier::new(
            webhook_url,
            slack.channel.clone(),
        )));
    }
    if let Some(github) = &config.spec.notifications.github {
        notifiers.push(Arc::new(GitHubNotifier::new(
            GITHUB_API_BASE,
            github.repo.clone(),
            resolve_api_key(&github.token)?,
        )));
    }

    // Advisory reviewer (BYOLLM)
    let advisory: Option<Arc<dyn AdvisoryReviewer>> = match &config.spec.advisory {
        Some(adv) if adv.enabled => {
            let provider: Arc<dyn LLMProvider> = Arc::new(OpenAIAdapter::new(
                adv.endpoint.clone(),
                resolve_api_key(&adv.api_key)?,
                adv.model.clone(),
            ));
            Some(Arc::new(LlmAdvisoryReviewer::new(provider, adv.timeout)))
        }
        _ => None,
    };

    // Queues and event bus
    let intake_queue: Arc<dyn JobQueue<IntakeEvent>> = Arc::new(InProcessQueue::new());
    let monitor_queue: Arc<dyn JobQueue<MonitorEvent>> = Arc::new(InProcessQueue::new());
    let event_bus = EventBus::with_default_capacity();

    // Workers
    let intake_worker = Arc::new(IntakeWorker::new(
        experiments.clone(),
        intake_queue.clone(),
        monitor_queue.clone(),
        event_bus.clone(),
        flags.clone(),
        notifiers.clone(),
    ));
    let intake_shutdown = intake_worker.shutdown_token();
    let intake_handle = intake_worker.start();

    let monitor_worker = Arc::new(MonitorWorker::new(
        experiments.clone(),
        outcomes.clone(),
        metrics,
        monitor_queue.clone(),
        event_bus.clone(),
        flags.clone(),
        notifiers.clone(),
        advisory,
        MonitorWorkerConfig {
            interval: config.spec.monitoring.interval,
            max_delivery_attempts: config.spec.monitoring.max_delivery_attempts,
            analysis: config.spec.monitoring.analysis.clone(),
            ..Default::default()
        },
    ));
    let monitor_shutdown = monitor_worker.shutdown_token();
    let monitor_handle = monitor_worker.start();

    // API surface
    let lifecycle = Arc::new(StandardExperimentLifecycleService::new(
        experiments,
        outcomes,
        intake_queue,
        event_bus,
        flags,
        notifiers,
    ));
    let app = api::app(lifecycle);

    // Start HTTP server
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Daemon shutting down");

    // Stop workers after the API so in-flight requests see a live queue
    intake_shutdown.cancel();
    monitor_shutdown.cancel();
    let _ = tokio::join!(intake_handle, monitor_handle);

    info!("Daemon stopped");

    Ok(())
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
