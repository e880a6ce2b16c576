// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde_json::json;
use tokio_stream::StreamExt;

use crate::application::lifecycle::{ExperimentLifecycleService, StopError, SubmitError};
use crate::domain::experiment::{ExperimentKey, ExperimentSpec};

pub struct AppState {
    pub lifecycle: Arc<dyn ExperimentLifecycleService>,
    pub started_at: std::time::Instant,
}

pub fn app(lifecycle: Arc<dyn ExperimentLifecycleService>) -> Router {
    let state = Arc::new(AppState {
        lifecycle,
        started_at: std::time::Instant::now(),
    });

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/experiments",
            post(submit_experiment).get(list_experiments),
        )
        .route("/api/experiments/{key}", get(get_experiment))
        .route("/api/experiments/{key}/stop", post(stop_experiment))
        .route("/api/experiments/{key}/events", get(stream_events))
        .with_state(state)
}

#[derive(serde::Deserialize)]
pub struct SubmitExperimentRequest {
    #[serde(flatten)]
    pub spec: ExperimentSpec,
    #[serde(default)]
    pub requested_by: Option<String>,
}

#[derive(serde::Deserialize, Default)]
pub struct StopExperimentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn submit_experiment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitExperimentRequest>,
) -> impl IntoResponse {
    match state
        .lifecycle
        .submit(payload.spec, payload.requested_by)
        .await
    {
        Ok(key) => (
            StatusCode::ACCEPTED,
            Json(json!({ "experiment_key": key, "status": "queued" })),
        ),
        Err(e @ SubmitError::Invalid(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
        Err(e @ SubmitError::Duplicate(_)) => {
            (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() })))
        }
        Err(SubmitError::Internal(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn list_experiments(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.lifecycle.list_experiments().await {
        Ok(specs) => (StatusCode::OK, Json(json!({ "experiments": specs }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let key = ExperimentKey::from(key);
    match state.lifecycle.get_experiment(&key).await {
        Ok(Some(view)) => (StatusCode::OK, Json(json!(view))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Experiment not found: {}", key) })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn stop_experiment(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    payload: Option<Json<StopExperimentRequest>>,
) -> impl IntoResponse {
    let key = ExperimentKey::from(key);
    let reason = payload
        .and_then(|Json(p)| p.reason)
        .unwrap_or_else(|| "Stopped via API".to_string());

    match state.lifecycle.stop_experiment(&key, &reason).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e @ StopError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": e.to_string() })))
        }
        Err(e @ StopError::AlreadyDecided(_)) => {
            (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() })))
        }
        Err(StopError::Internal(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let key = ExperimentKey::from(key);
    let stream = state.lifecycle.watch_experiment(&key).map(|event| {
        Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default()))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
