// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the LIFT CLI

use std::path::PathBuf;

use anyhow::{Context, Result};

use lift_core::domain::config::CopilotConfigManifest;

pub mod config;
pub mod daemon;
pub mod experiment;

pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::experiment::ExperimentCommand;

/// Resolve the daemon API endpoint from CLI flags with config fallback.
///
/// Explicit `--host`/`--port` flags win; anything left open comes from the
/// `api` section of the discovered configuration.
pub fn resolve_endpoint(
    config_path: Option<&PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(String, u16)> {
    if let (Some(host), Some(port)) = (&host, port) {
        return Ok((host.clone(), port));
    }

    let config = CopilotConfigManifest::load_or_default(config_path.cloned())
        .context("Failed to load configuration")?;

    Ok((
        host.unwrap_or(config.spec.api.host),
        port.unwrap_or(config.spec.api.port),
    ))
}
