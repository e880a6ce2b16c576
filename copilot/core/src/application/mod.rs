// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod intake;
pub mod lifecycle;
pub mod monitor;
pub mod repository_factory;

// Re-export the main entry points for convenience
pub use intake::IntakeWorker;
pub use lifecycle::{
    ExperimentLifecycleService, ExperimentStatusView, StandardExperimentLifecycleService,
    StopError, SubmitError,
};
pub use monitor::{MonitorWorker, MonitorWorkerConfig, TickDisposition};
