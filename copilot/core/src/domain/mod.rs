// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Pure experiment types, the statistical decision engine, and the ports
//! implemented by the infrastructure layer.

pub mod advisory;
pub mod analysis;
pub mod config;
pub mod events;
pub mod experiment;
pub mod flags;
pub mod llm;
pub mod metrics;
pub mod notifier;
pub mod queue;
pub mod repository;
