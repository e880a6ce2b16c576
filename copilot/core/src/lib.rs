// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! LIFT Copilot Core
//!
//! Domain model, decision engine, and lifecycle workers for the
//! experiment copilot.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Experiment monitoring and lifecycle orchestration

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
