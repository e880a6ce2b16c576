// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod advisory;
pub mod db;
pub mod event_bus;
pub mod flags;
mod format;
pub mod github;
pub mod llm;
pub mod posthog;
pub mod queue;
pub mod repositories;
pub mod slack;
