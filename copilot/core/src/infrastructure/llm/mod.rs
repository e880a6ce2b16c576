// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Adapters translating between our domain LLM interface and vendor APIs.
// One adapter is enough: every supported deployment (OpenAI, LM Studio,
// vLLM, Ollama) speaks the OpenAI chat-completions dialect.

pub mod openai;

pub use openai::OpenAIAdapter;
