// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Reasoning Engine Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates between the `ReasoningEngine` port and an external API.

pub mod openai;

pub use openai::OpenAiCompatibleEngine;
