// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static metadata for known models — just enough to resolve a context
//! window and default output reserve for the budget calculation in
//! `clio-core`'s context manager. No live refresh; concrete providers are
//! out of scope for this crate.

use serde::{Deserialize, Serialize};

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-opus-4-6")
    pub id: String,
    /// Provider identifier: "openai" | "anthropic" | "mock"
    pub provider: String,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
}

/// A small built-in catalog covering the mock provider and a handful of
/// well-known context windows, used only as a fallback when the caller does
/// not supply an explicit context window.
fn static_catalog() -> Vec<ModelCatalogEntry> {
    vec![
        ModelCatalogEntry {
            id: "mock-model".into(),
            provider: "mock".into(),
            context_window: 8_192,
            max_output_tokens: 2_048,
        },
        ModelCatalogEntry {
            id: "gpt-4o".into(),
            provider: "openai".into(),
            context_window: 128_000,
            max_output_tokens: 16_384,
        },
        ModelCatalogEntry {
            id: "claude-sonnet-4-5".into(),
            provider: "anthropic".into(),
            context_window: 200_000,
            max_output_tokens: 8_192,
        },
    ]
}

/// Look up a single model by provider and id.
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_mock_model() {
        let e = lookup("mock", "mock-model").unwrap();
        assert_eq!(e.context_window, 8_192);
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("nope", "nope").is_none());
    }
}
