// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// The abstracted LLM provider contract (external interface, §6 of the
/// specification). Only this contract is part of the core; transport,
/// streaming wire format, authentication, and token refresh belong to a
/// concrete driver that implements this trait outside the core.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Context window size for this provider/model, used to compute the
    /// context manager's token budget `B`. Reads from the static catalog;
    /// falls back to a conservative default when the model is unknown.
    fn context_window(&self) -> u32 {
        crate::catalog::lookup(self.name(), self.model_name())
            .map(|e| e.context_window)
            .unwrap_or(128_000)
    }

    /// Maximum output tokens this provider/model will generate — the
    /// `expected_output_reserve` subtracted from `context_window` to get `B`.
    fn max_output_tokens(&self) -> u32 {
        crate::catalog::lookup(self.name(), self.model_name())
            .map(|e| e.max_output_tokens)
            .unwrap_or(4_096)
    }
}
