// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed errors surfaced across the orchestrator/context-manager boundary.
//!
//! These are the failure codes named in the external interface: tagged
//! variants a caller matches exhaustively, not strings. Tool-level failures
//! are non-fatal by design and travel as `ToolOutput::err` back into the
//! transcript rather than through this enum — only turn-terminating failures
//! live here.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClioError {
    /// The orchestrator's iteration cap was reached without a terminal reply.
    #[error("turn aborted after {0} Compose/Await/Dispatch/Feed cycles")]
    MaxIterations(u32),

    /// Reactive trimming could not bring the request under budget within
    /// the configured number of attempts.
    #[error("context budget exhausted after {0} reactive trim attempts")]
    BudgetExhausted(u32),

    /// The turn's cooperative cancel signal fired.
    #[error("turn cancelled")]
    Cancelled,

    /// A tool call touched a path the Authorizer would not allow.
    #[error("authorization required for {path}: {reason}")]
    AuthorizationRequired { path: PathBuf, reason: String },

    /// A tool failed in a way the pipeline treats as fatal (rare — most tool
    /// failures are fed back to the model as a non-fatal `ToolResult{err}`).
    #[error("tool error ({kind}): {message}")]
    ToolError { kind: String, message: String },

    /// The LLM provider returned a fatal error (auth failure, malformed
    /// response after retries exhausted, unrecoverable 4xx/5xx).
    #[error("provider error ({kind}): {message}")]
    ProviderError { kind: String, message: String },

    /// The session store detected structural damage during load/repair that
    /// could not be healed automatically.
    #[error("session corrupt: {repair_summary}")]
    SessionCorrupt { repair_summary: String },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
