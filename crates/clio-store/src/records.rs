// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! On-disk record format: one self-describing JSON object per line.

use chrono::{DateTime, Utc};
use clio_model::Message;
use clio_tools::Todo;
use serde::{Deserialize, Serialize};

/// Current on-disk schema version. Bump when the record shapes change in a
/// way old loaders cannot read.
pub const SCHEMA_VERSION: u32 = 1;

/// One line of the session log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreRecord {
    /// Always the first record. Rejected if `schema_version` is unknown.
    Header { schema_version: u32, session_id: String, created_at: DateTime<Utc> },
    /// One conversation message, in session order.
    Message { message: Message },
    /// A full replacement of the session's task list, written whenever
    /// `todo_write` runs. The most recent snapshot in the log wins.
    TodoSnapshot { todos: Vec<Todo> },
}

impl StoreRecord {
    pub fn header(session_id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self::Header { schema_version: SCHEMA_VERSION, session_id: session_id.into(), created_at }
    }

    pub fn message(message: Message) -> Self {
        Self::Message { message }
    }

    pub fn todo_snapshot(todos: Vec<Todo>) -> Self {
        Self::TodoSnapshot { todos }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
