// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Load and repair a session file: reject unknown schema versions, skip a
//! malformed trailing record (the one a crash mid-write could leave
//! behind), and sweep orphaned tool-call/tool-result pairs so the
//! conversation can always be safely re-entered.

use std::path::Path;

use clio_model::Message;
use clio_tools::Todo;
use tracing::warn;

use crate::error::StoreError;
use crate::records::StoreRecord;

/// Result of loading a session file: the header fields plus the repaired
/// message list, ready to seed a `clio_core::Session`.
pub struct LoadedSession {
    pub session_id: String,
    pub messages: Vec<Message>,
    /// The most recent todo snapshot recorded in the log, if any.
    pub todos: Vec<Todo>,
    /// True if the orphan sweep had to repair anything. Surfaced so the
    /// caller can tell the user their session was salvaged, not replayed
    /// verbatim.
    pub repaired: bool,
}

pub fn load(path: impl AsRef<Path>) -> Result<LoadedSession, StoreError> {
    let content = std::fs::read_to_string(path)?;
    let mut lines = content.lines();

    let header_line = lines.next().ok_or(StoreError::MissingHeader)?;
    let header: StoreRecord = serde_json::from_str(header_line).map_err(|_| StoreError::MissingHeader)?;
    let (session_id, schema_version) = match header {
        StoreRecord::Header { session_id, schema_version, .. } => (session_id, schema_version),
        _ => return Err(StoreError::MissingHeader),
    };
    if schema_version != crate::records::SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema { found: schema_version, supported: crate::records::SCHEMA_VERSION });
    }

    let mut messages = Vec::new();
    let mut todos = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoreRecord>(line) {
            Ok(StoreRecord::Message { message }) => messages.push(message),
            Ok(StoreRecord::TodoSnapshot { todos: snapshot }) => todos = snapshot,
            Ok(StoreRecord::Header { .. }) => {
                warn!("ignoring unexpected embedded header record");
            }
            Err(_) => {
                // Truncated/garbled trailing record — the write that would
                // have completed it never finished. Drop it and stop; any
                // further lines would be equally suspect.
                warn!("skipping malformed trailing record during load");
                break;
            }
        }
    }

    let (messages, message_repaired) = orphan_sweep(messages);
    let (todos, todos_repaired) = demote_extra_in_progress(todos);
    Ok(LoadedSession { session_id, messages, todos, repaired: message_repaired || todos_repaired })
}

/// Enforce the at-most-one-`in_progress`-per-session invariant on a loaded
/// snapshot: keep the first `in_progress` todo and demote the rest to
/// `pending`, rather than rejecting the whole session.
fn demote_extra_in_progress(todos: Vec<Todo>) -> (Vec<Todo>, bool) {
    let mut repaired = false;
    let mut seen_in_progress = false;
    let demoted = todos
        .into_iter()
        .map(|mut t| {
            if t.status == clio_tools::TodoStatus::InProgress {
                if seen_in_progress {
                    t.status = clio_tools::TodoStatus::Pending;
                    repaired = true;
                } else {
                    seen_in_progress = true;
                }
            }
            t
        })
        .collect();
    (demoted, repaired)
}

/// Remove any ToolResult without its Assistant tool-call precursor, and
/// synthesize an `err=Abandoned` ToolResult for any tool-call request whose
/// result never arrived (so the conversation stays re-enterable).
fn orphan_sweep(messages: Vec<Message>) -> (Vec<Message>, bool) {
    let mut repaired = false;
    let mut pending_calls: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match &msg.content {
            clio_model::MessageContent::ToolCall { tool_call_id, .. } => {
                pending_calls.push(tool_call_id.clone());
                out.push(msg);
            }
            clio_model::MessageContent::ToolResult { tool_call_id, .. } => {
                if let Some(pos) = pending_calls.iter().position(|id| id == tool_call_id) {
                    pending_calls.remove(pos);
                    out.push(msg);
                } else {
                    // ToolResult with no precursor in the surviving log.
                    repaired = true;
                }
            }
            _ => out.push(msg),
        }
    }

    if !pending_calls.is_empty() {
        repaired = true;
        for call_id in pending_calls {
            out.push(Message::tool_result(call_id, "err=Abandoned: result was never recorded before the session ended"));
        }
    }

    (out, repaired)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
