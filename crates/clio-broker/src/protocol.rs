// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire protocol between worker processes and the coordination broker.
//!
//! Frames are newline-delimited JSON objects sent over a local stream
//! socket. Each line is one [`ClientFrame`] or [`ServerFrame`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Read/write intent of a file lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Read,
    Write,
}

/// Frames sent by a worker to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame on a new connection.
    Register { agent_id: String, task: String },
    /// Sent every `heartbeat_interval_secs`.
    Heartbeat,
    RequestFileLock { files: Vec<String>, mode: LockMode },
    ReleaseFileLock { files: Vec<String> },
    RequestGitLock,
    ReleaseGitLock,
    RequestApiSlot,
    /// Reports the outcome of a request the slot was granted for, so the
    /// scheduler can recalibrate its rate model from response headers.
    ReleaseApiSlot {
        #[serde(default)]
        headers: std::collections::HashMap<String, String>,
        status: u16,
    },
    Send { to: String, msg_type: String, content: Value },
    Poll,
    PollUserInbox,
    Acknowledge { ids: Option<Vec<String>> },
    GetMessageHistory,
    /// Snapshot of broker-wide coordination state, for a worker (or the
    /// CLI's own diagnostics) to inspect who holds what.
    GetStatus,
}

/// A file lock request that could not be granted because another agent
/// already holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedFile {
    pub file: String,
    pub held_by: String,
}

/// Frames sent by the broker to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack,
    LockGranted { lock_id: String },
    LockDenied { blocked: Vec<BlockedFile> },
    GitLockGranted { lock_id: String },
    GitLockDenied { holder: String },
    ApiSlotGranted,
    ApiSlotWait { delay_ms: u64, reason: String },
    Delivered,
    Messages { messages: Vec<BusMessage> },
    History { messages: Vec<BusMessage> },
    Error { message: String },
    /// Reply to [`ClientFrame::GetStatus`].
    Status {
        registered_clients: Vec<String>,
        locked_files: usize,
        git_lock_holder: Option<String>,
        api_slots_in_use: u32,
        api_slots_max: u32,
    },
}

/// A single message on the bus, as stored in an inbox or history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub msg_type: String,
    pub content: Value,
    pub created_at: String,
    #[serde(default)]
    pub read: bool,
}

/// Encode one frame as a single NDJSON line (including the trailing `\n`).
pub fn encode_line<T: Serialize>(frame: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

/// Decode one NDJSON line (without requiring the trailing newline).
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> anyhow::Result<T> {
    serde_json::from_str(line.trim_end()).map_err(|e| anyhow::anyhow!("malformed frame: {e}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
