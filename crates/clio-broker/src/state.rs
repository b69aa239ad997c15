// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory broker state: file locks, the git lock, the message bus and
//! the client registry. Owned exclusively by the broker's single actor
//! task (see `server.rs`) — no internal locking is needed here because
//! only one task ever touches it.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use uuid::Uuid;

use crate::protocol::{BusMessage, LockMode};
use crate::scheduler::ApiSlotScheduler;

const MAX_USER_HISTORY: usize = 10_000;

struct FileLockEntry {
    owner: String,
    mode: LockMode,
}

pub struct ClientInfo {
    pub task: String,
    pub last_seen: Instant,
}

/// All broker state. Not `Clone`, not `Sync` — single-owner by design.
pub struct BrokerState {
    clients: HashMap<String, ClientInfo>,
    file_locks: HashMap<String, FileLockEntry>,
    git_lock_holder: Option<String>,
    pub scheduler: ApiSlotScheduler,
    inboxes: HashMap<String, VecDeque<BusMessage>>,
    user_history: Vec<BusMessage>,
}

impl BrokerState {
    pub fn new(max_parallel_api_slots: u32) -> Self {
        Self {
            clients: HashMap::new(),
            file_locks: HashMap::new(),
            git_lock_holder: None,
            scheduler: ApiSlotScheduler::new(max_parallel_api_slots),
            inboxes: HashMap::new(),
            user_history: Vec::new(),
        }
    }

    pub fn register(&mut self, agent_id: &str, task: &str, now: Instant) {
        self.clients.insert(agent_id.to_string(), ClientInfo { task: task.to_string(), last_seen: now });
        self.inboxes.entry(agent_id.to_string()).or_default();
    }

    pub fn heartbeat(&mut self, agent_id: &str, now: Instant) {
        if let Some(c) = self.clients.get_mut(agent_id) {
            c.last_seen = now;
        }
    }

    /// Clients that have not been heard from within `timeout` of `now`.
    pub fn stale_clients(&self, now: Instant, timeout: std::time::Duration) -> Vec<String> {
        self.clients
            .iter()
            .filter(|(_, info)| now.saturating_duration_since(info.last_seen) >= timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Release everything owned by a disconnecting (or timed-out) client:
    /// its file locks, the git lock if held, and its inbox.
    pub fn disconnect(&mut self, agent_id: &str) {
        self.file_locks.retain(|_, entry| entry.owner != agent_id);
        if self.git_lock_holder.as_deref() == Some(agent_id) {
            self.git_lock_holder = None;
        }
        self.clients.remove(agent_id);
        self.inboxes.remove(agent_id);
    }

    /// Attempt to acquire locks on every path in `files` for `owner`. Locks
    /// are non-reentrant and advisory, scoped by literal canonicalized path.
    /// All-or-nothing: if any path is held by someone else, nothing is
    /// granted and the blocking paths are returned along with their
    /// current owner.
    pub fn request_file_lock(&mut self, owner: &str, files: &[String], mode: LockMode) -> Result<String, Vec<(String, String)>> {
        let blocked: Vec<(String, String)> = files
            .iter()
            .filter_map(|f| {
                self.file_locks.get(f).filter(|e| e.owner != owner).map(|e| (f.clone(), e.owner.clone()))
            })
            .collect();
        if !blocked.is_empty() {
            return Err(blocked);
        }
        for f in files {
            self.file_locks.insert(f.clone(), FileLockEntry { owner: owner.to_string(), mode });
        }
        Ok(Uuid::new_v4().to_string())
    }

    pub fn release_file_lock(&mut self, owner: &str, files: &[String]) {
        for f in files {
            if self.file_locks.get(f).map(|e| e.owner == owner).unwrap_or(false) {
                self.file_locks.remove(f);
            }
        }
    }

    pub fn request_git_lock(&mut self, owner: &str) -> Result<String, String> {
        match &self.git_lock_holder {
            Some(holder) if holder != owner => Err(holder.clone()),
            _ => {
                self.git_lock_holder = Some(owner.to_string());
                Ok(Uuid::new_v4().to_string())
            }
        }
    }

    pub fn release_git_lock(&mut self, owner: &str) {
        if self.git_lock_holder.as_deref() == Some(owner) {
            self.git_lock_holder = None;
        }
    }

    /// Deliver a message FIFO per sender→recipient pair. `to == "all"`
    /// broadcasts to every currently-registered agent (not the user, and
    /// not replayed to late joiners).
    pub fn send(&mut self, from: &str, to: &str, msg_type: &str, content: serde_json::Value, now: &str) {
        let msg = BusMessage {
            id: Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            msg_type: msg_type.to_string(),
            content,
            created_at: now.to_string(),
            read: false,
        };
        if to == "user" {
            self.user_history.push(msg);
            if self.user_history.len() > MAX_USER_HISTORY {
                self.user_history.remove(0);
            }
        } else if to == "all" {
            let recipients: Vec<String> = self.clients.keys().cloned().collect();
            for r in recipients {
                if r != from {
                    self.inboxes.entry(r).or_default().push_back(msg.clone());
                }
            }
        } else {
            self.inboxes.entry(to.to_string()).or_default().push_back(msg);
        }
    }

    /// Drain (destructively) the given agent's inbox.
    pub fn poll(&mut self, agent_id: &str) -> Vec<BusMessage> {
        self.inboxes.get_mut(agent_id).map(|q| q.drain(..).collect()).unwrap_or_default()
    }

    /// Non-destructively return the user's unread messages.
    pub fn poll_user_inbox(&self) -> Vec<BusMessage> {
        self.user_history.iter().filter(|m| !m.read).cloned().collect()
    }

    /// Mark user messages read, by id or all.
    pub fn acknowledge(&mut self, ids: Option<&[String]>) {
        match ids {
            Some(ids) => {
                for m in self.user_history.iter_mut() {
                    if ids.contains(&m.id) {
                        m.read = true;
                    }
                }
            }
            None => {
                for m in self.user_history.iter_mut() {
                    m.read = true;
                }
            }
        }
    }

    pub fn message_history(&self) -> Vec<BusMessage> {
        self.user_history.clone()
    }

    /// Snapshot of coordination state for [`crate::protocol::ServerFrame::Status`].
    pub fn status(&self) -> BrokerStatus {
        BrokerStatus {
            registered_clients: self.clients.keys().cloned().collect(),
            locked_files: self.file_locks.len(),
            git_lock_holder: self.git_lock_holder.clone(),
            api_slots_in_use: self.scheduler.in_flight(),
            api_slots_max: self.scheduler.max_parallel(),
        }
    }
}

/// Plain-data snapshot returned by [`BrokerState::status`].
pub struct BrokerStatus {
    pub registered_clients: Vec<String>,
    pub locked_files: usize,
    pub git_lock_holder: Option<String>,
    pub api_slots_in_use: u32,
    pub api_slots_max: u32,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
