// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use clio_model::Message;
use clio_tools::Todo;
use uuid::Uuid;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// The session's task list. Shared with a registered `todo_write` tool
    /// via `Arc` so writes made through tool dispatch are visible here.
    pub todos: Arc<Mutex<Vec<Todo>>>,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            todos: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current todo list, cloned out from behind the lock.
    pub fn todos_snapshot(&self) -> Vec<Todo> {
        self.todos.lock().unwrap().clone()
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
    }

    /// Index of the System message, if one is present at index 0.
    pub fn system_index(&self) -> Option<usize> {
        self.messages.first().filter(|m| m.role == clio_model::Role::System).map(|_| 0)
    }

    /// Index of the first User message — the original task, always kept by
    /// the context manager's proactive trim.
    pub fn first_user_index(&self) -> Option<usize> {
        self.messages.iter().position(|m| m.role == clio_model::Role::User)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
