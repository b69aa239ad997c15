// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TodoStatus::Pending => "pending",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Done => "done",
            TodoStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// One item in the session's task list. Invariant: at most one
/// `in_progress` todo per session, enforced by [`enforce_single_in_progress`]
/// wherever the list is replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub text: String,
    pub status: TodoStatus,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reject a todo list with more than one `in_progress` item.
pub fn enforce_single_in_progress(todos: &[Todo]) -> Result<(), String> {
    let count = todos.iter().filter(|t| t.status == TodoStatus::InProgress).count();
    if count > 1 {
        return Err(format!("at most one todo can be 'in_progress' at a time, got {count}"));
    }
    Ok(())
}

/// Built-in tool that replaces the session's entire todo list. Mirrors the
/// shared-state pattern used by [`crate::result_store::ResultFetchTool`]: the
/// caller constructs one `Arc<Mutex<Vec<Todo>>>` and hands a clone to both
/// this tool and whatever owns the session, so writes made here are visible
/// wherever the session reads its current todos.
pub struct TodoWriteTool {
    todos: Arc<Mutex<Vec<Todo>>>,
}

impl TodoWriteTool {
    pub fn new(todos: Arc<Mutex<Vec<Todo>>>) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage the session's task list.\n\n\
         ## Task Statuses\n\
         - pending: Not yet started\n\
         - in_progress: Currently being worked on (only ONE at a time)\n\
         - done: Finished successfully\n\
         - blocked: Cannot proceed until something else resolves\n\n\
         ## IMPORTANT\n\
         - Each item requires a unique id, text, and status\n\
         - Only one item in_progress at a time — enforced at execution\n\
         - Calling todo_write replaces the entire list (not a merge/patch)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Array of todo items to set (replaces existing list)",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "text": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "done", "blocked"]
                            },
                            "priority": { "type": "integer", "minimum": 0, "maximum": 255 }
                        },
                        "required": ["id", "text", "status"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let todos_value = match call.args.get("todos").and_then(|v| v.as_array()) {
            Some(arr) => arr.clone(),
            None => return ToolOutput::err(&call.id, "missing 'todos' array"),
        };

        let previous = self.todos.lock().unwrap().clone();
        let now = Utc::now();
        let mut items = Vec::with_capacity(todos_value.len());
        for item in &todos_value {
            let id = match item.get("id").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, "todo item missing 'id'"),
            };
            let text = match item.get("text").and_then(|v| v.as_str()) {
                Some(s) => s.to_string(),
                None => return ToolOutput::err(&call.id, format!("todo '{id}' missing 'text'")),
            };
            let status = match item.get("status").and_then(|v| v.as_str()) {
                Some("pending") => TodoStatus::Pending,
                Some("in_progress") => TodoStatus::InProgress,
                Some("done") => TodoStatus::Done,
                Some("blocked") => TodoStatus::Blocked,
                Some(other) => return ToolOutput::err(&call.id, format!("invalid status '{other}' for todo '{id}'")),
                None => return ToolOutput::err(&call.id, format!("todo '{id}' missing 'status'")),
            };
            let priority = item.get("priority").and_then(|v| v.as_u64()).unwrap_or(0) as u8;
            let created_at = previous.iter().find(|t| t.id == id).map(|t| t.created_at).unwrap_or(now);
            items.push(Todo { id, text, status, priority, created_at, updated_at: now });
        }

        if let Err(msg) = enforce_single_in_progress(&items) {
            return ToolOutput::err(&call.id, msg);
        }

        let summary = format_todos(&items);
        *self.todos.lock().unwrap() = items;
        ToolOutput::ok(&call.id, summary)
    }
}

fn format_todos(items: &[Todo]) -> String {
    if items.is_empty() {
        return "Todo list cleared.".to_string();
    }
    let lines: Vec<String> = items.iter().map(|t| format!("[{}] ({}) {}", t.status, t.id, t.text)).collect();
    format!("Todos updated:\n{}", lines.join("\n"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "t1".into(), name: "todo_write".into(), args }
    }

    fn tool() -> (TodoWriteTool, Arc<Mutex<Vec<Todo>>>) {
        let todos = Arc::new(Mutex::new(Vec::new()));
        (TodoWriteTool::new(todos.clone()), todos)
    }

    #[test]
    fn enforce_single_in_progress_allows_zero_or_one() {
        let now = Utc::now();
        let one = vec![Todo { id: "1".into(), text: "a".into(), status: TodoStatus::InProgress, priority: 0, created_at: now, updated_at: now }];
        assert!(enforce_single_in_progress(&one).is_ok());
        assert!(enforce_single_in_progress(&[]).is_ok());
    }

    #[test]
    fn enforce_single_in_progress_rejects_two() {
        let now = Utc::now();
        let two = vec![
            Todo { id: "1".into(), text: "a".into(), status: TodoStatus::InProgress, priority: 0, created_at: now, updated_at: now },
            Todo { id: "2".into(), text: "b".into(), status: TodoStatus::InProgress, priority: 0, created_at: now, updated_at: now },
        ];
        assert!(enforce_single_in_progress(&two).is_err());
    }

    #[tokio::test]
    async fn sets_todos() {
        let (tool, todos) = tool();
        let out = tool
            .execute(&call(json!({
                "todos": [
                    {"id": "1", "text": "do something", "status": "pending"},
                    {"id": "2", "text": "in progress", "status": "in_progress"}
                ]
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let locked = todos.lock().unwrap();
        assert_eq!(locked.len(), 2);
        assert_eq!(locked[0].id, "1");
    }

    #[tokio::test]
    async fn rejects_multiple_in_progress_and_keeps_previous_list() {
        let (tool, todos) = tool();
        tool.execute(&call(json!({ "todos": [{"id": "1", "text": "a", "status": "pending"}] }))).await;
        let out = tool
            .execute(&call(json!({
                "todos": [
                    {"id": "1", "text": "a", "status": "in_progress"},
                    {"id": "2", "text": "b", "status": "in_progress"}
                ]
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("in_progress"));
        assert_eq!(todos.lock().unwrap().len(), 1, "a rejected write must not replace the list");
    }

    #[tokio::test]
    async fn missing_todos_is_error() {
        let (tool, _todos) = tool();
        let out = tool.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing 'todos'"));
    }

    #[tokio::test]
    async fn created_at_is_preserved_across_updates() {
        let (tool, todos) = tool();
        tool.execute(&call(json!({ "todos": [{"id": "1", "text": "a", "status": "pending"}] }))).await;
        let first_created = todos.lock().unwrap()[0].created_at;
        tool.execute(&call(json!({ "todos": [{"id": "1", "text": "a", "status": "done"}] }))).await;
        let second = todos.lock().unwrap()[0].clone();
        assert_eq!(second.created_at, first_created);
        assert_eq!(second.status, TodoStatus::Done);
    }
}
