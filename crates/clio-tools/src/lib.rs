// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The tool execution pipeline: the `Tool` contract, a read-after-start-up
//! registry, the approval-policy engine, the path-authorization sandbox, the
//! secret redactor, the undo journal, and the content-addressed result
//! store. Tool Registry → Tool → Authorizer → Executor → Redactor → Result
//! Store is the dispatch order a call goes through.
//!
//! Only four built-in tools ship here (`read_file`, `write_file`, `list_dir`,
//! `shell`) plus the `result_fetch` companion to the result store — enough
//! to exercise the pipeline end to end. Anything else is a plugin, out of
//! scope for this crate.

pub mod authz;
pub mod builtin;
pub mod policy;
pub mod redact;
pub mod registry;
pub mod result_store;
pub mod todo;
pub mod tool;
pub mod undo;

pub use authz::{AuthDecision, Authorizer, GrantScope};
pub use policy::{ApprovalPolicy, ToolPolicy};
pub use redact::Redactor;
pub use registry::{ToolRegistry, ToolSchema};
pub use result_store::{ExternalizeOutcome, ResultFetchTool, ResultRef, ResultStore};
pub use todo::{enforce_single_in_progress, Todo, TodoStatus, TodoWriteTool};
pub use tool::{OutputCategory, Tool, ToolCall, ToolOutput};
pub use undo::{Snapshot, UndoJournal};

pub use builtin::list_dir::ListDirTool;
pub use builtin::read_file::ReadFileTool;
pub use builtin::shell::ShellTool;
pub use builtin::write_file::WriteTool;
