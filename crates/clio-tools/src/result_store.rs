// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

const HEAD_PREVIEW_BYTES: usize = 512;

/// A payload stored externally because it exceeded the inline threshold.
/// Keyed by `(session_id, call_id)` so re-fetches are scoped to the session
/// that produced the result.
#[derive(Debug, Clone)]
struct StoredPayload {
    content_type: String,
    bytes: Vec<u8>,
}

/// A reference that gets embedded in the transcript in place of an inline
/// payload once it exceeds the inline threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRef {
    #[serde(rename = "ref")]
    pub reference: String,
    pub byte_length: usize,
    pub content_type: String,
    pub head_preview: String,
}

/// Content-addressed store for oversized tool payloads.
///
/// Payloads are addressed by a SHA-256 digest of their content plus the
/// producing `(session_id, call_id)`, so identical content stored twice for
/// the same call collapses to one entry.
pub struct ResultStore {
    inline_threshold_bytes: usize,
    entries: Mutex<HashMap<String, StoredPayload>>,
}

impl ResultStore {
    pub fn new(inline_threshold_bytes: usize) -> Self {
        Self { inline_threshold_bytes, entries: Mutex::new(HashMap::new()) }
    }

    /// Either return `content` unchanged (inline) or store it and return a
    /// [`ResultRef`] rendered as JSON text for the transcript.
    pub fn maybe_externalize(
        &self,
        session_id: &str,
        call_id: &str,
        content_type: &str,
        content: &[u8],
    ) -> ExternalizeOutcome {
        if content.len() <= self.inline_threshold_bytes {
            return ExternalizeOutcome::Inline;
        }

        let key = Self::key(session_id, call_id, content);
        self.entries.lock().unwrap().insert(
            key.clone(),
            StoredPayload { content_type: content_type.to_string(), bytes: content.to_vec() },
        );

        let preview_len = content.len().min(HEAD_PREVIEW_BYTES);
        let head_preview = String::from_utf8_lossy(&content[..preview_len]).into_owned();

        ExternalizeOutcome::Externalized(ResultRef {
            reference: key,
            byte_length: content.len(),
            content_type: content_type.to_string(),
            head_preview,
        })
    }

    pub fn fetch(&self, reference: &str) -> Option<(String, Vec<u8>)> {
        self.entries
            .lock()
            .unwrap()
            .get(reference)
            .map(|p| (p.content_type.clone(), p.bytes.clone()))
    }

    fn key(session_id: &str, call_id: &str, content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(call_id.as_bytes());
        hasher.update(content);
        format!("result:{:x}", hasher.finalize())
    }
}

pub enum ExternalizeOutcome {
    Inline,
    Externalized(ResultRef),
}

/// Built-in tool that re-fetches a full payload previously externalized by
/// the [`ResultStore`], addressed by the `ref` it handed back.
pub struct ResultFetchTool {
    store: std::sync::Arc<ResultStore>,
}

impl ResultFetchTool {
    pub fn new(store: std::sync::Arc<ResultStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ResultFetchTool {
    fn name(&self) -> &str { "result_fetch" }

    fn description(&self) -> &str {
        "Fetch the full payload of a previously truncated tool result by its `ref`. \
         Use this when a tool result was too large to inline and only a preview was shown."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ref": {
                    "type": "string",
                    "description": "The reference id returned alongside a truncated tool result"
                }
            },
            "required": ["ref"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy { ApprovalPolicy::Auto }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let reference = match call.args.get("ref").and_then(|v| v.as_str()) {
            Some(r) => r,
            None => return ToolOutput::err(&call.id, "missing required parameter 'ref'"),
        };
        match self.store.fetch(reference) {
            Some((_content_type, bytes)) => {
                ToolOutput::ok(&call.id, String::from_utf8_lossy(&bytes).into_owned())
            }
            None => ToolOutput::err(&call.id, format!("no stored result for ref {reference}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_stays_inline() {
        let store = ResultStore::new(8 * 1024);
        let outcome = store.maybe_externalize("s1", "c1", "text/plain", b"short");
        assert!(matches!(outcome, ExternalizeOutcome::Inline));
    }

    #[test]
    fn oversized_payload_is_externalized() {
        let store = ResultStore::new(16);
        let payload = vec![b'x'; 100];
        let outcome = store.maybe_externalize("s1", "c1", "text/plain", &payload);
        match outcome {
            ExternalizeOutcome::Externalized(r) => {
                assert_eq!(r.byte_length, 100);
                assert_eq!(r.head_preview.len(), 100.min(512));
            }
            ExternalizeOutcome::Inline => panic!("expected externalized"),
        }
    }

    #[test]
    fn head_preview_capped_at_512_bytes() {
        let store = ResultStore::new(16);
        let payload = vec![b'y'; 2000];
        let outcome = store.maybe_externalize("s1", "c1", "text/plain", &payload);
        match outcome {
            ExternalizeOutcome::Externalized(r) => assert_eq!(r.head_preview.len(), 512),
            ExternalizeOutcome::Inline => panic!("expected externalized"),
        }
    }

    #[test]
    fn externalized_payload_can_be_fetched_back() {
        let store = ResultStore::new(16);
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(5);
        let outcome = store.maybe_externalize("s1", "c1", "text/plain", &payload);
        let reference = match outcome {
            ExternalizeOutcome::Externalized(r) => r.reference,
            ExternalizeOutcome::Inline => panic!("expected externalized"),
        };
        let (content_type, bytes) = store.fetch(&reference).unwrap();
        assert_eq!(content_type, "text/plain");
        assert_eq!(bytes, payload);
    }

    #[test]
    fn fetch_unknown_ref_returns_none() {
        let store = ResultStore::new(16);
        assert!(store.fetch("result:nonexistent").is_none());
    }

    #[tokio::test]
    async fn result_fetch_tool_returns_stored_content() {
        let store = std::sync::Arc::new(ResultStore::new(16));
        let payload = b"a".repeat(1000);
        let outcome = store.maybe_externalize("s1", "c1", "text/plain", &payload);
        let reference = match outcome {
            ExternalizeOutcome::Externalized(r) => r.reference,
            ExternalizeOutcome::Inline => panic!("expected externalized"),
        };
        let tool = ResultFetchTool::new(store);
        let call = ToolCall {
            id: "f1".into(),
            name: "result_fetch".into(),
            args: json!({"ref": reference}),
        };
        let out = tool.execute(&call).await;
        assert!(!out.is_error);
        assert_eq!(out.content.len(), 1000);
    }

    #[tokio::test]
    async fn result_fetch_tool_errors_on_missing_ref() {
        let store = std::sync::Arc::new(ResultStore::new(16));
        let tool = ResultFetchTool::new(store);
        let call = ToolCall { id: "f1".into(), name: "result_fetch".into(), args: json!({}) };
        let out = tool.execute(&call).await;
        assert!(out.is_error);
    }
}
