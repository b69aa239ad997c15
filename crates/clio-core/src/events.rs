// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clio_tools::ToolCall;

/// Events emitted by the orchestrator during a single turn. Consumers (the
/// headless CLI, or any future interactive frontend) subscribe to these to
/// drive their output without reaching into orchestrator internals.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model.
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes).
    TextComplete(String),
    /// The model has requested a tool call.
    ToolCallStarted(ToolCall),
    /// A tool call finished.
    ToolCallFinished { call_id: String, tool_name: String, output: String, is_error: bool },
    /// Context was trimmed; statistics for the caller.
    ContextCompacted { tokens_before: usize, tokens_after: usize, layer: TrimLayer },
    /// Current token usage update.
    TokenUsage { input: u32, output: u32, context_total: usize },
    /// The agent has finished processing the current user turn.
    TurnComplete,
    /// The turn was cancelled; any text streamed before the cancel point.
    Aborted { partial_text: String },
    /// A recoverable error occurred (fed back into the transcript, not fatal).
    Error(String),
}

/// Which Context Manager layer produced a `ContextCompacted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimLayer {
    Proactive,
    Validation,
    Reactive(u32),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_layer_reactive_carries_attempt_number() {
        assert_eq!(TrimLayer::Reactive(2), TrimLayer::Reactive(2));
        assert_ne!(TrimLayer::Reactive(1), TrimLayer::Reactive(2));
    }

    #[test]
    fn context_compacted_event_constructs() {
        let ev = AgentEvent::ContextCompacted { tokens_before: 900, tokens_after: 560, layer: TrimLayer::Proactive };
        match ev {
            AgentEvent::ContextCompacted { tokens_before, tokens_after, layer } => {
                assert!(tokens_after < tokens_before);
                assert_eq!(layer, TrimLayer::Proactive);
            }
            _ => panic!("wrong variant"),
        }
    }
}
