// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Context Manager: token accounting and the three-layer trim pipeline
//! that keeps every request the orchestrator sends within the model's
//! token budget while preserving the most task-relevant history.
use clio_config::ContextConfig;
use clio_model::{Message, MessageContent, Role};
use clio_tools::{OutputCategory, Todo};

/// `B = model_context_window - expected_output_reserve`.
pub fn token_budget(model_context_window: u32, expected_output_reserve: u32) -> usize {
    model_context_window.saturating_sub(expected_output_reserve) as usize
}

/// Tracks a per-provider character-to-token calibration factor, updated from
/// the provider's own reported usage after every completion. Starts at 1.0
/// (the raw 4-chars-per-token heuristic in [`clio_model::Message::approx_tokens`]).
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    calibration_factor: f32,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self { calibration_factor: 1.0 }
    }
}

impl TokenEstimator {
    /// Estimated token count for a message list under the current
    /// calibration factor.
    pub fn estimate(&self, messages: &[Message]) -> usize {
        let raw: usize = messages.iter().map(|m| m.approx_tokens()).sum();
        (raw as f32 * self.calibration_factor).round() as usize
    }

    /// Fold in an observed (estimated, actual) pair from a completed
    /// request via an exponentially weighted moving average.
    pub fn calibrate(&mut self, estimated_raw_tokens: usize, actual_tokens: u32) {
        if estimated_raw_tokens == 0 || actual_tokens == 0 {
            return;
        }
        const ALPHA: f32 = 0.2;
        let observed = actual_tokens as f32 / estimated_raw_tokens as f32;
        self.calibration_factor = ALPHA * observed + (1.0 - ALPHA) * self.calibration_factor;
    }
}

const KEYWORD_BOOST_TERMS: &[&str] = &["error", "bug", "fail", "fix", "critical"];

fn role_weight(role: Role) -> f32 {
    match role {
        Role::Tool => 0.5,
        Role::User => 0.8,
        Role::Assistant => 1.0,
        Role::System => 1.0,
    }
}

fn score(message: &Message, position: usize, total: usize) -> f32 {
    let recency = if total <= 1 { 1.0 } else { position as f32 / (total - 1) as f32 };
    let text = message.as_text().unwrap_or("").to_ascii_lowercase();
    let keyword_boost = if KEYWORD_BOOST_TERMS.iter().any(|k| text.contains(k)) { 0.3 } else { 0.0 };
    recency * role_weight(message.role) + keyword_boost
}

/// The set of message indices the proactive scorer must never drop.
fn essential_indices(messages: &[Message], keep_recent: usize) -> std::collections::HashSet<usize> {
    let mut keep = std::collections::HashSet::new();
    if messages.first().map(|m| m.role == Role::System).unwrap_or(false) {
        keep.insert(0);
    }
    if let Some(i) = messages.iter().position(|m| m.role == Role::User) {
        keep.insert(i);
    }
    let n = messages.len();
    for i in n.saturating_sub(keep_recent)..n {
        keep.insert(i);
    }
    keep
}

/// Extend a drop set so tool-call/result pairs are atomic: if either half of
/// a pair (matched by `call_id`) is in `drop_set`, both are.
fn make_pairs_atomic(messages: &[Message], drop_set: &mut std::collections::HashSet<usize>) {
    use std::collections::HashMap;
    let mut by_call_id: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, m) in messages.iter().enumerate() {
        if let Some(id) = m.call_id() {
            by_call_id.entry(id).or_default().push(i);
        }
    }
    for indices in by_call_id.values() {
        if indices.iter().any(|i| drop_set.contains(i)) {
            for i in indices {
                drop_set.insert(*i);
            }
        }
    }
}

/// Apply the Proactive layer (§4.2, layer 1): if estimated tokens exceed
/// `proactive_trim_threshold * budget`, drop lowest-scored non-essential
/// messages (respecting tool-pair atomicity) until the estimate fits.
///
/// Returns `true` if anything was dropped.
pub fn proactive_trim(messages: &mut Vec<Message>, budget: usize, cfg: &ContextConfig, estimator: &TokenEstimator) -> bool {
    let threshold_tokens = (cfg.proactive_trim_threshold * budget as f32) as usize;
    if estimator.estimate(messages) <= threshold_tokens {
        return false;
    }

    let essential = essential_indices(messages, cfg.keep_recent_messages);
    let total = messages.len();
    let mut scored: Vec<(usize, f32)> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !essential.contains(i))
        .map(|(i, m)| (i, score(m, i, total)))
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    let mut drop_set = std::collections::HashSet::new();
    for (i, _) in scored {
        if drop_set.contains(&i) {
            continue;
        }
        drop_set.insert(i);
        make_pairs_atomic(messages, &mut drop_set);

        let remaining: Vec<Message> = messages
            .iter()
            .enumerate()
            .filter(|(j, _)| !drop_set.contains(j))
            .map(|(_, m)| m.clone())
            .collect();
        if estimator.estimate(&remaining) <= threshold_tokens {
            break;
        }
    }

    if drop_set.is_empty() {
        return false;
    }
    *messages = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop_set.contains(i))
        .map(|(_, m)| m.clone())
        .collect();
    true
}

/// Render the current todo list for inclusion in a continuation summary.
fn format_todo_snapshot(todos: &[Todo]) -> String {
    if todos.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = todos.iter().map(|t| format!("- [{}] {}", t.status, t.text)).collect();
    format!("\nCurrent todo snapshot:\n{}\n", lines.join("\n"))
}

/// Build the bounded synthetic System-continuation summary inserted by the
/// Validation and Reactive layers in place of dropped messages.
fn build_continuation_summary(dropped: &[Message], max_bytes: usize, todos: &[Todo]) -> Message {
    let dropped_user_requests: Vec<&str> = dropped
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| m.as_text())
        .collect();
    let dropped_tool_calls = dropped
        .iter()
        .filter(|m| matches!(m.content, MessageContent::ToolCall { .. }))
        .count();
    let dropped_tool_results = dropped
        .iter()
        .filter(|m| matches!(m.content, MessageContent::ToolResult { .. }))
        .count();

    let mut text = String::from("[Context continuation: earlier history was trimmed to fit the model's context budget.]\n\nDropped user requests:\n");
    for req in &dropped_user_requests {
        text.push_str("- ");
        text.push_str(req);
        text.push('\n');
    }
    text.push_str(&format!(
        "\nDropped tool operations: {dropped_tool_calls} call(s), {dropped_tool_results} result(s).\n"
    ));
    text.push_str(&format_todo_snapshot(todos));

    if text.len() > max_bytes {
        let cut = text[..max_bytes].rfind('\n').map(|p| p + 1).unwrap_or(max_bytes);
        text.truncate(cut);
        text.push_str("[... summary truncated to fit the budget ...]");
    }

    Message::system(text)
}

/// Apply the Validation layer (§4.2, layer 2): recompute the estimate just
/// before the wire send; if still over `budget`, drop everything outside the
/// essential set and splice in a bounded synthetic summary right after the
/// System message.
pub fn validation_trim(messages: &mut Vec<Message>, budget: usize, cfg: &ContextConfig, estimator: &TokenEstimator, todos: &[Todo]) -> bool {
    if estimator.estimate(messages) <= budget {
        return false;
    }

    let essential = essential_indices(messages, cfg.keep_recent_messages);
    let dropped: Vec<Message> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !essential.contains(i))
        .map(|(_, m)| m.clone())
        .collect();
    if dropped.is_empty() {
        return false;
    }

    let summary = build_continuation_summary(&dropped, cfg.validation_summary_max_bytes, todos);
    let kept: Vec<Message> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| essential.contains(i))
        .map(|(_, m)| m.clone())
        .collect();

    let mut rebuilt = Vec::with_capacity(kept.len() + 1);
    let has_system = kept.first().map(|m| m.role == Role::System).unwrap_or(false);
    if has_system {
        rebuilt.push(kept[0].clone());
        rebuilt.push(summary);
        rebuilt.extend(kept.into_iter().skip(1));
    } else {
        rebuilt.push(summary);
        rebuilt.extend(kept);
    }
    *messages = rebuilt;
    true
}

/// Apply the Reactive layer (§4.2, layer 3), triggered on a provider
/// context-overflow error. `attempt` is 1-based; attempt 1 keeps the
/// highest-scored 50% of non-essential messages, attempt 2 keeps 25%, and
/// attempt 3+ collapses to the minimal set (System + first User + last 2
/// messages + a regenerated summary).
pub fn reactive_trim(messages: &mut Vec<Message>, attempt: u32, cfg: &ContextConfig, todos: &[Todo]) {
    let keep_fraction = match attempt {
        1 => 0.5,
        2 => 0.25,
        _ => 0.0,
    };

    let minimal_keep = if attempt >= 3 { 2 } else { cfg.keep_recent_messages };
    let essential = essential_indices(messages, minimal_keep);
    let total = messages.len();
    let mut scored: Vec<(usize, f32)> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !essential.contains(i))
        .map(|(i, m)| (i, score(m, i, total)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    let keep_count = (scored.len() as f32 * keep_fraction).round() as usize;
    let mut keep_set: std::collections::HashSet<usize> = essential;
    for (i, _) in scored.into_iter().take(keep_count) {
        keep_set.insert(i);
    }
    // Tool-call/result pairs stay atomic on the keep side too: extending the
    // drop set would shrink `keep_set`'s complement, so instead we drop
    // anything whose pair partner isn't kept.
    let mut drop_set: std::collections::HashSet<usize> =
        (0..total).filter(|i| !keep_set.contains(i)).collect();
    make_pairs_atomic(messages, &mut drop_set);

    let dropped: Vec<Message> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| drop_set.contains(i))
        .map(|(_, m)| m.clone())
        .collect();
    let kept: Vec<Message> = messages
        .iter()
        .enumerate()
        .filter(|(i, _)| !drop_set.contains(i))
        .map(|(_, m)| m.clone())
        .collect();

    if dropped.is_empty() {
        return;
    }
    let summary = build_continuation_summary(&dropped, cfg.validation_summary_max_bytes, todos);
    let mut rebuilt = Vec::with_capacity(kept.len() + 1);
    let has_system = kept.first().map(|m| m.role == Role::System).unwrap_or(false);
    if has_system {
        rebuilt.push(kept[0].clone());
        rebuilt.push(summary);
        rebuilt.extend(kept.into_iter().skip(1));
    } else {
        rebuilt.push(summary);
        rebuilt.extend(kept);
    }
    *messages = rebuilt;
}

/// Deterministic, content-aware tool-result truncation applied per call
/// before a result enters the transcript (separate from the message-list
/// trim layers above, which operate on whole messages).
///
/// Dispatching on [`OutputCategory`] rather than tool name keeps this
/// independent of the concrete tool list; each tool declares its own shape.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                     use a more specific pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                     use read_file with offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars].rfind('\n').map(|p| p + 1).unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; \
                 content truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
