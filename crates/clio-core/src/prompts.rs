// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt assembly. The terminal UI and concrete tool catalogue are
//! out of scope here — the composition root supplies whatever tool names are
//! registered and any working-directory context it has detected.

const BASE_PROMPT: &str = "You are an AI coding agent operating in a terminal. \
You accomplish the user's task by invoking the tools available to you, \
observing their results, and iterating until the task is done or you need \
clarification. Be direct. Prefer the smallest correct change.";

/// Build the System message text for a turn.
///
/// `working_directory` and `tool_names` are folded into the stable prefix;
/// `append` is arbitrary caller-supplied text appended verbatim (analogous
/// to a `--append-system-prompt` override).
pub fn system_prompt(working_directory: &str, tool_names: &[String], append: Option<&str>) -> String {
    let mut sorted = tool_names.to_vec();
    sorted.sort();
    let mut out = format!(
        "{BASE_PROMPT}\n\nWorking directory: {working_directory}\nAvailable tools: {}\n",
        sorted.join(", ")
    );
    if let Some(extra) = append {
        out.push('\n');
        out.push_str(extra);
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_working_directory() {
        let p = system_prompt("/ws/proj", &[], None);
        assert!(p.contains("/ws/proj"));
    }

    #[test]
    fn lists_tool_names_sorted() {
        let p = system_prompt("/ws", &["shell".into(), "list_dir".into()], None);
        let shell_pos = p.find("shell").unwrap();
        let list_dir_pos = p.find("list_dir").unwrap();
        assert!(list_dir_pos < shell_pos);
    }

    #[test]
    fn append_text_is_included_verbatim() {
        let p = system_prompt("/ws", &[], Some("Always run tests before finishing."));
        assert!(p.contains("Always run tests before finishing."));
    }
}
