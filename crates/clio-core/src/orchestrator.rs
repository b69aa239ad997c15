// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The Orchestrator: the Compose/Await/Dispatch/Feed state machine that
//! drives one user turn to completion.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use clio_config::Config;
use clio_model::{CompletionRequest, Message, ModelProvider, ResponseEvent, ToolSchema as ModelToolSchema};
use clio_tools::{
    AuthDecision, Authorizer, ExternalizeOutcome, Redactor, ResultStore, Todo, ToolCall, ToolOutput,
    ToolPolicy, ToolRegistry, UndoJournal,
};

use crate::context::{proactive_trim, reactive_trim, token_budget, validation_trim, TokenEstimator};
use crate::errors::ClioError;
use crate::events::{AgentEvent, TrimLayer};
use crate::prompts::system_prompt;
use crate::session::Session;

/// Internal state of the agent loop. Mirrors the Compose/Await/Dispatch/Feed
/// table: `Compose` builds the outgoing request, `Await` sends it and
/// classifies the reply, `Dispatch` runs any requested tool calls
/// concurrently, `Feed` appends their results and loops back to `Compose`.
enum State {
    Compose,
    Await,
    Dispatch(Vec<ToolCall>),
    Feed(Vec<ToolOutput>),
}

/// How a turn ended. Every variant is deterministic and surfaced to the
/// caller — there is no panic path out of [`Orchestrator::run_turn`].
#[derive(Debug)]
pub enum TurnOutcome {
    Ok,
    MaxIterations,
    BudgetExhausted,
    Cancelled,
    Fatal(ClioError),
}

enum AwaitOutcome {
    Terminal(String),
    ToolCalls(Vec<ToolCall>),
    Cancelled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderErrorClass {
    RateLimited,
    ContextOverflow,
    Fatal,
    Transient,
}

fn classify_provider_error(err: &anyhow::Error) -> ProviderErrorClass {
    let msg = err.to_string().to_ascii_lowercase();
    if msg.contains("429") || msg.contains("rate limit") || msg.contains("503") || msg.contains("retry-after") {
        ProviderErrorClass::RateLimited
    } else if msg.contains("context") && (msg.contains("overflow") || msg.contains("too long") || msg.contains("maximum context")) {
        ProviderErrorClass::ContextOverflow
    } else if msg.contains("401") || msg.contains("403") || msg.contains("unauthorized") || msg.contains("invalid api key") {
        ProviderErrorClass::Fatal
    } else {
        ProviderErrorClass::Transient
    }
}

/// Drives one session's conversation loop. Owns the session transcript and
/// every tool-pipeline collaborator (registry, authorizer, redactor, undo
/// journal, result store, approval policy) needed to execute a turn without
/// reaching back out to the composition root mid-turn.
pub struct Orchestrator {
    pub session: Session,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelProvider>,
    config: Arc<Config>,
    working_directory: String,
    authorizer: Authorizer,
    redactor: Redactor,
    undo: UndoJournal,
    result_store: Arc<ResultStore>,
    policy: ToolPolicy,
    estimator: TokenEstimator,
    /// Cumulative redacted tool-output bytes produced so far this turn, reset
    /// at the top of [`Orchestrator::run_turn`]. Atomic because concurrent
    /// dispatch calls all observe and bump it through a shared `&self`.
    tool_output_bytes_used: std::sync::atomic::AtomicUsize,
}

impl Orchestrator {
    /// `result_store` and `todos` are supplied by the caller (rather than
    /// built internally) so the same instances can also be registered into
    /// the `ToolRegistry` as a `result_fetch`/`todo_write` tool — otherwise
    /// the orchestrator's bookkeeping and the tools a model actually calls
    /// would silently diverge onto separate copies of the same state.
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        config: Arc<Config>,
        working_directory: impl Into<String>,
        result_store: Arc<ResultStore>,
        todos: Arc<Mutex<Vec<Todo>>>,
    ) -> Self {
        let working_directory = working_directory.into();
        let budget = token_budget(model.context_window(), config.context.expected_output_reserve);
        let mut session = Session::new(budget);
        session.todos = todos;
        Self {
            session,
            authorizer: Authorizer::new(working_directory.clone()),
            redactor: Redactor::new(config.tools.redaction_level),
            undo: UndoJournal::new(config.tools.undo_ring_size),
            result_store,
            policy: ToolPolicy::from_config(&config.tools),
            estimator: TokenEstimator::default(),
            tool_output_bytes_used: std::sync::atomic::AtomicUsize::new(0),
            tools,
            model,
            config,
            working_directory,
        }
    }

    fn budget(&self) -> usize {
        token_budget(self.model.context_window(), self.config.context.expected_output_reserve)
    }

    fn tool_schemas(&self) -> Vec<ModelToolSchema> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| ModelToolSchema { name: s.name, description: s.description, parameters: s.parameters })
            .collect()
    }

    fn build_request(&self) -> CompletionRequest {
        CompletionRequest { messages: self.session.messages.clone(), tools: self.tool_schemas(), stream: true }
    }

    /// Execute one full user turn: compose, send, dispatch any tool calls,
    /// feed results, repeat until a terminal reply, a hard stop, or cancel.
    pub async fn run_turn(
        &mut self,
        user_input: &str,
        tx: mpsc::Sender<AgentEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) -> TurnOutcome {
        if self.session.system_index().is_none() {
            let sys = system_prompt(&self.working_directory, &self.tools.names(), None);
            self.session.push(Message::system(sys));
        }
        self.session.push(Message::user(user_input));
        self.tool_output_bytes_used.store(0, std::sync::atomic::Ordering::SeqCst);

        let turn_deadline = Instant::now() + Duration::from_secs(self.config.orchestrator.turn_wall_clock_secs);
        let mut iterations = 0u32;
        let mut reactive_attempts = 0u32;
        let mut rate_limit_attempts = 0u32;
        let mut state = State::Compose;

        loop {
            if cancel.try_recv().is_ok() {
                return self.finish_cancelled(&tx, String::new()).await;
            }
            if Instant::now() > turn_deadline {
                warn!("turn wall-clock budget exceeded");
                return self.finish_cancelled(&tx, String::new()).await;
            }

            state = match state {
                State::Compose => {
                    if iterations >= self.config.orchestrator.max_iterations {
                        return TurnOutcome::MaxIterations;
                    }
                    iterations += 1;
                    self.apply_context_trim(&tx).await;
                    State::Await
                }

                State::Await => {
                    let completion = tokio::select! {
                        biased;
                        _ = &mut cancel => return self.finish_cancelled(&tx, String::new()).await,
                        r = self.model.complete(self.build_request()) => r,
                    };
                    match completion {
                        Ok(stream) => match self.drive_stream(stream, &tx, &mut cancel).await {
                            Ok(AwaitOutcome::Terminal(text)) => {
                                self.session.push(Message::assistant(text.clone()));
                                let _ = tx.send(AgentEvent::TextComplete(text)).await;
                                let _ = tx.send(AgentEvent::TurnComplete).await;
                                return TurnOutcome::Ok;
                            }
                            Ok(AwaitOutcome::ToolCalls(calls)) => State::Dispatch(calls),
                            Ok(AwaitOutcome::Cancelled(partial)) => return self.finish_cancelled(&tx, partial).await,
                            Err(err) => {
                                match self
                                    .handle_provider_error(err, &tx, &mut reactive_attempts, &mut rate_limit_attempts)
                                    .await
                                {
                                    Ok(()) => State::Compose,
                                    Err(outcome) => return outcome,
                                }
                            }
                        },
                        Err(err) => {
                            match self
                                .handle_provider_error(err, &tx, &mut reactive_attempts, &mut rate_limit_attempts)
                                .await
                            {
                                Ok(()) => State::Compose,
                                Err(outcome) => return outcome,
                            }
                        }
                    }
                }

                State::Dispatch(calls) => {
                    for call in &calls {
                        self.session.push(Message::tool_call(call.id.clone(), call.name.clone(), call.args.to_string()));
                        let _ = tx.send(AgentEvent::ToolCallStarted(call.clone())).await;
                    }
                    tokio::select! {
                        biased;
                        _ = &mut cancel => return self.finish_cancelled_during_dispatch(&tx, &calls).await,
                        outputs = self.dispatch(&calls) => State::Feed(outputs),
                    }
                }

                State::Feed(outputs) => {
                    for out in outputs {
                        let _ = tx
                            .send(AgentEvent::ToolCallFinished {
                                call_id: out.call_id.clone(),
                                tool_name: String::new(),
                                output: out.content.clone(),
                                is_error: out.is_error,
                            })
                            .await;
                        self.session.push(Message::tool_result(out.call_id, out.content));
                    }
                    self.undo.commit_turn();
                    State::Compose
                }
            };
        }
    }

    async fn finish_cancelled(&mut self, tx: &mpsc::Sender<AgentEvent>, partial_text: String) -> TurnOutcome {
        let _ = tx.send(AgentEvent::Aborted { partial_text }).await;
        TurnOutcome::Cancelled
    }

    /// A cancel fired while a tool batch was in flight. Give it up to 5
    /// seconds to settle before abandoning whatever is still outstanding with
    /// a synthetic `err=Cancelled` result, so the transcript never ends up
    /// missing a tool_result for a tool_call it already recorded.
    async fn finish_cancelled_during_dispatch(&mut self, tx: &mpsc::Sender<AgentEvent>, calls: &[ToolCall]) -> TurnOutcome {
        const DRAIN_DEADLINE: Duration = Duration::from_secs(5);
        match tokio::time::timeout(DRAIN_DEADLINE, self.dispatch(calls)).await {
            Ok(outputs) => {
                for out in outputs {
                    self.session.push(Message::tool_result(out.call_id, out.content));
                }
            }
            Err(_) => {
                warn!("tool batch still outstanding after cancel drain deadline, abandoning");
                for call in calls {
                    self.session.push(Message::tool_result(call.id.clone(), "Cancelled: tool call abandoned after the drain deadline".to_string()));
                }
            }
        }
        self.undo.commit_turn();
        self.finish_cancelled(tx, String::new()).await
    }

    async fn apply_context_trim(&mut self, tx: &mpsc::Sender<AgentEvent>) {
        let budget = self.budget();
        let before = self.session.token_count;
        if proactive_trim(&mut self.session.messages, budget, &self.config.context, &self.estimator) {
            self.session.recalculate_tokens();
            let _ = tx
                .send(AgentEvent::ContextCompacted {
                    tokens_before: before,
                    tokens_after: self.session.token_count,
                    layer: TrimLayer::Proactive,
                })
                .await;
        }
        let before2 = self.session.token_count;
        let todos = self.session.todos_snapshot();
        if validation_trim(&mut self.session.messages, budget, &self.config.context, &self.estimator, &todos) {
            self.session.recalculate_tokens();
            let _ = tx
                .send(AgentEvent::ContextCompacted {
                    tokens_before: before2,
                    tokens_after: self.session.token_count,
                    layer: TrimLayer::Validation,
                })
                .await;
        }
    }

    /// Classify a provider failure and either resolve it in place (retry
    /// delay observed, reactive trim applied) or return the terminal
    /// [`TurnOutcome`] the caller should return.
    async fn handle_provider_error(
        &mut self,
        err: anyhow::Error,
        tx: &mpsc::Sender<AgentEvent>,
        reactive_attempts: &mut u32,
        rate_limit_attempts: &mut u32,
    ) -> Result<(), TurnOutcome> {
        match classify_provider_error(&err) {
            ProviderErrorClass::RateLimited => {
                *rate_limit_attempts += 1;
                if *rate_limit_attempts > self.config.orchestrator.retry_max_attempts {
                    return Err(TurnOutcome::Fatal(ClioError::ProviderError {
                        kind: "rate_limited".into(),
                        message: err.to_string(),
                    }));
                }
                tokio::time::sleep(backoff_delay(*rate_limit_attempts)).await;
                Ok(())
            }
            ProviderErrorClass::ContextOverflow => {
                *reactive_attempts += 1;
                if *reactive_attempts > self.config.context.reactive_trim_max_attempts {
                    return Err(TurnOutcome::BudgetExhausted);
                }
                let before = self.session.token_count;
                let todos = self.session.todos_snapshot();
                reactive_trim(&mut self.session.messages, *reactive_attempts, &self.config.context, &todos);
                self.session.recalculate_tokens();
                let _ = tx
                    .send(AgentEvent::ContextCompacted {
                        tokens_before: before,
                        tokens_after: self.session.token_count,
                        layer: TrimLayer::Reactive(*reactive_attempts),
                    })
                    .await;
                Ok(())
            }
            ProviderErrorClass::Fatal => Err(TurnOutcome::Fatal(ClioError::ProviderError {
                kind: "fatal".into(),
                message: err.to_string(),
            })),
            ProviderErrorClass::Transient => {
                debug!("transient provider error, retrying once: {err}");
                Ok(())
            }
        }
    }

    async fn drive_stream(
        &mut self,
        mut stream: clio_model::ResponseStream,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<AwaitOutcome> {
        let mut text = String::new();
        let mut calls: std::collections::BTreeMap<u32, (String, String, String)> = std::collections::BTreeMap::new();
        let mut usage_input = 0u32;
        let mut usage_output = 0u32;

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut *cancel => return Ok(AwaitOutcome::Cancelled(text)),
                ev = stream.next() => ev,
            };
            let event = match next {
                Some(event) => event,
                None => break,
            };
            match event? {
                ResponseEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    let _ = tx.send(AgentEvent::TextDelta(delta)).await;
                }
                ResponseEvent::ToolCall { index, id, name, arguments } => {
                    let entry = calls.entry(index).or_insert((String::new(), String::new(), String::new()));
                    entry.0 = id;
                    entry.1 = name;
                    entry.2.push_str(&arguments);
                }
                ResponseEvent::Usage { input_tokens, output_tokens, .. } => {
                    usage_input = input_tokens;
                    usage_output = output_tokens;
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(message) => {
                    let _ = tx.send(AgentEvent::Error(message)).await;
                }
            }
        }

        self.estimator.calibrate(self.session.token_count, usage_input);
        let _ = tx
            .send(AgentEvent::TokenUsage { input: usage_input, output: usage_output, context_total: self.session.token_count })
            .await;

        if calls.is_empty() {
            Ok(AwaitOutcome::Terminal(text))
        } else {
            let tool_calls = calls
                .into_values()
                .map(|(id, name, arguments)| ToolCall {
                    id,
                    name,
                    args: serde_json::from_str::<Value>(&arguments).unwrap_or_else(|_| Value::Object(Default::default())),
                })
                .collect();
            Ok(AwaitOutcome::ToolCalls(tool_calls))
        }
    }

    /// Run a batch of tool calls. Concurrent by default; two exceptions
    /// force an individual call onto the serial tail: a mutating call
    /// targeting a path another concurrent call in the batch also targets,
    /// and any git-writing shell command. Results preserve the original
    /// assistant-reply order regardless of completion order.
    async fn dispatch(&self, calls: &[ToolCall]) -> Vec<ToolOutput> {
        let mut path_seen: HashSet<String> = HashSet::new();
        let mut serial: Vec<usize> = Vec::new();
        let mut concurrent: Vec<usize> = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            let is_git_write = call.name == "shell"
                && call
                    .args
                    .get("command")
                    .and_then(|v| v.as_str())
                    .map(is_git_writing_command)
                    .unwrap_or(false);
            let mut collides = false;
            if call.name == "write_file" {
                if let Some(path) = call.args.get("path").and_then(|v| v.as_str()) {
                    if !path_seen.insert(path.to_string()) {
                        collides = true;
                    }
                }
            }
            if is_git_write || collides {
                serial.push(i);
            } else {
                concurrent.push(i);
            }
        }

        let mut slots: Vec<Option<ToolOutput>> = (0..calls.len()).map(|_| None).collect();
        let futs = concurrent.iter().map(|&i| async move { (i, self.dispatch_one(&calls[i]).await) });
        for (i, out) in futures::future::join_all(futs).await {
            slots[i] = Some(out);
        }
        for &i in &serial {
            slots[i] = Some(self.dispatch_one(&calls[i]).await);
        }
        slots.into_iter().map(|o| o.expect("every dispatched call produces a slot")).collect()
    }

    /// Enforce the cumulative per-turn tool-output byte cap: once the turn's
    /// running total reaches `max_tool_output_bytes`, further output is cut
    /// off with a notice rather than appended in full. A cap of 0 disables
    /// the check.
    fn cap_turn_output(&self, content: String) -> String {
        let cap = self.config.orchestrator.max_tool_output_bytes;
        if cap == 0 {
            return content;
        }
        let used = self.tool_output_bytes_used.load(std::sync::atomic::Ordering::SeqCst);
        let remaining = cap.saturating_sub(used);
        if content.len() <= remaining {
            self.tool_output_bytes_used.fetch_add(content.len(), std::sync::atomic::Ordering::SeqCst);
            return content;
        }
        let cut = floor_char_boundary(&content, remaining);
        self.tool_output_bytes_used.fetch_add(cut, std::sync::atomic::Ordering::SeqCst);
        format!(
            "{}\n[... output omitted: the {}-byte per-turn tool output cap was reached ...]",
            &content[..cut],
            cap
        )
    }

    /// One call through the pipeline: Registry → (approval policy) →
    /// Authorizer → Executor → Redactor → Result store.
    async fn dispatch_one(&self, call: &ToolCall) -> ToolOutput {
        if self.tools.get(&call.name).is_none() {
            return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
        }

        if call.name == "shell" {
            if let Some(command) = call.args.get("command").and_then(|v| v.as_str()) {
                if self.policy.decide(command) == clio_tools::ApprovalPolicy::Deny {
                    return ToolOutput::err(&call.id, format!("command denied by policy: {command}"));
                }
            }
        }

        if let Some(path) = call.args.get("path").and_then(|v| v.as_str()) {
            let operation_key = format!("{}:{}", call.name, path);
            match self.authorizer.check(path, &operation_key, false) {
                AuthDecision::RequiresAuthorization { reason, .. } => {
                    return ToolOutput::err(&call.id, format!("AuthorizationRequired: {reason}"));
                }
                AuthDecision::Allow => {}
            }
            if call.name == "write_file" {
                let existing = tokio::fs::read(path).await.ok();
                self.undo.record(path, existing);
            }
        }

        let wall_clock = Duration::from_secs(self.config.orchestrator.tool_wall_clock_secs);
        let output = match tokio::time::timeout(wall_clock, self.tools.execute(call)).await {
            Ok(out) => out,
            Err(_) => ToolOutput::err(
                &call.id,
                format!("tool '{}' exceeded its {}s wall-clock budget", call.name, wall_clock.as_secs()),
            ),
        };
        let redacted = self.redactor.redact(&output.content);
        let redacted = self.cap_turn_output(redacted);

        match self.result_store.maybe_externalize(&self.session.id, &call.id, "text/plain", redacted.as_bytes()) {
            ExternalizeOutcome::Inline => ToolOutput { call_id: output.call_id, content: redacted, is_error: output.is_error },
            ExternalizeOutcome::Externalized(reference) => ToolOutput {
                call_id: output.call_id,
                content: serde_json::to_string(&reference).unwrap_or_default(),
                is_error: output.is_error,
            },
        }
    }
}

/// Largest byte index `<= max` that lands on a UTF-8 character boundary of
/// `s`, for safely slicing at an arbitrary byte cap.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

fn is_git_writing_command(cmd: &str) -> bool {
    let lower = cmd.to_ascii_lowercase();
    if !lower.contains("git") {
        return false;
    }
    ["commit", "push", "merge", "rebase", "reset", "tag", "cherry-pick", "checkout -b"]
        .iter()
        .any(|verb| lower.contains(verb))
}

/// Exponential backoff with a small pseudo-random jitter derived from the
/// wall clock (no RNG dependency needed for this).
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 200u64.saturating_mul(1u64 << attempt.min(10));
    let jitter_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_millis() % 250).unwrap_or(0);
    Duration::from_millis(base_ms + jitter_ms as u64)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clio_config::Config;
    use clio_model::{MockProvider, Role, ScriptedMockProvider};
    use clio_tools::{ApprovalPolicy, ListDirTool, ShellTool, Tool, WriteTool};

    /// A tool that sleeps for a fixed duration before returning, used to
    /// exercise the per-tool wall-clock timeout and the cancel-during-dispatch
    /// drain path without depending on real subprocess timing.
    struct SleepTool(Duration, String);

    #[async_trait::async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep_tool"
        }
        fn description(&self) -> &str {
            "sleeps, then returns"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            tokio::time::sleep(self.0).await;
            ToolOutput::ok(&call.id, self.1.clone())
        }
    }

    /// A tool that returns a long, deterministic output, used to exercise the
    /// per-turn tool-output byte cap.
    struct BigOutputTool;

    #[async_trait::async_trait]
    impl Tool for BigOutputTool {
        fn name(&self) -> &str {
            "big_output"
        }
        fn description(&self) -> &str {
            "returns 1000 bytes of output"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        fn default_policy(&self) -> ApprovalPolicy {
            ApprovalPolicy::Auto
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "x".repeat(1000))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(ListDirTool);
        reg.register(ShellTool::default());
        reg.register(WriteTool);
        Arc::new(reg)
    }

    fn result_store() -> Arc<ResultStore> {
        Arc::new(ResultStore::new(4096))
    }

    fn todos() -> Arc<Mutex<Vec<Todo>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    // -- provider error classification --

    #[test]
    fn classifies_rate_limit_errors() {
        let err = anyhow::anyhow!("received 429 Too Many Requests");
        assert_eq!(classify_provider_error(&err), ProviderErrorClass::RateLimited);
    }

    #[test]
    fn classifies_context_overflow_errors() {
        let err = anyhow::anyhow!("prompt is too long: maximum context length exceeded");
        assert_eq!(classify_provider_error(&err), ProviderErrorClass::ContextOverflow);
    }

    #[test]
    fn classifies_auth_errors_as_fatal() {
        let err = anyhow::anyhow!("401 Unauthorized: invalid api key");
        assert_eq!(classify_provider_error(&err), ProviderErrorClass::Fatal);
    }

    #[test]
    fn classifies_unknown_errors_as_transient() {
        let err = anyhow::anyhow!("connection reset by peer");
        assert_eq!(classify_provider_error(&err), ProviderErrorClass::Transient);
    }

    // -- git-writing detection --

    #[test]
    fn detects_git_commit_as_writing() {
        assert!(is_git_writing_command("git commit -m 'wip'"));
    }

    #[test]
    fn does_not_flag_git_status_as_writing() {
        assert!(!is_git_writing_command("git status"));
    }

    #[test]
    fn non_git_commands_are_not_flagged() {
        assert!(!is_git_writing_command("ls -la"));
    }

    // -- end-to-end scenarios (spec §8) --

    #[tokio::test]
    async fn simple_turn_no_tools_reaches_terminal_ok() {
        let model = Arc::new(MockProvider);
        let mut orch = Orchestrator::new(model, registry(), Arc::new(Config::default()), "/ws/proj", result_store(), todos());
        let (tx, mut rx) = mpsc::channel(32);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let outcome = orch.run_turn("ping", tx, cancel_rx).await;
        assert!(matches!(outcome, TurnOutcome::Ok));
        assert_eq!(orch.session.messages.len(), 3); // system, user, assistant
        let mut saw_turn_complete = false;
        while let Ok(ev) = rx.try_recv() {
            if matches!(ev, AgentEvent::TurnComplete) {
                saw_turn_complete = true;
            }
        }
        assert!(saw_turn_complete);
    }

    #[tokio::test]
    async fn single_tool_turn_produces_two_llm_calls_and_one_tool_result() {
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "c1",
            "list_dir",
            r#"{"path": "/ws/proj/src"}"#,
            "3 files: a.txt, b.txt, c.txt",
        ));
        let mut orch = Orchestrator::new(model, registry(), Arc::new(Config::default()), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(32);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let outcome = orch.run_turn("list files in ./src", tx, cancel_rx).await;
        assert!(matches!(outcome, TurnOutcome::Ok));

        let roles: Vec<_> = orch.session.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    }

    #[tokio::test]
    async fn sandbox_denial_produces_authorization_required_tool_result_without_writing() {
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "c1",
            "write_file",
            r#"{"path": "/etc/passwd", "content": "x"}"#,
            "I can't write there.",
        ));
        let mut orch = Orchestrator::new(model, registry(), Arc::new(Config::default()), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(32);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let outcome = orch.run_turn("write /etc/passwd", tx, cancel_rx).await;
        assert!(matches!(outcome, TurnOutcome::Ok));

        let content = orch
            .session
            .messages
            .iter()
            .find_map(|m| match &m.content {
                clio_model::MessageContent::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .expect("a tool result message must be present");
        assert!(content.contains("AuthorizationRequired"));
    }

    #[tokio::test]
    async fn cancelled_before_start_returns_cancelled_outcome() {
        let model = Arc::new(MockProvider);
        let mut orch = Orchestrator::new(model, registry(), Arc::new(Config::default()), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        cancel_tx.send(()).unwrap();
        let outcome = orch.run_turn("ping", tx, cancel_rx).await;
        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn max_iterations_reached_returns_max_iterations_outcome() {
        let scripts: Vec<Vec<ResponseEvent>> = (0..5)
            .map(|i| {
                vec![
                    ResponseEvent::ToolCall {
                        index: 0,
                        id: format!("c{i}"),
                        name: "list_dir".into(),
                        arguments: r#"{"path": "."}"#.into(),
                    },
                    ResponseEvent::Done,
                ]
            })
            .collect();
        let model = Arc::new(ScriptedMockProvider::new(scripts));
        let mut config = Config::default();
        config.orchestrator.max_iterations = 2;
        let mut orch = Orchestrator::new(model, registry(), Arc::new(config), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(64);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        let outcome = orch.run_turn("loop forever", tx, cancel_rx).await;
        assert!(matches!(outcome, TurnOutcome::MaxIterations));
    }

    // -- tool wall-clock timeout (§4.3 tool pipeline) --

    #[tokio::test]
    async fn tool_exceeding_wall_clock_budget_produces_timeout_error() {
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "c1",
            "sleep_tool",
            "{}",
            "it timed out",
        ));
        let mut config = Config::default();
        config.orchestrator.tool_wall_clock_secs = 0;
        let mut reg = ToolRegistry::new();
        reg.register(SleepTool(Duration::from_secs(3600), "woke up".into()));
        let mut orch = Orchestrator::new(model, Arc::new(reg), Arc::new(config), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(32);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        orch.run_turn("run the slow tool", tx, cancel_rx).await;

        let content = orch
            .session
            .messages
            .iter()
            .find_map(|m| match &m.content {
                clio_model::MessageContent::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .expect("a tool result message must be present");
        assert!(content.contains("wall-clock budget"));
    }

    // -- per-turn tool output byte cap (§4.3 tool pipeline) --

    #[tokio::test]
    async fn per_turn_output_cap_truncates_tool_output() {
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "c1",
            "big_output",
            "{}",
            "done",
        ));
        let mut config = Config::default();
        config.orchestrator.max_tool_output_bytes = 10;
        let mut reg = ToolRegistry::new();
        reg.register(BigOutputTool);
        let mut orch = Orchestrator::new(model, Arc::new(reg), Arc::new(config), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(32);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        orch.run_turn("run the big tool", tx, cancel_rx).await;

        let content = orch
            .session
            .messages
            .iter()
            .find_map(|m| match &m.content {
                clio_model::MessageContent::ToolResult { content, .. } => Some(content.clone()),
                _ => None,
            })
            .expect("a tool result message must be present");
        assert!(content.contains("output omitted"));
        assert!(content.len() < 1000);
    }

    // -- cancellation during dispatch (§4.1 turn contract) --

    #[tokio::test]
    async fn cancel_during_dispatch_drains_in_flight_call_and_returns_cancelled() {
        let model = Arc::new(ScriptedMockProvider::tool_then_text(
            "c1",
            "sleep_tool",
            "{}",
            "unreachable",
        ));
        let mut reg = ToolRegistry::new();
        reg.register(SleepTool(Duration::from_millis(50), "woke up".into()));
        let mut orch = Orchestrator::new(model, Arc::new(reg), Arc::new(Config::default()), "/ws/proj", result_store(), todos());
        let (tx, _rx) = mpsc::channel(32);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let handle = tokio::spawn(async move { orch.run_turn("run the slow tool", tx, cancel_rx).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let _ = cancel_tx.send(());
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }
}
