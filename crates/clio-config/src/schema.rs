// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_max_iterations() -> u32 {
    500
}
fn default_turn_wall_clock_secs() -> u64 {
    1800
}
fn default_tool_wall_clock_secs() -> u64 {
    120
}
fn default_max_tool_output_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_hashtag_token_budget() -> usize {
    32_000
}

/// Iteration caps, wall clocks, and retry policy for the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on Compose/Await/Dispatch/Feed cycles in a single turn before
    /// the orchestrator gives up with `MaxIterations`.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Wall-clock budget for a whole turn, in seconds.
    #[serde(default = "default_turn_wall_clock_secs")]
    pub turn_wall_clock_secs: u64,
    /// Wall-clock budget for a single tool call, in seconds, unless the tool
    /// requests a longer timeout explicitly.
    #[serde(default = "default_tool_wall_clock_secs")]
    pub tool_wall_clock_secs: u64,
    /// Cumulative tool output accepted into the transcript per turn.
    #[serde(default = "default_max_tool_output_bytes")]
    pub max_tool_output_bytes: usize,
    /// Maximum retries for a transient provider error (429/503/5xx) before
    /// the call is treated as fatal.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Token budget shared across all `#file:`/`#folder:`/`#codebase`/
    /// `#selection`/`#terminalLastCommand` attachments resolved into a
    /// single user turn.
    #[serde(default = "default_hashtag_token_budget")]
    pub hashtag_injection_token_budget: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            turn_wall_clock_secs: default_turn_wall_clock_secs(),
            tool_wall_clock_secs: default_tool_wall_clock_secs(),
            max_tool_output_bytes: default_max_tool_output_bytes(),
            retry_max_attempts: default_retry_max_attempts(),
            hashtag_injection_token_budget: default_hashtag_token_budget(),
        }
    }
}

fn default_proactive_trim_threshold() -> f32 {
    0.58
}
fn default_keep_recent_messages() -> usize {
    8
}
fn default_validation_summary_max_bytes() -> usize {
    4096
}
fn default_reactive_trim_max_attempts() -> u32 {
    3
}
fn default_expected_output_reserve() -> u32 {
    4_096
}

/// Tunables for the three-layer context manager: Proactive, Validation, and
/// Reactive trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Fraction of the token budget `B` at which proactive trimming engages,
    /// before the provider ever sees a context-overflow error.
    #[serde(default = "default_proactive_trim_threshold")]
    pub proactive_trim_threshold: f32,
    /// Number of most-recent messages (`K`) always kept verbatim by the
    /// proactive keep-set scorer, regardless of recency/keyword/role score.
    #[serde(default = "default_keep_recent_messages")]
    pub keep_recent_messages: usize,
    /// Maximum size of the synthetic `System`-role continuation summary the
    /// validation layer inserts in place of trimmed messages.
    #[serde(default = "default_validation_summary_max_bytes")]
    pub validation_summary_max_bytes: usize,
    /// Maximum reactive-trim attempts (progressive 50%/25%/minimal) before a
    /// turn fails with `Terminal(BudgetExhausted)`.
    #[serde(default = "default_reactive_trim_max_attempts")]
    pub reactive_trim_max_attempts: u32,
    /// Output tokens reserved when a provider's catalog entry doesn't supply
    /// one: `B = model_context_window - expected_output_reserve`.
    #[serde(default = "default_expected_output_reserve")]
    pub expected_output_reserve: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            proactive_trim_threshold: default_proactive_trim_threshold(),
            keep_recent_messages: default_keep_recent_messages(),
            validation_summary_max_bytes: default_validation_summary_max_bytes(),
            reactive_trim_max_attempts: default_reactive_trim_max_attempts(),
            expected_output_reserve: default_expected_output_reserve(),
        }
    }
}

/// Secret-redaction aggressiveness applied to tool results before they enter
/// the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RedactionLevel {
    /// No scanning.
    Off,
    /// PII patterns only (email, SSN, phone, card numbers, UK NI). Default.
    #[default]
    Pii,
    /// PII plus cryptographic material (PEM blocks, DB connection strings,
    /// generic `password=`), but permissive about API keys and tokens.
    ApiPermissive,
    /// PII, cryptographic material, and API keys.
    Standard,
    /// Everything in `Standard` plus tokens (JWT/Bearer/Basic).
    Strict,
}

fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_undo_ring_size() -> usize {
    20
}
fn default_result_inline_threshold_bytes() -> usize {
    8 * 1024
}
fn default_auto_approve_patterns() -> Vec<String> {
    vec![
        "cat *".into(),
        "ls *".into(),
        "find *".into(),
        "rg *".into(),
        "grep *".into(),
    ]
}
fn default_deny_patterns() -> Vec<String> {
    vec!["rm -rf /*".into(), "dd if=*".into()]
}

/// Tool execution pipeline: per-tool timeout, redaction level, undo ring
/// size, the inline/ref threshold for the result store, and the glob
/// patterns the dispatcher's approval policy is seeded with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default per-tool timeout in seconds when a tool doesn't request its own.
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Secret redaction level applied to tool output.
    #[serde(default)]
    pub redaction_level: RedactionLevel,
    /// Number of turns kept in the undo journal ring buffer.
    #[serde(default = "default_undo_ring_size")]
    pub undo_ring_size: usize,
    /// Payloads at or under this size are carried inline in the transcript;
    /// larger payloads go to the result store and are referenced by id.
    #[serde(default = "default_result_inline_threshold_bytes")]
    pub result_store_inline_threshold_bytes: usize,
    /// Glob patterns (matched against a shell tool's command) auto-approved
    /// without prompting, unless overridden by a deny pattern.
    #[serde(default = "default_auto_approve_patterns")]
    pub auto_approve_patterns: Vec<String>,
    /// Glob patterns that always require explicit authorization, even if
    /// also matched by an auto-approve pattern.
    #[serde(default = "default_deny_patterns")]
    pub deny_patterns: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
            redaction_level: RedactionLevel::default(),
            undo_ring_size: default_undo_ring_size(),
            result_store_inline_threshold_bytes: default_result_inline_threshold_bytes(),
            auto_approve_patterns: default_auto_approve_patterns(),
            deny_patterns: default_deny_patterns(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_disconnect_timeout_secs() -> u64 {
    120
}
fn default_max_parallel_api_slots() -> u32 {
    2
}

/// The coordination broker: heartbeat cadence, disconnect timeout, and the
/// number of concurrent API slots the scheduler hands out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Expected interval between client heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Absence beyond this many seconds releases all of a client's locks,
    /// slots, and inbox.
    #[serde(default = "default_disconnect_timeout_secs")]
    pub disconnect_timeout_secs: u64,
    /// Maximum number of API slots granted concurrently across all clients.
    #[serde(default = "default_max_parallel_api_slots")]
    pub max_parallel_api_slots: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            disconnect_timeout_secs: default_disconnect_timeout_secs(),
            max_parallel_api_slots: default_max_parallel_api_slots(),
        }
    }
}

fn default_schema_version() -> u32 {
    1
}
fn default_fsync() -> bool {
    true
}

/// The session store: schema version stamped into each session file header,
/// and whether writes fsync before the atomic rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// fsync the temp file before renaming it into place. Disabling this
    /// trades crash-safety for throughput; only useful in tests.
    #[serde(default = "default_fsync")]
    pub fsync: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { schema_version: default_schema_version(), fsync: default_fsync() }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
