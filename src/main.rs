// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Read;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use clio_core::{AgentEvent, Orchestrator, TurnOutcome};
use clio_tools::{
    ListDirTool, ReadFileTool, ResultFetchTool, ResultStore, ShellTool, ToolRegistry, TodoWriteTool,
    WriteTool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose.as_deref());

    let task = match cli.task {
        Some(t) => t,
        None => read_stdin_task()?,
    };
    if task.trim().is_empty() {
        anyhow::bail!("no task given: pass one as an argument or pipe it on stdin");
    }

    let config = Arc::new(clio_config::load(cli.config.as_deref())?);
    let working_dir = cli
        .working_dir
        .unwrap_or(std::env::current_dir()?)
        .display()
        .to_string();

    let result_store = Arc::new(ResultStore::new(config.tools.result_store_inline_threshold_bytes));
    let todos = Arc::new(Mutex::new(Vec::new()));

    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool);
    registry.register(WriteTool);
    registry.register(ListDirTool);
    registry.register(ShellTool::default());
    registry.register(ResultFetchTool::new(result_store.clone()));
    registry.register(TodoWriteTool::new(todos.clone()));
    let registry = Arc::new(registry);

    // No concrete provider driver ships in this workspace: the bundled mock
    // provider stands in for a real model so the loop can be exercised
    // end to end without network access.
    let model: Arc<dyn clio_model::ModelProvider> = Arc::new(clio_model::MockProvider::default());

    let mut orchestrator = Orchestrator::new(model, registry, config, working_dir, result_store, todos);

    let (event_tx, mut event_rx) = tokio::sync::mpsc::channel::<AgentEvent>(256);
    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel();

    let printer = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            print_event(ev);
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });

    let outcome = orchestrator.run_turn(&task, event_tx, cancel_rx).await;
    drop(orchestrator);
    let _ = printer.await;

    match outcome {
        TurnOutcome::Ok => Ok(()),
        TurnOutcome::MaxIterations => anyhow::bail!("turn stopped: iteration cap reached"),
        TurnOutcome::BudgetExhausted => anyhow::bail!("turn stopped: context budget exhausted after repeated trimming"),
        TurnOutcome::Cancelled => anyhow::bail!("turn cancelled"),
        TurnOutcome::Fatal(e) => anyhow::bail!("turn failed: {e}"),
    }
}

fn read_stdin_task() -> anyhow::Result<String> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn print_event(ev: AgentEvent) {
    match ev {
        AgentEvent::TextDelta(delta) => {
            print!("{delta}");
        }
        AgentEvent::ToolCallStarted(call) => {
            eprintln!("\n[tool] {} {}", call.name, call.args);
        }
        AgentEvent::ToolCallFinished { tool_name, is_error, .. } => {
            if is_error {
                eprintln!("[tool] {tool_name} failed");
            }
        }
        AgentEvent::ContextCompacted { tokens_before, tokens_after, layer } => {
            eprintln!("[context] trimmed {tokens_before} -> {tokens_after} tokens ({layer:?})");
        }
        AgentEvent::TurnComplete => {
            println!();
        }
        AgentEvent::Aborted { partial_text } => {
            if !partial_text.is_empty() {
                println!("{partial_text}");
            }
            eprintln!("[aborted]");
        }
        AgentEvent::Error(msg) => {
            eprintln!("[error] {msg}");
        }
        AgentEvent::TextComplete(_) | AgentEvent::TokenUsage { .. } => {}
    }
}

/// Install a `tracing-subscriber` layer driven by `CLIO_LOG` (falling back
/// to `info`). Library crates never initialize a subscriber themselves —
/// only this composition root does.
fn init_logging(verbose: Option<&str>) {
    let filter = verbose
        .map(String::from)
        .or_else(|| std::env::var("CLIO_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();
}
