// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::Parser;

/// Headless CLI for the coding agent core: run one turn to completion and
/// print the transcript. No readline, no themes, no slash commands — this
/// binary is a composition root, not a frontend.
#[derive(Parser, Debug)]
#[command(name = "clio", version, about)]
pub struct Cli {
    /// The task to run. If omitted, the task is read from stdin.
    pub task: Option<String>,

    /// Path to a config file (overrides the default search path).
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Working directory the agent operates in. Defaults to the current directory.
    #[arg(long, short = 'w')]
    pub working_dir: Option<PathBuf>,

    /// Emit tracing output to stderr at this level (off by default).
    #[arg(long, env = "CLIO_LOG")]
    pub verbose: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_is_optional() {
        let cli = Cli::parse_from(["clio"]);
        assert!(cli.task.is_none());
    }

    #[test]
    fn task_is_the_first_positional_argument() {
        let cli = Cli::parse_from(["clio", "fix the build"]);
        assert_eq!(cli.task.as_deref(), Some("fix the build"));
    }

    #[test]
    fn config_flag_is_parsed() {
        let cli = Cli::parse_from(["clio", "--config", "/tmp/clio.yaml", "task"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/clio.yaml")));
    }
}
