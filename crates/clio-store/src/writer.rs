// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Crash-safe session writer. At most one writer per session file: every
//! mutation is flushed to disk before `append`/`write_all` returns, using
//! the standard write-temp / fsync / rename-in-place idiom so the file is
//! never observed half-written, whatever point a crash happens at.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clio_config::StoreConfig;

use crate::records::StoreRecord;

pub struct SessionWriter {
    path: PathBuf,
    config: StoreConfig,
    lines: Vec<String>,
}

impl SessionWriter {
    /// Create a brand-new session file with just its header record.
    pub fn create(path: impl Into<PathBuf>, session_id: &str, config: StoreConfig) -> anyhow::Result<Self> {
        let path = path.into();
        let mut writer = Self { path, config, lines: Vec::new() };
        writer.lines.push(serde_json::to_string(&StoreRecord::header(session_id, chrono::Utc::now()))?);
        writer.flush()?;
        Ok(writer)
    }

    /// Resume writing an existing session file whose records were already
    /// loaded (and possibly repaired) by [`crate::loader::load`].
    pub fn resume(path: impl Into<PathBuf>, records: Vec<StoreRecord>, config: StoreConfig) -> anyhow::Result<Self> {
        let lines = records.iter().map(serde_json::to_string).collect::<Result<Vec<_>, _>>()?;
        let writer = Self { path: path.into(), config, lines };
        Ok(writer)
    }

    /// Append one record and durably persist the whole file.
    pub fn append(&mut self, record: StoreRecord) -> anyhow::Result<()> {
        self.lines.push(serde_json::to_string(&record)?);
        self.flush()
    }

    fn flush(&self) -> anyhow::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

        {
            let mut tmp = File::create(&tmp_path)?;
            for line in &self.lines {
                tmp.write_all(line.as_bytes())?;
                tmp.write_all(b"\n")?;
            }
            if self.config.fsync {
                tmp.sync_all()?;
            }
        }

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
