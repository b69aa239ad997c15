// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

/// Snapshot of a single path's content taken immediately before a mutating
/// tool wrote to it. `None` content means the path did not exist yet — the
/// tombstone case: undoing a create deletes the file.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub content: Option<Vec<u8>>,
}

/// All snapshots recorded for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnEntry {
    snapshots: Vec<Snapshot>,
}

/// Ring-buffer journal of pre-mutation snapshots, one [`TurnEntry`] per turn.
///
/// A mutating file tool calls [`UndoJournal::record`] before it writes;
/// writes to the same path within one turn only record the first (pre-turn)
/// state. `/undo` pops the most recent [`TurnEntry`] and applies its
/// snapshots in reverse order via [`UndoJournal::pop_turn`].
///
/// Shell-executed mutations are not tracked — a shell command can touch
/// arbitrary paths the pipeline never observes.
pub struct UndoJournal {
    ring_size: usize,
    turns: Mutex<VecDeque<TurnEntry>>,
    current: Mutex<TurnEntry>,
}

impl UndoJournal {
    pub fn new(ring_size: usize) -> Self {
        Self {
            ring_size,
            turns: Mutex::new(VecDeque::new()),
            current: Mutex::new(TurnEntry::default()),
        }
    }

    /// Record the pre-mutation content of `path` for the current turn,
    /// unless a snapshot for this path was already recorded this turn.
    pub fn record(&self, path: impl Into<PathBuf>, content: Option<Vec<u8>>) {
        let path = path.into();
        let mut current = self.current.lock().unwrap();
        if current.snapshots.iter().any(|s| s.path == path) {
            return;
        }
        current.snapshots.push(Snapshot { path, content });
    }

    /// Close out the current turn's snapshots into the ring, evicting the
    /// oldest turn if the ring is full. Called once at the end of a turn
    /// that performed at least one mutation.
    pub fn commit_turn(&self) {
        let mut current = self.current.lock().unwrap();
        if current.snapshots.is_empty() {
            return;
        }
        let entry = std::mem::take(&mut *current);
        let mut turns = self.turns.lock().unwrap();
        if turns.len() >= self.ring_size {
            turns.pop_front();
        }
        turns.push_back(entry);
    }

    /// Pop and return the most recent turn's snapshots, in the order they
    /// must be reapplied (reverse of recording order is the caller's
    /// concern — snapshots are returned as recorded).
    pub fn pop_turn(&self) -> Option<Vec<Snapshot>> {
        self.turns.lock().unwrap().pop_back().map(|e| e.snapshots)
    }

    pub fn depth(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

/// Apply a turn's snapshots to disk, restoring each path to its
/// pre-mutation state (or removing it if the snapshot was a tombstone).
pub async fn apply_snapshots(snapshots: &[Snapshot]) -> std::io::Result<()> {
    for snap in snapshots.iter().rev() {
        match &snap.content {
            Some(bytes) => {
                if let Some(parent) = snap.path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&snap.path, bytes).await?;
            }
            None => {
                let _ = tokio::fs::remove_file(&snap.path).await;
            }
        }
    }
    Ok(())
}
