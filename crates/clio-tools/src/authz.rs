// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Outcome of a path authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    RequiresAuthorization { path: PathBuf, reason: String },
}

/// A grant issued for a specific `(session, operation_key)` pair, either
/// consumed on first use or valid for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantScope {
    OneTime,
    Session,
}

/// Gatekeeper for every tool invocation that touches a filesystem path.
///
/// One instance per session. Grants and the session-wide auto-approve flag
/// are held in memory only — they do not survive a session-store reload.
pub struct Authorizer {
    working_directory: PathBuf,
    session_auto_approve: bool,
    grants: Mutex<HashMap<String, GrantScope>>,
    consumed: Mutex<HashSet<String>>,
}

impl Authorizer {
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            session_auto_approve: false,
            grants: Mutex::new(HashMap::new()),
            consumed: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_session_auto_approve(mut self, enabled: bool) -> Self {
        self.session_auto_approve = enabled;
        self
    }

    /// Grant `operation_key` for the remainder of this authorizer's lifetime
    /// (`GrantScope::Session`) or for exactly one subsequent check
    /// (`GrantScope::OneTime`).
    pub fn grant(&self, operation_key: impl Into<String>, scope: GrantScope) {
        self.grants.lock().unwrap().insert(operation_key.into(), scope);
    }

    /// Resolve `raw_path` against the working directory: expand a leading
    /// `~`, join relative paths onto `working_directory`, and canonicalize
    /// the existing prefix while carrying any not-yet-created tail
    /// components through literally.
    pub fn resolve(&self, raw_path: &str) -> PathBuf {
        let expanded = expand_tilde(raw_path);
        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.working_directory.join(expanded)
        };
        canonicalize_existing_prefix(&joined)
    }

    /// Decide whether `raw_path` may be touched by `operation_key` under
    /// this authorizer's working directory.
    ///
    /// Decision order: user-initiated → session auto-approve → boundary-aware
    /// prefix match against the working directory → matching grant →
    /// otherwise `RequiresAuthorization`.
    pub fn check(&self, raw_path: &str, operation_key: &str, is_user_initiated: bool) -> AuthDecision {
        if is_user_initiated {
            return AuthDecision::Allow;
        }
        if self.session_auto_approve {
            return AuthDecision::Allow;
        }

        let resolved = self.resolve(raw_path);
        if is_within_boundary(&resolved, &self.working_directory) {
            return AuthDecision::Allow;
        }

        if self.has_grant(operation_key) {
            return AuthDecision::Allow;
        }

        AuthDecision::RequiresAuthorization {
            path: resolved,
            reason: format!(
                "{} is outside the working directory ({}) and no grant is held",
                raw_path,
                self.working_directory.display()
            ),
        }
    }

    fn has_grant(&self, operation_key: &str) -> bool {
        let mut grants = self.grants.lock().unwrap();
        match grants.get(operation_key).copied() {
            Some(GrantScope::Session) => true,
            Some(GrantScope::OneTime) => {
                grants.remove(operation_key);
                self.consumed.lock().unwrap().insert(operation_key.to_string());
                true
            }
            None => false,
        }
    }
}

/// True if `path` equals `boundary` or has `boundary` plus a path separator
/// as a prefix. A bare string prefix is deliberately insufficient: this is
/// what stops `/ws/conv-1` from matching `/ws/conv-1-other`.
fn is_within_boundary(path: &Path, boundary: &Path) -> bool {
    if path == boundary {
        return true;
    }
    path.strip_prefix(boundary).is_ok()
}

fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(raw)
}

/// Canonicalize the longest existing ancestor of `path` via realpath,
/// then re-append the components that don't exist on disk yet (so a
/// not-yet-created file under an existing directory still resolves through
/// any symlinks in that directory).
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if existing.exists() {
            break;
        }
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing = match existing.parent() {
                    Some(p) => p.to_path_buf(),
                    None => break,
                };
            }
            None => break,
        }
    }

    let mut resolved = std::fs::canonicalize(&existing).unwrap_or(existing);
    for component in tail.into_iter().rev() {
        resolved.push(component);
    }
    resolved
}
