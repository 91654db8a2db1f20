//! Single-step undo for destructive file operations.
//!
//! The caller captures a snapshot of the target file immediately before a
//! destructive tool runs. Exactly one snapshot is undoable at a time: pushing
//! a new one retires the previous pending snapshot to a bounded audit trail,
//! and a successful undo consumes the pending snapshot without exposing the
//! one before it.

use std::collections::VecDeque;
use std::fs::{self, File, Permissions};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HistoryConfig;
use crate::error::{MemoryError, Result};
use crate::memory::types::FileOperation;
use crate::store::write_atomic_with_permissions;

/// Default number of retired snapshots kept for inspection.
pub const DEFAULT_AUDIT_DEPTH: usize = 20;

/// The agent tools that change or remove file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestructiveAction {
    WriteFile,
    DeleteFile,
    ClearFileContent,
    ApplyCodeChange,
}

impl DestructiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteFile => "write_file",
            Self::DeleteFile => "delete_file",
            Self::ClearFileContent => "clear_file_content",
            Self::ApplyCodeChange => "apply_code_change",
        }
    }

    pub fn operation(&self) -> FileOperation {
        match self {
            Self::WriteFile => FileOperation::Write,
            Self::DeleteFile => FileOperation::Delete,
            Self::ClearFileContent => FileOperation::Clear,
            Self::ApplyCodeChange => FileOperation::Patch,
        }
    }
}

impl std::fmt::Display for DestructiveAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DestructiveAction {
    type Err = MemoryError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "write_file" => Ok(Self::WriteFile),
            "delete_file" => Ok(Self::DeleteFile),
            "clear_file_content" => Ok(Self::ClearFileContent),
            "apply_code_change" => Ok(Self::ApplyCodeChange),
            _ => Err(MemoryError::UnknownVariant {
                kind: "destructive action",
                value: s.to_string(),
            }),
        }
    }
}

/// What the file looked like before the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "content", rename_all = "snake_case")]
pub enum PriorState {
    /// Raw bytes of the file, restored unchanged.
    Content(Vec<u8>),
    /// The file did not exist.
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoSnapshot {
    pub action: DestructiveAction,
    pub filepath: PathBuf,
    pub prior: PriorState,
    /// Mode of the file when captured, reapplied on restore.
    #[serde(skip)]
    pub permissions: Option<Permissions>,
    pub timestamp: DateTime<Utc>,
}

/// Whether a destructive action may run without an undo point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyNet {
    /// Refuse when the pre-state cannot be captured.
    #[default]
    Required,
    /// Proceed without a snapshot; the action will not be undoable.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Replaced as the undo point by a newer snapshot.
    Superseded,
    Undone,
    /// Dropped because the action never ran.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub snapshot: UndoSnapshot,
    pub outcome: AuditOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Restoration {
    ContentRestored { bytes: usize },
    FileRemoved,
    /// The file was meant to be removed but was already gone.
    AlreadyAbsent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndoOutcome {
    pub action: DestructiveAction,
    pub filepath: PathBuf,
    pub restoration: Restoration,
}

#[derive(Debug)]
pub struct ActionHistory {
    pending: Option<UndoSnapshot>,
    audit: VecDeque<AuditEntry>,
    audit_depth: usize,
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_DEPTH)
    }
}

impl From<&HistoryConfig> for ActionHistory {
    fn from(config: &HistoryConfig) -> Self {
        Self::new(config.audit_depth)
    }
}

impl ActionHistory {
    pub fn new(audit_depth: usize) -> Self {
        Self {
            pending: None,
            audit: VecDeque::new(),
            audit_depth,
        }
    }

    /// Record the pre-state of `filepath` as the single undo point.
    ///
    /// Call only once the action is certain to run. Any earlier pending
    /// snapshot is retired to the audit trail.
    pub fn push(&mut self, action: DestructiveAction, filepath: impl Into<PathBuf>, prior: PriorState) {
        self.push_snapshot(UndoSnapshot {
            action,
            filepath: filepath.into(),
            prior,
            permissions: None,
            timestamp: Utc::now(),
        });
    }

    fn push_snapshot(&mut self, snapshot: UndoSnapshot) {
        tracing::debug!(
            action = %snapshot.action,
            path = %snapshot.filepath.display(),
            existed = matches!(snapshot.prior, PriorState::Content(_)),
            "undo snapshot pushed"
        );
        if let Some(previous) = self.pending.replace(snapshot) {
            self.retire(previous, AuditOutcome::Superseded);
        }
    }

    /// Read the current state of `filepath` and push it.
    ///
    /// Returns `Ok(true)` when a snapshot was pushed. If the file exists but
    /// cannot be read, fails with [`MemoryError::SnapshotFailed`] under
    /// [`SafetyNet::Required`]; under [`SafetyNet::Disabled`] it logs and
    /// returns `Ok(false)` so the caller may proceed without an undo point.
    pub fn snapshot_before(
        &mut self,
        action: DestructiveAction,
        filepath: impl AsRef<Path>,
        safety: SafetyNet,
    ) -> Result<bool> {
        let filepath = filepath.as_ref();
        match capture_prior_state(filepath) {
            Ok((prior, permissions)) => {
                self.push_snapshot(UndoSnapshot {
                    action,
                    filepath: filepath.to_path_buf(),
                    prior,
                    permissions,
                    timestamp: Utc::now(),
                });
                Ok(true)
            }
            Err(source) => match safety {
                SafetyNet::Required => Err(MemoryError::SnapshotFailed {
                    path: filepath.to_path_buf(),
                    source,
                }),
                SafetyNet::Disabled => {
                    tracing::warn!(
                        action = %action,
                        path = %filepath.display(),
                        error = %source,
                        "proceeding without undo point"
                    );
                    Ok(false)
                }
            },
        }
    }

    /// Restore the pending snapshot's prior state and consume it.
    ///
    /// If restoring fails the snapshot stays pending so the undo can be retried.
    pub fn undo_last_action(&mut self) -> Result<UndoOutcome> {
        let snapshot = self.pending.take().ok_or(MemoryError::NothingToUndo)?;

        match restore(&snapshot) {
            Ok(restoration) => {
                tracing::info!(
                    action = %snapshot.action,
                    path = %snapshot.filepath.display(),
                    ?restoration,
                    "action undone"
                );
                let outcome = UndoOutcome {
                    action: snapshot.action,
                    filepath: snapshot.filepath.clone(),
                    restoration,
                };
                self.retire(snapshot, AuditOutcome::Undone);
                Ok(outcome)
            }
            Err(source) => {
                let path = snapshot.filepath.clone();
                self.pending = Some(snapshot);
                Err(MemoryError::RestoreFailed { path, source })
            }
        }
    }

    /// Drop the pending snapshot for an action that did not run.
    pub fn discard_pending(&mut self) -> Option<UndoSnapshot> {
        let snapshot = self.pending.take()?;
        self.retire(snapshot.clone(), AuditOutcome::Discarded);
        Some(snapshot)
    }

    /// The single undoable snapshot, if any.
    pub fn peek(&self) -> Option<&UndoSnapshot> {
        self.pending.as_ref()
    }

    pub fn can_undo(&self) -> bool {
        self.pending.is_some()
    }

    /// Retired snapshots, newest first. Never undoable.
    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit.iter().rev()
    }

    fn retire(&mut self, snapshot: UndoSnapshot, outcome: AuditOutcome) {
        if self.audit_depth == 0 {
            return;
        }
        while self.audit.len() >= self.audit_depth {
            self.audit.pop_front();
        }
        self.audit.push_back(AuditEntry {
            snapshot,
            outcome,
            recorded_at: Utc::now(),
        });
    }
}

fn capture_prior_state(filepath: &Path) -> std::io::Result<(PriorState, Option<Permissions>)> {
    let mut file = match File::open(filepath) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((PriorState::Absent, None)),
        Err(e) => return Err(e),
    };
    let permissions = file.metadata()?.permissions();
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok((PriorState::Content(content), Some(permissions)))
}

fn restore(snapshot: &UndoSnapshot) -> std::io::Result<Restoration> {
    match &snapshot.prior {
        PriorState::Content(content) => {
            write_atomic_with_permissions(
                &snapshot.filepath,
                content,
                snapshot.permissions.as_ref(),
            )?;
            Ok(Restoration::ContentRestored {
                bytes: content.len(),
            })
        }
        PriorState::Absent => match fs::remove_file(&snapshot.filepath) {
            Ok(()) => Ok(Restoration::FileRemoved),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Restoration::AlreadyAbsent),
            Err(e) => Err(e),
        },
    }
}
