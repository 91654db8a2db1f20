//! The memory façade handed to the agent loop.
//!
//! [`MemoryManager`] owns one [`WorkingMemory`] and one [`PersistentMemory`]
//! for a project root. Session observations always land in working memory
//! first; a per-session event cursor (`synced_through`) records the highest
//! sequence number already folded into persistent memory, so reconciling is
//! idempotent and nothing is counted twice. When the store cannot be written
//! the manager keeps running on working memory alone and retries the backlog
//! held in working memory's outbox on the next write or
//! [`MemoryManager::sync_memory`] call.
//!
//! Nothing here returns an error to the caller after construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::CairnConfig;
use crate::error::{MemoryError, Result};
use crate::memory::history::{
    ActionHistory, DestructiveAction, Restoration, SafetyNet, UndoOutcome,
};
use crate::memory::persistent::{PersistentMemory, SessionBatch, ToolCall};
use crate::memory::search::FileFrequency;
use crate::memory::stats::MemorySummary;
use crate::memory::types::{
    file_type_of, CodeSnippet, FileAccessRecord, FileOperation, PatternKind, Payload,
    ProjectPattern,
};
use crate::memory::working::{SessionEvent, SessionSummary, WorkingMemory};

/// One entry of [`MemoryContext::recent_operations`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextOperation {
    pub filepath: String,
    pub operation: FileOperation,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// The bounded summary handed to the reasoning step each turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryContext {
    pub frequently_accessed_files: Vec<String>,
    pub active_files: Vec<String>,
    pub recent_operations: Vec<ContextOperation>,
    pub tool_effectiveness: BTreeMap<String, f64>,
    pub user_preferences: BTreeMap<String, Payload>,
}

/// Outcome of reconciling working memory into persistent memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Events written to the store by this call.
    pub applied: usize,
    /// Events that left the working-memory rings before they could be written.
    pub dropped: u64,
    pub degraded: bool,
}

/// Outcome of [`MemoryManager::learn_from_session`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearnReport {
    pub operations_examined: usize,
    pub patterns_committed: usize,
    pub trimmed: usize,
}

#[derive(Debug)]
pub struct MemoryManager {
    project_root: PathBuf,
    config: CairnConfig,
    working: WorkingMemory,
    persistent: PersistentMemory,
    history: ActionHistory,
    /// Highest session sequence number reflected in persistent memory.
    synced_through: u64,
    /// Highest session sequence number already considered for learning.
    learned_through: u64,
    degraded: bool,
    dropped_events: u64,
}

impl MemoryManager {
    /// Open the memory for `project_root` with default configuration.
    pub fn open(project_root: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(project_root, CairnConfig::default())
    }

    /// Open the memory for `project_root`.
    ///
    /// A missing store starts empty. A corrupt store is reset and reported via
    /// [`Self::load_warning`]. Fails only when the store exists but cannot be
    /// read at the OS level.
    pub fn with_config(project_root: impl AsRef<Path>, config: CairnConfig) -> Result<Self> {
        let project_root = project_root.as_ref().to_path_buf();
        let store_path = config.store_path(&project_root);
        let persistent = PersistentMemory::open(
            &store_path,
            config.retention.clone(),
            config.storage.backup_corrupt,
        )?;

        if let Some(warning) = persistent.load_warning() {
            tracing::warn!(%warning, "continuing with an empty memory store");
        }

        let working = WorkingMemory::new(config.working.clone());
        let history = ActionHistory::from(&config.history);
        tracing::info!(
            project = %project_root.display(),
            store = %store_path.display(),
            session = %working.session_id(),
            "memory manager ready"
        );

        Ok(Self {
            project_root,
            config,
            working,
            persistent,
            history,
            synced_through: 0,
            learned_through: 0,
            degraded: false,
            dropped_events: 0,
        })
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn store_path(&self) -> &Path {
        self.persistent.path()
    }

    pub fn config(&self) -> &CairnConfig {
        &self.config
    }

    /// The problem found while loading the store, if it had to be reset.
    pub fn load_warning(&self) -> Option<&MemoryError> {
        self.persistent.load_warning()
    }

    /// True while the store is unwritable and only working memory is updated.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn persistent(&self) -> &PersistentMemory {
        &self.persistent
    }

    // ── Reconciliation ───────────────────────────────────────────────────────

    /// Fold every session event not yet in persistent memory into it.
    ///
    /// Calling again with no new events does nothing.
    pub fn sync_memory(&mut self) -> SyncReport {
        let report = self.flush_pending();
        if report.applied > 0 || report.dropped > 0 {
            tracing::debug!(
                applied = report.applied,
                dropped = report.dropped,
                degraded = report.degraded,
                "memory synced"
            );
        }
        report
    }

    fn flush_pending(&mut self) -> SyncReport {
        let last_seq = self.working.last_seq();
        if last_seq <= self.synced_through {
            return self.report(0, 0);
        }

        let events = self.working.events_since(self.synced_through);
        let dropped = (last_seq - self.synced_through).saturating_sub(events.len() as u64);
        let applied = events.len();

        let batch = build_batch(events);
        match self.persistent.apply_batch(batch) {
            Ok(_) => {
                if dropped > 0 {
                    tracing::warn!(dropped, "session events evicted before they were persisted");
                    self.dropped_events += dropped;
                }
                if self.degraded {
                    tracing::info!("memory store writable again, leaving working-memory-only mode");
                }
                self.degraded = false;
                self.synced_through = last_seq;
                self.working.acknowledge(last_seq);
                self.report(applied, dropped)
            }
            Err(err) => {
                self.enter_degraded(&err);
                self.report(0, 0)
            }
        }
    }

    fn report(&self, applied: usize, dropped: u64) -> SyncReport {
        SyncReport {
            applied,
            dropped,
            degraded: self.degraded,
        }
    }

    fn enter_degraded(&mut self, err: &MemoryError) {
        if !self.degraded {
            tracing::warn!(error = %err, "memory store unwritable, continuing with working memory only");
        }
        self.degraded = true;
    }

    /// Log a swallowed write failure.
    fn note_failure(&mut self, what: &str, err: MemoryError) {
        if matches!(err, MemoryError::StoreUnavailable { .. }) {
            self.enter_degraded(&err);
        }
        let failure = MemoryError::RecordingFailure(format!("{what}: {err}"));
        tracing::warn!(error = %failure, "memory write skipped");
    }

    // ── Context ──────────────────────────────────────────────────────────────

    /// Assemble the bounded context for the next reasoning step.
    pub fn get_current_context(&self) -> MemoryContext {
        let frequently_accessed_files = self
            .persistent
            .get_frequently_accessed_files(self.config.context.frequent_files)
            .into_iter()
            .map(|f| f.filepath)
            .collect();

        let recent_operations = self
            .working
            .recent_operations(self.config.context.recent_operations)
            .map(|op| ContextOperation {
                filepath: op.filepath.clone(),
                operation: op.operation,
                success: op.success,
                timestamp: op.timestamp,
            })
            .collect();

        MemoryContext {
            frequently_accessed_files,
            active_files: self.working.active_files(),
            recent_operations,
            tool_effectiveness: self.persistent.effectiveness_scores(),
            user_preferences: self.persistent.user_preferences(),
        }
    }

    // ── Session write path ───────────────────────────────────────────────────

    pub fn record_file_operation(
        &mut self,
        filepath: &str,
        operation: FileOperation,
        success: bool,
        metadata: Option<Value>,
        error: Option<&str>,
    ) {
        self.working
            .record_file_operation(filepath, operation, success, metadata, error);
        self.flush_pending();
    }

    /// Record a tool call. `context` must be a JSON object; anything else is
    /// logged and dropped while the call itself is still recorded.
    pub fn record_tool_usage(
        &mut self,
        tool: &str,
        success: bool,
        duration: Option<Duration>,
        error: Option<&str>,
        context: Option<Value>,
    ) {
        let context = context.and_then(|value| match Payload::from_value(value) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::warn!(%tool, error = %err, "tool context ignored");
                None
            }
        });
        self.working
            .record_tool_invocation(tool, success, duration, error, context);
        self.flush_pending();
    }

    /// Session-local only.
    pub fn cache_file_content(&mut self, filepath: &str, content: &str, kind: FileOperation) {
        self.working.cache_file_content(filepath, content, kind);
    }

    /// Session-local only.
    pub fn record_command(&mut self, command: &str, success: bool, output: &str) {
        self.working.record_command(command, success, output);
    }

    pub fn get_file_content(&mut self, filepath: &str) -> Option<&str> {
        self.working.get_file_content(filepath)
    }

    pub fn get_session_summary(&self) -> SessionSummary {
        self.working.get_session_summary()
    }

    // ── Durable write path ───────────────────────────────────────────────────

    pub fn record_project_pattern(&mut self, kind: PatternKind, payload: Value, filepath: Option<&str>) {
        self.flush_pending();
        let result = Payload::from_value(payload)
            .and_then(|payload| self.persistent.record_project_pattern(kind, payload, filepath));
        if let Err(err) = result {
            self.note_failure("project pattern", err);
        }
    }

    pub fn record_user_preference(&mut self, category: &str, payload: Value) {
        self.flush_pending();
        let result = Payload::from_value(payload)
            .and_then(|payload| self.persistent.record_user_preference(category, payload));
        if let Err(err) = result {
            self.note_failure("user preference", err);
        }
    }

    pub fn record_success_pattern(
        &mut self,
        label: &str,
        payload: Value,
        score: f64,
        context: Option<Value>,
    ) {
        self.flush_pending();
        let result = Payload::from_value(payload).and_then(|payload| {
            let context = context.map(Payload::from_value).transpose()?;
            self.persistent
                .record_success_pattern(label, payload, score, context)
        });
        if let Err(err) = result {
            self.note_failure("success pattern", err);
        }
    }

    /// Returns the snippet id, or `None` if it could not be stored.
    pub fn store_code_snippet(
        &mut self,
        content: &str,
        snippet_type: &str,
        context: Option<Value>,
        tags: &[&str],
        filepath: Option<&str>,
    ) -> Option<u64> {
        self.flush_pending();
        let result = context
            .map(Payload::from_value)
            .transpose()
            .and_then(|context| {
                self.persistent
                    .store_code_snippet(content, snippet_type, context, tags, filepath)
            });
        match result {
            Ok(id) => Some(id),
            Err(err) => {
                self.note_failure("code snippet", err);
                None
            }
        }
    }

    // ── Undo ─────────────────────────────────────────────────────────────────

    /// Capture the undo point for a destructive action that is about to run.
    pub fn snapshot_before(
        &mut self,
        action: DestructiveAction,
        filepath: impl AsRef<Path>,
        safety: SafetyNet,
    ) -> Result<bool> {
        self.history.snapshot_before(action, filepath, safety)
    }

    /// Revert the latest destructive action and record the restoring write.
    pub fn undo_last_action(&mut self) -> Result<UndoOutcome> {
        let outcome = self.history.undo_last_action()?;

        let filepath = outcome.filepath.to_string_lossy().into_owned();
        self.working.invalidate(&filepath);
        let operation = match outcome.restoration {
            Restoration::ContentRestored { .. } => FileOperation::Write,
            Restoration::FileRemoved | Restoration::AlreadyAbsent => FileOperation::Delete,
        };
        let metadata = serde_json::json!({ "undo": outcome.action.as_str() });
        self.record_file_operation(&filepath, operation, true, Some(metadata), None);
        Ok(outcome)
    }

    pub fn history(&self) -> &ActionHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ActionHistory {
        &mut self.history
    }

    // ── Learning ─────────────────────────────────────────────────────────────

    /// Call once per agent turn; learns every `learning.learn_every_turns` turns.
    pub fn on_turn(&mut self, turn: u64) -> Option<LearnReport> {
        let every = self.config.learning.learn_every_turns;
        if every == 0 || turn == 0 || turn % every != 0 {
            return None;
        }
        Some(self.learn_from_session())
    }

    /// Commit repeated successful operation shapes as patterns.
    ///
    /// Looks at events recorded since the previous call. File operations are
    /// grouped by (operation, file type); each shape with at least
    /// `learning.repetition_threshold` successes bumps a project pattern and
    /// appends a success pattern scored by the shape's success ratio. Tools
    /// reaching the same threshold bump a `tool_usage` pattern. Then trims
    /// working-memory rings down to what the next context needs, without
    /// dropping events that are not yet persisted.
    pub fn learn_from_session(&mut self) -> LearnReport {
        self.flush_pending();

        #[derive(Default)]
        struct Shape {
            attempts: u64,
            successes: u64,
            last_path: Option<String>,
        }

        let mut shapes: BTreeMap<(FileOperation, String), Shape> = BTreeMap::new();
        let mut examined = 0;
        for op in self
            .working
            .recent_operations(usize::MAX)
            .filter(|op| op.seq > self.learned_through)
        {
            examined += 1;
            let shape = shapes
                .entry((op.operation, file_type_of(&op.filepath)))
                .or_default();
            shape.attempts += 1;
            if op.success {
                shape.successes += 1;
                shape.last_path = Some(op.filepath.clone());
            }
        }

        let mut tool_successes: BTreeMap<String, u64> = BTreeMap::new();
        for call in self
            .working
            .tool_invocations()
            .filter(|call| call.seq > self.learned_through)
        {
            examined += 1;
            if call.success {
                *tool_successes.entry(call.tool.clone()).or_insert(0) += 1;
            }
        }

        let threshold = self.config.learning.repetition_threshold.max(1) as u64;
        let mut committed = 0;
        let mut failed = false;
        for ((operation, file_type), shape) in shapes {
            if shape.successes < threshold {
                continue;
            }
            let last_path = shape.last_path.as_deref();
            match self.commit_shape(operation, &file_type, last_path, shape.attempts, shape.successes) {
                Ok(()) => committed += 1,
                Err(err) => {
                    self.note_failure("learned pattern", err);
                    failed = true;
                    break;
                }
            }
        }

        for (tool, successes) in tool_successes {
            if failed {
                break;
            }
            if successes < threshold {
                continue;
            }
            match self
                .persistent
                .record_project_pattern(PatternKind::ToolUsage, Payload::tool_usage(&tool), None)
            {
                Ok(_) => committed += 1,
                Err(err) => {
                    self.note_failure("learned pattern", err);
                    break;
                }
            }
        }

        // Advanced even on failure so no observation is ever counted twice.
        self.learned_through = self.working.last_seq();

        let trimmed = self
            .working
            .trim(self.config.context.recent_operations, self.learned_through);

        let report = LearnReport {
            operations_examined: examined,
            patterns_committed: committed,
            trimmed,
        };
        tracing::info!(
            examined = report.operations_examined,
            committed = report.patterns_committed,
            trimmed = report.trimmed,
            "learned from session"
        );
        report
    }

    fn commit_shape(
        &mut self,
        operation: FileOperation,
        file_type: &str,
        last_path: Option<&str>,
        attempts: u64,
        successes: u64,
    ) -> Result<()> {
        let payload = Payload::file_operation(operation, file_type);
        let kind = if operation.is_destructive() {
            PatternKind::FileModification
        } else {
            PatternKind::FileOperation
        };
        self.persistent
            .record_project_pattern(kind, payload.clone(), last_path)?;

        let context = Payload::new()
            .with("session", self.working.session_id().to_string())
            .with("attempts", attempts)
            .with("successes", successes);
        self.persistent.record_success_pattern(
            &format!("repeated_{operation}"),
            payload,
            successes as f64 / attempts as f64,
            Some(context),
        )?;
        Ok(())
    }

    // ── Delegated reads ──────────────────────────────────────────────────────

    /// Patterns matching every pair in `criteria`. A non-object `criteria`
    /// matches nothing.
    pub fn get_relevant_patterns(&self, criteria: &Value) -> Vec<ProjectPattern> {
        match Payload::from_value(criteria.clone()) {
            Ok(criteria) => self.persistent.get_relevant_patterns(&criteria),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring pattern query");
                Vec::new()
            }
        }
    }

    pub fn get_memory_summary(&self) -> MemorySummary {
        self.persistent.get_memory_summary()
    }

    pub fn search_code_snippets(
        &self,
        query: Option<&str>,
        snippet_type: Option<&str>,
    ) -> Vec<CodeSnippet> {
        self.persistent.search_code_snippets(query, snippet_type)
    }

    pub fn get_frequently_accessed_files(&self, top_k: usize) -> Vec<FileFrequency> {
        self.persistent.get_frequently_accessed_files(top_k)
    }

    /// Total events lost to ring eviction while the store was unwritable.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }
}

fn build_batch(events: Vec<SessionEvent>) -> SessionBatch {
    let mut batch = SessionBatch::default();
    for event in events {
        match event {
            SessionEvent::FileOperation(op) => {
                let (content_hash, size) = match op.fingerprint {
                    Some(fp) => (Some(fp.sha256), Some(fp.size)),
                    None => (None, None),
                };
                batch.file_access.push(FileAccessRecord {
                    filepath: op.filepath,
                    operation: op.operation,
                    success: op.success,
                    timestamp: op.timestamp,
                    content_hash,
                    size,
                    error: op.error,
                });
            }
            SessionEvent::ToolInvocation(call) => batch.tool_calls.push(ToolCall {
                tool: call.tool,
                success: call.success,
                duration: call.duration,
                error: call.error,
                context: call.context,
            }),
        }
    }
    batch
}
