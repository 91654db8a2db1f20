//! Session-scoped working memory.
//!
//! Holds what the agent touched during the current process: cached file
//! content (LRU-bounded), a ring of recent file operations, a ring of tool
//! invocations and a ring of shell commands. Every file operation and tool
//! invocation gets a session sequence number and is also queued in an
//! outbox until the manager acknowledges it as persisted, so shrinking or
//! disabling the rings never loses durable statistics. Nothing here is ever
//! written to disk.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use uuid::Uuid;

use crate::config::WorkingConfig;
use crate::memory::types::{ContentFingerprint, FileOperation, Payload};

/// Longest command output retained per entry, in characters.
const MAX_COMMAND_OUTPUT: usize = 4000;

/// A file operation observed this session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub seq: u64,
    pub filepath: String,
    pub operation: FileOperation,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Digest of the file content the operation observed or produced, when
    /// the cache holds it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<ContentFingerprint>,
}

/// A tool call observed this session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub seq: u64,
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Arguments or other caller context for the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Payload>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRecord {
    pub command: String,
    pub success: bool,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedFile {
    pub content: String,
    pub kind: FileOperation,
    pub timestamp: DateTime<Utc>,
    /// Session sequence number current when the content was cached.
    #[serde(skip)]
    cached_after: u64,
}

/// A session observation that persistent memory cares about, in sequence order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    FileOperation(OperationRecord),
    ToolInvocation(ToolInvocation),
}

impl SessionEvent {
    pub fn seq(&self) -> u64 {
        match self {
            Self::FileOperation(op) => op.seq,
            Self::ToolInvocation(call) => call.seq,
        }
    }
}

/// Aggregate view of the session. Produced without side effects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Counts over the whole session, including entries already evicted.
    pub operations_by_kind: BTreeMap<String, u64>,
    pub failed_operations: u64,
    pub tool_invocations: u64,
    pub command_count: u64,
    pub cached_files: usize,
    pub active_files: Vec<String>,
    /// The retained operation ring, oldest first.
    pub recent_operations: Vec<OperationRecord>,
}

#[derive(Debug)]
pub struct WorkingMemory {
    config: WorkingConfig,
    session_id: Uuid,
    started_at: DateTime<Utc>,
    /// filepath → recency tick of the last touch.
    active_files: HashMap<String, u64>,
    recent_operations: VecDeque<OperationRecord>,
    tool_invocations: VecDeque<ToolInvocation>,
    command_history: VecDeque<CommandRecord>,
    /// `None` when caching is disabled.
    file_cache: Option<LruCache<String, CachedFile>>,
    /// Events not yet acknowledged as persisted, in sequence order.
    unsynced: VecDeque<SessionEvent>,
    operations_by_kind: BTreeMap<FileOperation, u64>,
    failed_operations: u64,
    tool_invocation_count: u64,
    command_count: u64,
    tick: u64,
    next_seq: u64,
}

impl WorkingMemory {
    pub fn new(config: WorkingConfig) -> Self {
        let session_id = Uuid::now_v7();
        tracing::debug!(%session_id, "working memory created");
        Self {
            file_cache: NonZeroUsize::new(config.max_cached_files).map(LruCache::new),
            config,
            session_id,
            started_at: Utc::now(),
            active_files: HashMap::new(),
            recent_operations: VecDeque::new(),
            tool_invocations: VecDeque::new(),
            command_history: VecDeque::new(),
            unsynced: VecDeque::new(),
            operations_by_kind: BTreeMap::new(),
            failed_operations: 0,
            tool_invocation_count: 0,
            command_count: 0,
            tick: 0,
            next_seq: 1,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Sequence number of the most recent event, 0 before any event.
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Cache file content, evicting the least recently used entry when full.
    ///
    /// To fingerprint a destructive operation, cache the content it produced
    /// under the same kind immediately before recording it.
    pub fn cache_file_content(&mut self, filepath: &str, content: &str, kind: FileOperation) {
        let cached_after = self.last_seq();
        let Some(cache) = self.file_cache.as_mut() else {
            return;
        };
        let entry = CachedFile {
            content: content.to_string(),
            kind,
            timestamp: Utc::now(),
            cached_after,
        };
        if let Some((evicted, _)) = cache.push(filepath.to_string(), entry) {
            if evicted != filepath {
                tracing::debug!(%evicted, "file cache full, evicting least recently used");
            }
        }
    }

    /// Cached content for `filepath`, refreshing its recency.
    pub fn get_file_content(&mut self, filepath: &str) -> Option<&str> {
        self.file_cache
            .as_mut()?
            .get(filepath)
            .map(|entry| entry.content.as_str())
    }

    /// Cache entry for `filepath` without touching its recency.
    pub fn cached_file(&self, filepath: &str) -> Option<&CachedFile> {
        self.file_cache.as_ref()?.peek(filepath)
    }

    /// Drop a cache entry, e.g. after the file was deleted.
    pub fn invalidate(&mut self, filepath: &str) {
        if let Some(cache) = self.file_cache.as_mut() {
            cache.pop(filepath);
        }
    }

    /// Append to the operation ring and mark `filepath` active. Returns the
    /// event's sequence number.
    ///
    /// A destructive operation leaves the cache entry in place only if it
    /// was cached for this very operation; otherwise the entry no longer
    /// matches the file and is dropped.
    pub fn record_file_operation(
        &mut self,
        filepath: &str,
        operation: FileOperation,
        success: bool,
        metadata: Option<serde_json::Value>,
        error: Option<&str>,
    ) -> u64 {
        let seq = self.take_seq();
        self.touch_active(filepath);

        let fingerprint = self.reconcile_cache(filepath, operation, success, seq);
        *self.operations_by_kind.entry(operation).or_insert(0) += 1;
        if !success {
            self.failed_operations += 1;
        }

        let record = OperationRecord {
            seq,
            filepath: filepath.to_string(),
            operation,
            success,
            timestamp: Utc::now(),
            metadata,
            error: error.map(str::to_string),
            fingerprint,
        };
        self.enqueue_unsynced(SessionEvent::FileOperation(record.clone()));
        push_bounded(&mut self.recent_operations, record, self.config.max_recent_operations);
        seq
    }

    /// Fingerprint the cached content if it reflects the file after `operation`,
    /// dropping entries that no longer do.
    fn reconcile_cache(
        &mut self,
        filepath: &str,
        operation: FileOperation,
        success: bool,
        seq: u64,
    ) -> Option<ContentFingerprint> {
        let cached = self.file_cache.as_ref()?.peek(filepath)?;
        if !operation.is_destructive() {
            return success.then(|| ContentFingerprint::of(&cached.content));
        }

        let produced_by_this_op = operation != FileOperation::Delete
            && cached.kind == operation
            && cached.cached_after + 1 == seq;
        match (success, produced_by_this_op) {
            (true, true) => Some(ContentFingerprint::of(&cached.content)),
            // Stale after a change, or never written by a failed one.
            (true, false) | (false, true) => {
                self.invalidate(filepath);
                None
            }
            (false, false) => None,
        }
    }

    /// Append to the tool invocation ring. Returns the event's sequence number.
    pub fn record_tool_invocation(
        &mut self,
        tool: &str,
        success: bool,
        duration: Option<Duration>,
        error: Option<&str>,
        context: Option<Payload>,
    ) -> u64 {
        let seq = self.take_seq();
        self.tool_invocation_count += 1;
        let call = ToolInvocation {
            seq,
            tool: tool.to_string(),
            success,
            duration,
            error: error.map(str::to_string),
            context,
            timestamp: Utc::now(),
        };
        self.enqueue_unsynced(SessionEvent::ToolInvocation(call.clone()));
        push_bounded(&mut self.tool_invocations, call, self.config.max_recent_operations);
        seq
    }

    fn enqueue_unsynced(&mut self, event: SessionEvent) {
        let cap = self.config.max_unsynced_events;
        if cap > 0 && self.unsynced.len() >= cap {
            self.unsynced.pop_front();
        }
        self.unsynced.push_back(event);
    }

    pub fn record_command(&mut self, command: &str, success: bool, output: &str) {
        self.command_count += 1;
        push_bounded(
            &mut self.command_history,
            CommandRecord {
                command: command.to_string(),
                success,
                output: truncate_chars(output, MAX_COMMAND_OUTPUT),
                timestamp: Utc::now(),
            },
            self.config.max_command_history,
        );
    }

    fn touch_active(&mut self, filepath: &str) {
        self.tick += 1;
        self.active_files.insert(filepath.to_string(), self.tick);
        while self.active_files.len() > self.config.max_active_files {
            let oldest = self
                .active_files
                .iter()
                .min_by_key(|(_, tick)| **tick)
                .map(|(path, _)| path.clone());
            match oldest {
                Some(path) => {
                    self.active_files.remove(&path);
                }
                None => break,
            }
        }
    }

    /// Active files, most recently touched first.
    pub fn active_files(&self) -> Vec<String> {
        let mut files: Vec<(&String, u64)> =
            self.active_files.iter().map(|(k, v)| (k, *v)).collect();
        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        files.into_iter().map(|(k, _)| k.clone()).collect()
    }

    /// The last `n` operations, oldest first.
    pub fn recent_operations(&self, n: usize) -> impl Iterator<Item = &OperationRecord> {
        let skip = self.recent_operations.len().saturating_sub(n);
        self.recent_operations.iter().skip(skip)
    }

    pub fn operation_count(&self) -> usize {
        self.recent_operations.len()
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandRecord> {
        self.command_history.iter()
    }

    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.tool_invocations.iter()
    }

    /// Unacknowledged events with a sequence number above `cursor`, in order.
    pub fn events_since(&self, cursor: u64) -> Vec<SessionEvent> {
        self.unsynced
            .iter()
            .filter(|event| event.seq() > cursor)
            .cloned()
            .collect()
    }

    /// Forget outbox entries up to and including `seq`; they are persisted.
    pub fn acknowledge(&mut self, seq: u64) {
        while self.unsynced.front().is_some_and(|event| event.seq() <= seq) {
            self.unsynced.pop_front();
        }
    }

    pub fn unsynced_count(&self) -> usize {
        self.unsynced.len()
    }

    /// Drop the oldest ring entries beyond `keep`, but never an entry whose
    /// sequence number is above `removable_through`. Returns how many were dropped.
    pub fn trim(&mut self, keep: usize, removable_through: u64) -> usize {
        let mut removed = 0;
        while self.recent_operations.len() > keep
            && self
                .recent_operations
                .front()
                .is_some_and(|op| op.seq <= removable_through)
        {
            self.recent_operations.pop_front();
            removed += 1;
        }
        while self.tool_invocations.len() > keep
            && self
                .tool_invocations
                .front()
                .is_some_and(|call| call.seq <= removable_through)
        {
            self.tool_invocations.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn get_session_summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id,
            started_at: self.started_at,
            operations_by_kind: self
                .operations_by_kind
                .iter()
                .map(|(op, count)| (op.as_str().to_string(), *count))
                .collect(),
            failed_operations: self.failed_operations,
            tool_invocations: self.tool_invocation_count,
            command_count: self.command_count,
            cached_files: self.file_cache.as_ref().map_or(0, LruCache::len),
            active_files: self.active_files(),
            recent_operations: self.recent_operations.iter().cloned().collect(),
        }
    }
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while ring.len() >= cap {
        ring.pop_front();
    }
    ring.push_back(item);
}

/// Truncate to at most `max_chars` characters, appending "..." if truncated.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
