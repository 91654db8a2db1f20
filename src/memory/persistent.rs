//! Durable, project-scoped memory.
//!
//! [`PersistentMemory`] owns the in-memory copy of the project's memory
//! document and is the only writer of its file. Every mutation is staged on
//! a copy of the document, written through [`store::write_document`] and only
//! then committed, so a failed write leaves both the file and the in-memory
//! state exactly as they were.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use crate::config::RetentionConfig;
use crate::error::{MemoryError, Result};
use crate::memory::maintenance::{self, PruneResult};
use crate::memory::search::{self, FileFrequency};
use crate::memory::stats::{self, MemorySummary};
use crate::memory::types::{
    CodeSnippet, FileAccessRecord, FileOperation, Payload, PatternKind, ProjectPattern,
    SuccessPattern, ToolUsageStat, UserPreference,
};
use crate::store::{self, document::MemoryDocument};

/// One tool call to fold into the aggregate statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub success: bool,
    pub duration: Option<Duration>,
    pub error: Option<String>,
    pub context: Option<Payload>,
}

/// Events applied together under a single write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionBatch {
    pub file_access: Vec<FileAccessRecord>,
    pub tool_calls: Vec<ToolCall>,
}

impl SessionBatch {
    pub fn is_empty(&self) -> bool {
        self.file_access.is_empty() && self.tool_calls.is_empty()
    }
}

#[derive(Debug)]
pub struct PersistentMemory {
    path: PathBuf,
    document: MemoryDocument,
    retention: RetentionConfig,
    load_warning: Option<MemoryError>,
}

impl PersistentMemory {
    /// Load the document at `path`, or start empty if it does not exist.
    ///
    /// A corrupt document is reset and reported via [`Self::load_warning`];
    /// only an OS-level read failure is an error.
    pub fn open(
        path: impl AsRef<Path>,
        retention: RetentionConfig,
        backup_corrupt: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let loaded = store::load_document(&path, backup_corrupt)?;
        Ok(Self {
            path,
            document: loaded.document,
            retention,
            load_warning: loaded.warning,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &MemoryDocument {
        &self.document
    }

    /// The non-fatal problem encountered while loading, if any.
    pub fn load_warning(&self) -> Option<&MemoryError> {
        self.load_warning.as_ref()
    }

    /// Stage `f` on a copy of the document, persist it, then commit.
    fn mutate<T>(&mut self, f: impl FnOnce(&mut MemoryDocument) -> T) -> Result<T> {
        let mut staged = self.document.clone();
        let out = f(&mut staged);
        store::write_document(&self.path, &staged)?;
        self.document = staged;
        Ok(out)
    }

    // ── Write path ───────────────────────────────────────────────────────────

    pub fn record_file_access(
        &mut self,
        filepath: &str,
        operation: FileOperation,
        success: bool,
        content_hash: Option<&str>,
        size: Option<u64>,
    ) -> Result<()> {
        let record = FileAccessRecord {
            filepath: filepath.to_string(),
            operation,
            success,
            timestamp: Utc::now(),
            content_hash: content_hash.map(str::to_string),
            size,
            error: None,
        };
        self.apply_batch(SessionBatch {
            file_access: vec![record],
            tool_calls: Vec::new(),
        })
        .map(|_| ())
    }

    pub fn record_tool_usage(
        &mut self,
        tool: &str,
        success: bool,
        duration: Option<Duration>,
        error: Option<&str>,
        context: Option<Payload>,
    ) -> Result<()> {
        self.apply_batch(SessionBatch {
            file_access: Vec::new(),
            tool_calls: vec![ToolCall {
                tool: tool.to_string(),
                success,
                duration,
                error: error.map(str::to_string),
                context,
            }],
        })
        .map(|_| ())
    }

    /// Append access records and fold tool calls into their statistics under
    /// one write, then apply retention.
    pub fn apply_batch(&mut self, batch: SessionBatch) -> Result<PruneResult> {
        if batch.is_empty() {
            return Ok(PruneResult::default());
        }
        let retention = self.retention.clone();
        let accesses = batch.file_access.len();
        let calls = batch.tool_calls.len();

        let pruned = self.mutate(move |doc| {
            doc.file_access.extend(batch.file_access);
            for call in batch.tool_calls {
                apply_tool_call(doc.tool_usage.entry(call.tool.clone()).or_default(), &call);
            }
            maintenance::enforce_retention(doc, &retention)
        })?;

        tracing::debug!(accesses, calls, pruned = pruned.total(), "session batch persisted");
        Ok(pruned)
    }

    /// Append a pattern, or bump the occurrence count of an identical one.
    /// Returns the pattern's occurrence count after the write.
    pub fn record_project_pattern(
        &mut self,
        kind: PatternKind,
        payload: Payload,
        filepath: Option<&str>,
    ) -> Result<u64> {
        let occurrences = self.mutate(|doc| {
            let now = Utc::now();
            if let Some(existing) = doc
                .patterns
                .iter_mut()
                .find(|p| p.kind == kind && p.payload == payload)
            {
                existing.occurrences += 1;
                existing.timestamp = now;
                if let Some(path) = filepath {
                    existing.filepath = Some(path.to_string());
                }
                return existing.occurrences;
            }
            doc.patterns.push(ProjectPattern {
                kind: kind.clone(),
                payload,
                filepath: filepath.map(str::to_string),
                timestamp: now,
                occurrences: 1,
            });
            1
        })?;

        tracing::debug!(kind = %kind, occurrences, "project pattern recorded");
        Ok(occurrences)
    }

    /// Replace the preference stored for `category`.
    pub fn record_user_preference(&mut self, category: &str, payload: Payload) -> Result<()> {
        if category.trim().is_empty() {
            return Err(MemoryError::InvalidPayload("empty preference category".into()));
        }
        self.mutate(|doc| {
            doc.preferences.insert(
                category.to_string(),
                UserPreference {
                    payload,
                    updated_at: Utc::now(),
                },
            );
        })?;
        tracing::debug!(category, "user preference updated");
        Ok(())
    }

    /// Append a success pattern. Returns the stored (clamped) score.
    pub fn record_success_pattern(
        &mut self,
        label: &str,
        payload: Payload,
        score: f64,
        context: Option<Payload>,
    ) -> Result<f64> {
        let score = clamp_score(score);
        let retention = self.retention.clone();
        self.mutate(|doc| {
            doc.success_patterns.push(SuccessPattern {
                label: label.to_string(),
                payload,
                score,
                context,
                timestamp: Utc::now(),
            });
            maintenance::enforce_retention(doc, &retention);
        })?;
        Ok(score)
    }

    /// Store a snippet under the next id. Returns the id.
    pub fn store_code_snippet(
        &mut self,
        content: &str,
        snippet_type: &str,
        context: Option<Payload>,
        tags: &[&str],
        filepath: Option<&str>,
    ) -> Result<u64> {
        let retention = self.retention.clone();
        let id = self.mutate(|doc| {
            let id = doc.next_snippet_id;
            doc.next_snippet_id += 1;
            doc.snippets.push(CodeSnippet {
                id,
                content: content.to_string(),
                snippet_type: snippet_type.to_string(),
                context: context.unwrap_or_default(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                filepath: filepath.map(str::to_string),
                timestamp: Utc::now(),
            });
            maintenance::enforce_retention(doc, &retention);
            id
        })?;
        tracing::debug!(id, snippet_type, "code snippet stored");
        Ok(id)
    }

    // ── Read path ────────────────────────────────────────────────────────────

    pub fn search_code_snippets(
        &self,
        query: Option<&str>,
        snippet_type: Option<&str>,
    ) -> Vec<CodeSnippet> {
        search::search_code_snippets(&self.document, query, snippet_type)
    }

    pub fn get_frequently_accessed_files(&self, top_k: usize) -> Vec<FileFrequency> {
        search::frequently_accessed_files(&self.document, top_k)
    }

    pub fn get_relevant_patterns(&self, criteria: &Payload) -> Vec<ProjectPattern> {
        search::relevant_patterns(&self.document, criteria)
    }

    pub fn get_memory_summary(&self) -> MemorySummary {
        stats::memory_summary(&self.document, Some(&self.path))
    }

    pub fn tool_stat(&self, tool: &str) -> Option<&ToolUsageStat> {
        self.document.tool_usage.get(tool)
    }

    pub fn tool_effectiveness(&self, tool: &str) -> Option<f64> {
        self.tool_stat(tool).map(ToolUsageStat::effectiveness)
    }

    /// Effectiveness score of every tracked tool.
    pub fn effectiveness_scores(&self) -> BTreeMap<String, f64> {
        self.document
            .tool_usage
            .iter()
            .map(|(name, stat)| (name.clone(), stat.effectiveness()))
            .collect()
    }

    pub fn user_preference(&self, category: &str) -> Option<&Payload> {
        self.document.preferences.get(category).map(|p| &p.payload)
    }

    pub fn user_preferences(&self) -> BTreeMap<String, Payload> {
        self.document
            .preferences
            .iter()
            .map(|(category, pref)| (category.clone(), pref.payload.clone()))
            .collect()
    }

    pub fn success_patterns(&self) -> &[SuccessPattern] {
        &self.document.success_patterns
    }
}

fn apply_tool_call(stat: &mut ToolUsageStat, call: &ToolCall) {
    stat.invocations += 1;
    if call.success {
        stat.successes += 1;
    } else if let Some(error) = &call.error {
        stat.last_error = Some(error.clone());
    }
    if let Some(duration) = call.duration {
        stat.total_duration_secs += duration.as_secs_f64();
    }
    if let Some(context) = &call.context {
        stat.last_context = Some(context.clone());
    }
    stat.last_used = Some(Utc::now());
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> PersistentMemory {
        PersistentMemory::open(
            tmp.path().join("memory.json"),
            RetentionConfig::default(),
            true,
        )
        .unwrap()
    }

    #[test]
    fn tool_usage_accumulates() {
        let tmp = TempDir::new().unwrap();
        let mut pm = open(&tmp);

        pm.record_tool_usage("run_command", true, Some(Duration::from_millis(500)), None, None)
            .unwrap();
        pm.record_tool_usage("run_command", false, Some(Duration::from_millis(1500)), Some("not found"), None)
            .unwrap();
        pm.record_tool_usage("run_command", false, None, None, None).unwrap();

        let stat = pm.tool_stat("run_command").unwrap();
        assert_eq!(stat.invocations, 3);
        assert_eq!(stat.successes, 1);
        assert!((stat.total_duration_secs - 2.0).abs() < 1e-9);
        assert_eq!(stat.last_error.as_deref(), Some("not found"));
        assert!((pm.tool_effectiveness("run_command").unwrap() - 1.0 / 3.0).abs() < 1e-9);
        assert!(pm.tool_effectiveness("unknown").is_none());
    }

    #[test]
    fn tool_context_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let context = Payload::from_value(json!({"command": "cargo test"})).unwrap();
        {
            let mut pm = open(&tmp);
            pm.record_tool_usage("run_command", true, None, None, Some(context.clone()))
                .unwrap();
            // A later call without context keeps the last one seen.
            pm.record_tool_usage("run_command", true, None, None, None).unwrap();
        }
        let pm = open(&tmp);
        let stat = pm.tool_stat("run_command").unwrap();
        assert_eq!(stat.invocations, 2);
        assert_eq!(stat.last_context.as_ref(), Some(&context));
    }

    #[test]
    fn identical_pattern_increments() {
        let tmp = TempDir::new().unwrap();
        let mut pm = open(&tmp);
        let payload = Payload::file_operation(FileOperation::Write, ".py");

        assert_eq!(
            pm.record_project_pattern(PatternKind::FileModification, payload.clone(), Some("a.py"))
                .unwrap(),
            1
        );
        assert_eq!(
            pm.record_project_pattern(PatternKind::FileModification, payload.clone(), None)
                .unwrap(),
            2
        );
        // Same payload under a different kind is a distinct pattern.
        assert_eq!(
            pm.record_project_pattern(PatternKind::FileOperation, payload, None)
                .unwrap(),
            1
        );

        assert_eq!(pm.document().patterns.len(), 2);
        assert_eq!(pm.document().patterns[0].filepath.as_deref(), Some("a.py"));
    }

    #[test]
    fn preference_upsert() {
        let tmp = TempDir::new().unwrap();
        let mut pm = open(&tmp);

        let first = Payload::from_value(json!({"indentation": "tabs"})).unwrap();
        let second = Payload::from_value(json!({"indentation": "spaces", "line_length": 80})).unwrap();
        pm.record_user_preference("coding_style", first).unwrap();
        pm.record_user_preference("coding_style", second.clone()).unwrap();

        assert_eq!(pm.document().preferences.len(), 1);
        assert_eq!(pm.user_preference("coding_style"), Some(&second));
        assert!(pm.record_user_preference("  ", Payload::new()).is_err());
    }

    #[test]
    fn success_score_clamped() {
        let tmp = TempDir::new().unwrap();
        let mut pm = open(&tmp);

        assert_eq!(pm.record_success_pattern("fix", Payload::new(), 1.7, None).unwrap(), 1.0);
        assert_eq!(pm.record_success_pattern("fix", Payload::new(), -0.2, None).unwrap(), 0.0);
        assert_eq!(pm.record_success_pattern("fix", Payload::new(), f64::NAN, None).unwrap(), 0.0);
        assert_eq!(pm.record_success_pattern("fix", Payload::new(), 0.9, None).unwrap(), 0.9);
        assert!(pm.success_patterns().iter().all(|p| (0.0..=1.0).contains(&p.score)));
    }

    #[test]
    fn snippet_ids_monotonic_across_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut pm = open(&tmp);
            assert_eq!(pm.store_code_snippet("a", "t", None, &[], None).unwrap(), 1);
            assert_eq!(pm.store_code_snippet("b", "t", None, &["x"], None).unwrap(), 2);
        }
        let mut pm = open(&tmp);
        assert_eq!(pm.store_code_snippet("c", "t", None, &[], None).unwrap(), 3);
    }

    #[test]
    fn retention_applies_on_access() {
        let tmp = TempDir::new().unwrap();
        let retention = RetentionConfig {
            max_records_per_file: 3,
            max_file_access_records: 5,
            ..Default::default()
        };
        let mut pm =
            PersistentMemory::open(tmp.path().join("memory.json"), retention, true).unwrap();

        for _ in 0..5 {
            pm.record_file_access("a.rs", FileOperation::Read, true, None, None).unwrap();
        }
        for _ in 0..4 {
            pm.record_file_access("b.rs", FileOperation::Read, true, None, None).unwrap();
        }

        let doc = pm.document();
        assert_eq!(doc.file_access.len(), 5);
        assert_eq!(doc.file_access.iter().filter(|r| r.filepath == "b.rs").count(), 3);
    }

    #[test]
    fn failed_write_leaves_state_untouched() {
        let tmp = TempDir::new().unwrap();
        let store_dir = tmp.path().join("store");
        let mut pm = PersistentMemory::open(
            store_dir.join("memory.json"),
            RetentionConfig::default(),
            true,
        )
        .unwrap();
        // A regular file where the store directory should be blocks every write.
        std::fs::write(&store_dir, "").unwrap();

        let err = pm
            .record_tool_usage("read_file", true, None, None, None)
            .unwrap_err();
        assert!(matches!(err, MemoryError::StoreUnavailable { .. }));
        assert!(pm.tool_stat("read_file").is_none());
    }
}
