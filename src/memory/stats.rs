use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::store::document::MemoryDocument;

/// Response from get_memory_summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySummary {
    pub file_access_records: usize,
    pub distinct_files: usize,
    pub tools_tracked: usize,
    pub total_tool_invocations: u64,
    pub patterns: usize,
    pub preferences: usize,
    pub success_patterns: usize,
    pub snippets: usize,
    pub store_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_access: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_access: Option<DateTime<Utc>>,
}

/// Compute aggregate counts over the document.
///
/// `store_path` is used for the on-disk size; a store never written yet reports 0.
pub fn memory_summary(doc: &MemoryDocument, store_path: Option<&Path>) -> MemorySummary {
    let distinct_files = doc
        .file_access
        .iter()
        .map(|r| r.filepath.as_str())
        .collect::<HashSet<_>>()
        .len();

    let store_size_bytes = store_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    MemorySummary {
        file_access_records: doc.file_access.len(),
        distinct_files,
        tools_tracked: doc.tool_usage.len(),
        total_tool_invocations: doc.tool_usage.values().map(|s| s.invocations).sum(),
        patterns: doc.patterns.len(),
        preferences: doc.preferences.len(),
        success_patterns: doc.success_patterns.len(),
        snippets: doc.snippets.len(),
        store_size_bytes,
        oldest_access: doc.file_access.iter().map(|r| r.timestamp).min(),
        newest_access: doc.file_access.iter().map(|r| r.timestamp).max(),
    }
}
