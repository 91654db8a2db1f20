//! Layout of the per-project memory document.
//!
//! One JSON document holds every durable section: `file_access`,
//! `tool_usage`, `patterns`, `preferences`, `success_patterns` and
//! `snippets`. Unknown or missing sections default to empty so older
//! documents keep loading.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::types::{
    CodeSnippet, FileAccessRecord, ProjectPattern, SuccessPattern, ToolUsageStat, UserPreference,
};

/// The document version this crate reads and writes.
pub const CURRENT_DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    /// Absent in pre-versioned documents, which deserialize as version 0.
    #[serde(default)]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub file_access: Vec<FileAccessRecord>,
    #[serde(default)]
    pub tool_usage: BTreeMap<String, ToolUsageStat>,
    #[serde(default)]
    pub patterns: Vec<ProjectPattern>,
    #[serde(default)]
    pub preferences: BTreeMap<String, UserPreference>,
    #[serde(default)]
    pub success_patterns: Vec<SuccessPattern>,
    #[serde(default)]
    pub snippets: Vec<CodeSnippet>,
    /// Id handed to the next stored snippet. Never reused, even after pruning.
    #[serde(default = "first_snippet_id")]
    pub next_snippet_id: u64,
}

fn first_snippet_id() -> u64 {
    1
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self {
            version: CURRENT_DOCUMENT_VERSION,
            created_at: Utc::now(),
            file_access: Vec::new(),
            tool_usage: BTreeMap::new(),
            patterns: Vec::new(),
            preferences: BTreeMap::new(),
            success_patterns: Vec::new(),
            snippets: Vec::new(),
            next_snippet_id: first_snippet_id(),
        }
    }
}

impl MemoryDocument {
    /// Bring an older document up to [`CURRENT_DOCUMENT_VERSION`].
    ///
    /// Returns an error message for documents written by a newer version.
    pub fn upgrade(&mut self) -> Result<(), String> {
        if self.version > CURRENT_DOCUMENT_VERSION {
            return Err(format!(
                "document version {} is newer than supported version {}",
                self.version, CURRENT_DOCUMENT_VERSION
            ));
        }

        while self.version < CURRENT_DOCUMENT_VERSION {
            let next = self.version + 1;
            tracing::debug!(from = self.version, to = next, "upgrading memory document");
            if next == 1 {
                // v0 documents could hold snippet ids without a counter.
                let max_id = self.snippets.iter().map(|s| s.id).max().unwrap_or(0);
                self.next_snippet_id = self.next_snippet_id.max(max_id + 1);
            }
            self.version = next;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.file_access.is_empty()
            && self.tool_usage.is_empty()
            && self.patterns.is_empty()
            && self.preferences.is_empty()
            && self.success_patterns.is_empty()
            && self.snippets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_deserializes_as_v0() {
        let doc: MemoryDocument = serde_json::from_str("{}").unwrap();
        assert_eq!(doc.version, 0);
        assert!(doc.is_empty());
        assert_eq!(doc.next_snippet_id, 1);
    }

    #[test]
    fn upgrade_fixes_snippet_counter() {
        let raw = r#"{
            "snippets": [{
                "id": 7,
                "content": "fn main() {}",
                "type": "function",
                "timestamp": "2026-01-01T00:00:00Z"
            }]
        }"#;
        let mut doc: MemoryDocument = serde_json::from_str(raw).unwrap();
        doc.upgrade().unwrap();
        assert_eq!(doc.version, CURRENT_DOCUMENT_VERSION);
        assert_eq!(doc.next_snippet_id, 8);
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut doc = MemoryDocument {
            version: CURRENT_DOCUMENT_VERSION + 1,
            ..Default::default()
        };
        assert!(doc.upgrade().is_err());
    }

    #[test]
    fn sections_use_documented_names() {
        let value = serde_json::to_value(MemoryDocument::default()).unwrap();
        for section in [
            "file_access",
            "tool_usage",
            "patterns",
            "preferences",
            "success_patterns",
            "snippets",
        ] {
            assert!(value.get(section).is_some(), "missing section {section}");
        }
    }
}
