//! Read path over the persisted document: snippet search, access-frequency
//! ranking and pattern retrieval. Every function here is infallible and
//! returns an empty result on an empty store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::memory::types::{CodeSnippet, Payload, ProjectPattern};
use crate::store::document::MemoryDocument;

/// One entry of the access-frequency ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFrequency {
    pub filepath: String,
    pub access_count: usize,
    pub last_access: DateTime<Utc>,
}

/// Snippets whose content or tags contain `query` (case-insensitive) and
/// whose type equals `snippet_type`, most recent first. Either filter may be
/// omitted.
pub fn search_code_snippets(
    doc: &MemoryDocument,
    query: Option<&str>,
    snippet_type: Option<&str>,
) -> Vec<CodeSnippet> {
    let needle = query
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase);

    let mut hits: Vec<CodeSnippet> = doc
        .snippets
        .iter()
        .filter(|s| snippet_type.is_none_or(|t| s.snippet_type == t))
        .filter(|s| match &needle {
            Some(q) => {
                s.content.to_lowercase().contains(q)
                    || s.tags.iter().any(|tag| tag.to_lowercase().contains(q))
            }
            None => true,
        })
        .cloned()
        .collect();

    hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    hits
}

/// Distinct filepaths ranked by number of access records, ties broken by the
/// most recent access. At most `top_k` entries.
pub fn frequently_accessed_files(doc: &MemoryDocument, top_k: usize) -> Vec<FileFrequency> {
    let mut by_path: HashMap<&str, (usize, DateTime<Utc>)> = HashMap::new();
    for record in &doc.file_access {
        let entry = by_path
            .entry(record.filepath.as_str())
            .or_insert((0, record.timestamp));
        entry.0 += 1;
        if record.timestamp > entry.1 {
            entry.1 = record.timestamp;
        }
    }

    let mut ranked: Vec<FileFrequency> = by_path
        .into_iter()
        .map(|(filepath, (access_count, last_access))| FileFrequency {
            filepath: filepath.to_string(),
            access_count,
            last_access,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.access_count
            .cmp(&a.access_count)
            .then(b.last_access.cmp(&a.last_access))
            .then(a.filepath.cmp(&b.filepath))
    });
    ranked.truncate(top_k);
    ranked
}

/// Patterns whose payload contains every pair in `criteria`, by occurrence
/// count then recency.
pub fn relevant_patterns(doc: &MemoryDocument, criteria: &Payload) -> Vec<ProjectPattern> {
    let mut hits: Vec<ProjectPattern> = doc
        .patterns
        .iter()
        .filter(|p| p.payload.matches(criteria))
        .cloned()
        .collect();

    hits.sort_by(|a, b| {
        b.occurrences
            .cmp(&a.occurrences)
            .then(b.timestamp.cmp(&a.timestamp))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{FileAccessRecord, FileOperation, PatternKind};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn access_at(path: &str, minutes_ago: i64) -> FileAccessRecord {
        FileAccessRecord {
            filepath: path.to_string(),
            operation: FileOperation::Read,
            success: true,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            content_hash: None,
            size: None,
            error: None,
        }
    }

    fn snippet(id: u64, content: &str, snippet_type: &str, tags: &[&str], minutes_ago: i64) -> CodeSnippet {
        CodeSnippet {
            id,
            content: content.to_string(),
            snippet_type: snippet_type.to_string(),
            context: Payload::new(),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            filepath: None,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn empty_store_ranks_nothing() {
        let doc = MemoryDocument::default();
        assert!(frequently_accessed_files(&doc, 5).is_empty());
        assert!(relevant_patterns(&doc, &Payload::new()).is_empty());
        assert!(search_code_snippets(&doc, Some("x"), None).is_empty());
    }

    #[test]
    fn frequency_ties_prefer_recent_access() {
        let mut doc = MemoryDocument::default();
        doc.file_access = vec![
            access_at("old.rs", 30),
            access_at("old.rs", 20),
            access_at("new.rs", 10),
            access_at("new.rs", 1),
            access_at("rare.rs", 0),
        ];
        let ranked: Vec<String> = frequently_accessed_files(&doc, 3)
            .into_iter()
            .map(|f| f.filepath)
            .collect();
        assert_eq!(ranked, vec!["new.rs", "old.rs", "rare.rs"]);
    }

    #[test]
    fn snippet_search_filters_and_orders() {
        let mut doc = MemoryDocument::default();
        doc.snippets = vec![
            snippet(1, "def hello_world(): pass", "function_definition", &["hello"], 10),
            snippet(2, "class Greeter: ...", "class_definition", &["hello"], 5),
            snippet(3, "fn goodbye() {}", "function_definition", &["bye"], 1),
            snippet(4, "def Hello_again(): pass", "function_definition", &[], 0),
        ];

        let ids: Vec<u64> = search_code_snippets(&doc, Some("hello"), Some("function_definition"))
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![4, 1]);

        let by_tag: Vec<u64> = search_code_snippets(&doc, Some("HELLO"), None)
            .iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(by_tag, vec![4, 2, 1]);

        assert_eq!(search_code_snippets(&doc, None, None).len(), 4);
    }

    #[test]
    fn patterns_ordered_by_occurrences() {
        let mut doc = MemoryDocument::default();
        let base = Payload::new().with("file_type", ".py");
        doc.patterns = vec![
            ProjectPattern {
                kind: PatternKind::FileModification,
                payload: base.clone().with("operation", "write"),
                filepath: None,
                timestamp: Utc::now(),
                occurrences: 1,
            },
            ProjectPattern {
                kind: PatternKind::FileOperation,
                payload: base.clone().with("operation", "read"),
                filepath: None,
                timestamp: Utc::now() - Duration::hours(1),
                occurrences: 4,
            },
            ProjectPattern {
                kind: PatternKind::FileOperation,
                payload: Payload::new().with("file_type", ".rs"),
                filepath: None,
                timestamp: Utc::now(),
                occurrences: 9,
            },
        ];

        let hits = relevant_patterns(&doc, &base);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].occurrences, 4);
        assert_eq!(hits[1].occurrences, 1);
    }
}
