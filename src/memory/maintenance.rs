use serde::Serialize;
use std::collections::HashMap;

use crate::config::RetentionConfig;
use crate::memory::types::FileAccessRecord;
use crate::store::document::MemoryDocument;

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    pub file_access_removed: usize,
    pub success_patterns_removed: usize,
    pub snippets_removed: usize,
}

impl PruneResult {
    pub fn total(&self) -> usize {
        self.file_access_removed + self.success_patterns_removed + self.snippets_removed
    }
}

// ── Retention ────────────────────────────────────────────────────────────────

/// Trim the append-only logs of `doc` to the configured horizons.
///
/// Oldest entries go first. A cap of 0 means unlimited. Patterns and
/// preferences are never pruned: patterns are deduplicated on write and
/// preferences hold one record per category.
pub fn enforce_retention(doc: &mut MemoryDocument, retention: &RetentionConfig) -> PruneResult {
    let result = PruneResult {
        file_access_removed: prune_file_access(
            &mut doc.file_access,
            retention.max_records_per_file,
            retention.max_file_access_records,
        ),
        success_patterns_removed: keep_newest(&mut doc.success_patterns, retention.max_success_patterns),
        snippets_removed: keep_newest(&mut doc.snippets, retention.max_snippets),
    };

    if result.total() > 0 {
        tracing::debug!(
            file_access = result.file_access_removed,
            success_patterns = result.success_patterns_removed,
            snippets = result.snippets_removed,
            "retention pruned memory document"
        );
    }
    result
}

/// Apply the per-file horizon, then the global one. `records` is in append
/// (time) order.
fn prune_file_access(
    records: &mut Vec<FileAccessRecord>,
    per_file: usize,
    global: usize,
) -> usize {
    let before = records.len();

    if per_file > 0 {
        // Walk newest → oldest, marking what survives.
        let keep: Vec<bool> = {
            let mut seen: HashMap<&str, usize> = HashMap::new();
            records
                .iter()
                .rev()
                .map(|r| {
                    let count = seen.entry(r.filepath.as_str()).or_insert(0);
                    *count += 1;
                    *count <= per_file
                })
                .collect()
        };
        let mut flags = keep.into_iter().rev();
        records.retain(|_| flags.next().unwrap_or(true));
    }

    keep_newest(records, global);
    before - records.len()
}

fn keep_newest<T>(items: &mut Vec<T>, cap: usize) -> usize {
    if cap == 0 || items.len() <= cap {
        return 0;
    }
    let excess = items.len() - cap;
    items.drain(..excess);
    excess
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::FileOperation;
    use chrono::Utc;

    fn access(path: &str, n: u64) -> FileAccessRecord {
        FileAccessRecord {
            filepath: path.to_string(),
            operation: FileOperation::Read,
            success: true,
            timestamp: Utc::now(),
            content_hash: None,
            size: Some(n),
            error: None,
        }
    }

    #[test]
    fn per_file_horizon_drops_oldest_for_that_file() {
        let mut records = vec![
            access("a", 1),
            access("b", 2),
            access("a", 3),
            access("a", 4),
            access("b", 5),
        ];
        let removed = prune_file_access(&mut records, 2, 0);
        assert_eq!(removed, 1);
        let sizes: Vec<u64> = records.iter().filter_map(|r| r.size).collect();
        assert_eq!(sizes, vec![2, 3, 4, 5]);
    }

    #[test]
    fn global_horizon_keeps_newest() {
        let mut records: Vec<_> = (0..10).map(|i| access("a", i)).collect();
        let removed = prune_file_access(&mut records, 0, 4);
        assert_eq!(removed, 6);
        assert_eq!(records.first().unwrap().size, Some(6));
        assert_eq!(records.last().unwrap().size, Some(9));
    }

    #[test]
    fn zero_caps_mean_unlimited() {
        let mut doc = MemoryDocument::default();
        doc.file_access = (0..50).map(|i| access("a", i)).collect();
        let retention = RetentionConfig {
            max_records_per_file: 0,
            max_file_access_records: 0,
            max_success_patterns: 0,
            max_snippets: 0,
        };
        let result = enforce_retention(&mut doc, &retention);
        assert_eq!(result.total(), 0);
        assert_eq!(doc.file_access.len(), 50);
    }
}
