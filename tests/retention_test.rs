mod helpers;

use cairn::config::{CairnConfig, RetentionConfig};
use cairn::FileOperation;
use helpers::{open_with, project};
use serde_json::json;

fn tight_retention() -> CairnConfig {
    CairnConfig {
        retention: RetentionConfig {
            max_records_per_file: 4,
            max_file_access_records: 10,
            max_success_patterns: 3,
            max_snippets: 2,
        },
        ..Default::default()
    }
}

#[test]
fn access_history_stays_within_horizons() {
    let tmp = project();
    let mut mm = open_with(tmp.path(), tight_retention());

    for i in 0..40 {
        let file = format!("f{}.rs", i % 5);
        mm.record_file_operation(&file, FileOperation::Read, true, None, None);
    }

    let doc = mm.persistent().document();
    assert!(doc.file_access.len() <= 10);
    for i in 0..5 {
        let file = format!("f{i}.rs");
        assert!(doc.file_access.iter().filter(|r| r.filepath == file).count() <= 4);
    }
    // The newest access always survives.
    assert_eq!(doc.file_access.last().unwrap().filepath, "f4.rs");
}

#[test]
fn success_patterns_and_snippets_keep_newest() {
    let tmp = project();
    let mut mm = open_with(tmp.path(), tight_retention());

    for i in 0..6 {
        mm.record_success_pattern(&format!("fix{i}"), json!({"step": i}), 0.5, None);
        mm.store_code_snippet(&format!("snippet {i}"), "note", None, &[], None);
    }

    let labels: Vec<&str> = mm
        .persistent()
        .success_patterns()
        .iter()
        .map(|p| p.label.as_str())
        .collect();
    assert_eq!(labels, vec!["fix3", "fix4", "fix5"]);

    let snippets = mm.search_code_snippets(None, None);
    assert_eq!(snippets.len(), 2);
    // Ids keep counting even though old snippets were pruned.
    assert_eq!(snippets[0].id, 6);
}

#[test]
fn preferences_and_patterns_are_not_pruned() {
    let tmp = project();
    let mut mm = open_with(tmp.path(), tight_retention());

    for i in 0..20 {
        mm.record_user_preference(&format!("pref{i}"), json!({"value": i}));
        mm.record_project_pattern(
            cairn::PatternKind::Other("naming".into()),
            json!({"prefix": format!("p{i}")}),
            None,
        );
    }

    let summary = mm.get_memory_summary();
    assert_eq!(summary.preferences, 20);
    assert_eq!(summary.patterns, 20);
}
