use crate::{
    ComposeError, DocumentId, Library, MergeError, Options, PipelineError, ResolveError, Tier, compose_document,
    load_library, merge_rules, parse, resolve_library,
};
use proptest::prelude::*;
use std::collections::HashMap;

fn library(docs: &[(&str, &str)]) -> Library {
    let report = load_library(docs.iter().map(|(id, raw)| (id.to_string(), raw.to_string())));
    assert!(report.is_clean(), "fixture failed to parse: {:?}", report.failures);
    report.library
}

fn ids(names: &[&str]) -> Vec<DocumentId> {
    names.iter().map(|n| DocumentId::new(*n)).collect()
}

fn template(references: &[&str], extra: &str) -> String {
    let refs: String = references.iter().map(|r| format!("- {r}\n")).collect();
    format!(
        "---\nkind: template\n---\n## Role\nOperator.\n## Context\nProduction.\n{extra}## Instructions\nFollow the rules.\n## Output Format\nPlain text.\n## References\n{refs}"
    )
}

const BASE_BACKUP: &str = "\
## Must Have
- RULE-001: Keep daily backups for 7 days.
- RULE-002: Encrypt backups at rest.
## Should Have
- RULE-003: Test restores monthly.
";

const REPO_ROOT: &str = "\
---
overrides: RULE-001
---
## Must Have
- RULE-001: Keep daily backups for 30 days.
## References
- [base](./base-backup.md)
";

#[test]
fn repo_root_overrides_base_backup() {
    let lib = library(&[("base-backup", BASE_BACKUP), ("repo-root", REPO_ROOT)]);
    let merged = merge_rules(&DocumentId::new("repo-root"), &resolve_library(&lib)).unwrap();

    let must: Vec<(&str, &str, &str)> =
        merged.must.iter().map(|r| (r.id.as_str(), r.text.as_str(), r.document.as_str())).collect();
    assert_eq!(
        must,
        vec![
            ("RULE-001", "Keep daily backups for 30 days.", "repo-root"),
            ("RULE-002", "Encrypt backups at rest.", "base-backup"),
        ]
    );
    assert_eq!(merged.should.len(), 1);
    assert_eq!(merged.overrides.len(), 1);
    assert!(merged.overrides[0].declared);
    assert_eq!(merged.overrides[0].replaced, DocumentId::new("base-backup"));
}

#[test]
fn unrelated_siblings_conflict() {
    let lib = library(&[
        ("a", "## Must\n- RULE-010: Use tabs.\n"),
        ("b", "## Must\n- RULE-010: Use spaces.\n"),
        ("root", "## Could\n- C-1: x\n## References\n- a\n- b\n"),
    ]);
    assert_eq!(
        merge_rules(&DocumentId::new("root"), &resolve_library(&lib)),
        Err(MergeError::ConflictingRules { rule_id: "RULE-010".into(), tier: Tier::Must, documents: ids(&["a", "b"]) })
    );
}

#[test]
fn cycles_and_dangling_references() {
    // (documents, expected errors)
    let cases: Vec<(Vec<(&str, &str)>, Vec<ResolveError>)> = vec![
        (
            vec![("x", "## Must\n- R-1: x\n## References\n- y\n"), ("y", "## Must\n- R-2: y\n## References\n- x\n")],
            vec![ResolveError::CircularReference { path: ids(&["x", "y"]) }],
        ),
        (
            vec![("solo", "## Must\n- R-1: x\n## References\n- solo\n")],
            vec![ResolveError::CircularReference { path: ids(&["solo"]) }],
        ),
        (
            vec![("a", "## Must\n- R-1: x\n## References\n- ghost\n- spirit (optional)\n")],
            vec![ResolveError::UnresolvedReference { document: DocumentId::new("a"), target: DocumentId::new("ghost") }],
        ),
        (vec![("a", "## Must\n- R-1: x\n## References\n- https://example.com/guide\n")], vec![]),
    ];

    for (docs, expected) in cases {
        let res = resolve_library(&library(&docs));
        assert_eq!(res.errors, expected, "documents: {docs:?}");
    }
}

#[test]
fn cycle_blocks_composition_of_dependents() {
    let tpl = template(&["x"], "");
    let lib = library(&[
        ("x", "## Must\n- R-1: x\n## References\n- y\n"),
        ("y", "## Must\n- R-2: y\n## References\n- x\n"),
        ("t", tpl.as_str()),
    ]);
    let err = compose_document(&lib, &DocumentId::new("t"), &HashMap::new(), &Options::default()).unwrap_err();
    let PipelineError::Merge(MergeError::BrokenSubgraph { root, errors }) = err else {
        panic!("expected a broken subgraph, got {err:?}");
    };
    assert_eq!(root, DocumentId::new("t"));
    assert_eq!(errors, vec![ResolveError::CircularReference { path: ids(&["x", "y"]) }]);
}

#[test]
fn placeholder_without_binding_fails() {
    let tpl = template(&["base-backup"], "Environment: {{env}}\n");
    let lib = library(&[("base-backup", BASE_BACKUP), ("t", tpl.as_str())]);
    let err = compose_document(&lib, &DocumentId::new("t"), &HashMap::new(), &Options::default()).unwrap_err();
    assert_eq!(err, PipelineError::Compose(ComposeError::UnresolvedPlaceholder("env".into())));

    let vars = HashMap::from([("env".to_string(), "staging".to_string())]);
    let out = compose_document(&lib, &DocumentId::new("t"), &vars, &Options::default()).unwrap();
    assert!(out.text.contains("Environment: staging"));
}

#[test]
fn end_to_end_composition() {
    let tpl = template(&["repo-root"], "");
    let lib = library(&[("base-backup", BASE_BACKUP), ("repo-root", REPO_ROOT), ("t", tpl.as_str())]);
    let out = compose_document(&lib, &DocumentId::new("t"), &HashMap::new(), &Options::default()).unwrap();

    assert_eq!(
        out.text,
        "## Role\nOperator.\n\n\
         ## Context\nProduction.\n\n\
         ## Instructions\nFollow the rules.\n\n\
         ## Must Have\n- RULE-001: Keep daily backups for 30 days.\n- RULE-002: Encrypt backups at rest.\n\n\
         ## Should Have\n- RULE-003: Test restores monthly.\n\n\
         ## Output Format\nPlain text.\n"
    );
    assert_eq!(out.sources, ids(&["t", "base-backup", "repo-root"]));
}

#[test]
fn round_trip_through_text() {
    for raw in [BASE_BACKUP, REPO_ROOT] {
        let doc = parse(raw, "doc").unwrap();
        assert_eq!(parse(&doc.to_text(), "doc").unwrap(), doc);
    }
}

/// Rules for a sibling document: `count` entries with a shared prefix.
fn sibling(prefix: &str, count: usize) -> String {
    let mut raw = String::from("## Must\n");
    for i in 0..count {
        raw.push_str(&format!("- {prefix}-{i}: rule {i} from {prefix}\n"));
    }
    raw
}

proptest! {
    #[test]
    fn merge_is_commutative_across_siblings(
        left in 1usize..6,
        right in 1usize..6,
        shared in 0usize..3,
        chained in any::<bool>(),
        base_first in any::<bool>(),
    ) {
        // With `chained`, one sibling overrides a stale copy of the shared IDs
        // from its own base. The base name sorts before or after both siblings.
        let base_id = if base_first { "a0" } else { "zz" };
        let stale: String = (0..shared).map(|i| format!("- S-{i}: stale {i}\n")).collect();
        let base = format!("## Must\n- Z-0: base only\n{stale}");
        let shared_rules: String = (0..shared).map(|i| format!("- S-{i}: shared {i}\n")).collect();
        let chain = if chained { format!("## References\n- {base_id}\n") } else { String::new() };
        let a = format!("{}{shared_rules}{chain}", sibling("A", left));
        let b = format!("{}{shared_rules}", sibling("B", right));
        let root = "## Could\n- C-1: x\n## References\n- p\n- q\n";

        let forward = library(&[("p", a.as_str()), ("q", b.as_str()), (base_id, base.as_str()), ("root", root)]);
        let swapped = library(&[("p", b.as_str()), ("q", a.as_str()), (base_id, base.as_str()), ("root", root)]);

        let rules = |lib: &Library| {
            let merged = merge_rules(&DocumentId::new("root"), &resolve_library(lib)).unwrap();
            let mut rules: Vec<(String, String)> = merged.must.iter().map(|r| (r.id.clone(), r.text.clone())).collect();
            rules.sort();
            rules
        };
        let expected = rules(&forward);
        prop_assert!(expected.iter().all(|(_, text)| !text.starts_with("stale")));
        prop_assert_eq!(expected, rules(&swapped));
    }

    #[test]
    fn budget_below_length_always_fails(slack in 1usize..50) {
        let tpl = template(&["base-backup"], "");
        let lib = library(&[("base-backup", BASE_BACKUP), ("t", tpl.as_str())]);
        let id = DocumentId::new("t");
        let full = compose_document(&lib, &id, &HashMap::new(), &Options::default()).unwrap();

        let limit = full.char_count.saturating_sub(slack);
        let options = Options { max_chars: Some(limit), ..Options::default() };
        prop_assert_eq!(
            compose_document(&lib, &id, &HashMap::new(), &options),
            Err(PipelineError::Compose(ComposeError::BudgetExceeded { limit, actual: full.char_count }))
        );
    }
}
