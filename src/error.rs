//! Error taxonomy.
//!
//! Every stage has its own error enum so callers can tell which stage a
//! failure came from. None of them is fatal at the process level; the caller
//! decides whether a batch halts or continues.

use crate::engine::Finding;
use crate::{DocumentId, DocumentKind, SectionKind, Tier};
use thiserror::Error;

/// What made a document unparseable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Malformation {
    #[error("required section `{0}` is missing")]
    MissingSection(SectionKind),
    #[error("no Must, Should or Could section")]
    MissingTierSections,
    #[error("line {line}: rule entry lacks an `ID: description` pair")]
    UnparseableRule { line: usize },
    #[error("line {line}: placeholder opened but never closed")]
    UnterminatedPlaceholder { line: usize },
    #[error("line {line}: invalid placeholder `{token}`")]
    InvalidPlaceholder { line: usize, token: String },
    #[error("front matter is never closed")]
    UnterminatedFrontMatter,
    #[error("line {line}: code fence is never closed")]
    UnterminatedCodeFence { line: usize },
    #[error("front matter `{key}` has invalid value `{value}`")]
    InvalidMetadata { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed document `{document}`: {problem}")]
    Malformed { document: DocumentId, problem: Malformation },
    #[error("document `{document}` declares rule `{rule_id}` twice (line {line})")]
    DuplicateRuleId { document: DocumentId, rule_id: String, line: usize },
}

impl ParseError {
    pub fn document(&self) -> &DocumentId {
        match self {
            ParseError::Malformed { document, .. } | ParseError::DuplicateRuleId { document, .. } => document,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("circular reference: {}", join_path(.path))]
    CircularReference { path: Vec<DocumentId> },
    #[error("`{document}` references unknown document `{target}`")]
    UnresolvedReference { document: DocumentId, target: DocumentId },
}

impl ResolveError {
    /// Documents whose subgraph this error breaks.
    pub fn documents(&self) -> Vec<&DocumentId> {
        match self {
            ResolveError::CircularReference { path } => path.iter().collect(),
            ResolveError::UnresolvedReference { document, .. } => vec![document],
        }
    }
}

fn join_path(path: &[DocumentId]) -> String {
    let mut parts: Vec<&str> = path.iter().map(DocumentId::as_str).collect();
    if let Some(first) = path.first() {
        parts.push(first.as_str());
    }
    parts.join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("unknown document `{0}`")]
    UnknownDocument(DocumentId),
    #[error("cannot merge `{root}`: {} reference problem(s) in its subgraph", .errors.len())]
    BrokenSubgraph { root: DocumentId, errors: Vec<ResolveError> },
    #[error(
        "conflicting {tier} rule `{rule_id}` declared by unrelated documents {}",
        .documents.iter().map(|d| format!("`{d}`")).collect::<Vec<_>>().join(" and ")
    )]
    ConflictingRules { rule_id: String, tier: Tier, documents: Vec<DocumentId> },
    #[error("`{document}` declares an override of `{rule_id}`, which none of its references define")]
    UnknownOverride { document: DocumentId, rule_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("`{document}` is a {kind} document, not a template")]
    NotATemplate { document: DocumentId, kind: DocumentKind },
    #[error("placeholder `{0}` has no value and no default")]
    UnresolvedPlaceholder(String),
    #[error("rendered output is {actual} characters, over the budget of {limit}")]
    BudgetExceeded { limit: usize, actual: usize },
}

/// Failure of a whole composition request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("unknown document `{0}`")]
    UnknownDocument(DocumentId),
    #[error("validation failed with {} error(s)", .0.len())]
    ValidationFailed(Vec<Finding>),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Compose(#[from] ComposeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circular_reference_display_closes_the_loop() {
        let err = ResolveError::CircularReference { path: vec![DocumentId::new("x"), DocumentId::new("y")] };
        assert_eq!(err.to_string(), "circular reference: x -> y -> x");
    }

    #[test]
    fn conflict_names_both_documents() {
        let err = MergeError::ConflictingRules {
            rule_id: "RULE-010".into(),
            tier: Tier::Must,
            documents: vec![DocumentId::new("a"), DocumentId::new("b")],
        };
        assert_eq!(
            err.to_string(),
            "conflicting Must rule `RULE-010` declared by unrelated documents `a` and `b`"
        );
    }

    #[test]
    fn malformed_display_includes_problem() {
        let err = ParseError::Malformed {
            document: DocumentId::new("t"),
            problem: Malformation::MissingSection(SectionKind::OutputFormat),
        };
        assert_eq!(err.to_string(), "malformed document `t`: required section `Output Format` is missing");
        assert_eq!(err.document().as_str(), "t");
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ParseError>();
        assert_send_sync::<PipelineError>();
    }
}
