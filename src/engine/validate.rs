//! Structural and budget validation.
//!
//! Validation classifies, it never mutates. It runs twice per composition:
//!
//! - after parsing (`document`): required sections, duplicate rule IDs, empty
//!   sections and the per-document line budget;
//! - after merging (`merged`): the line budget of every source document again,
//!   plus the optional budget of the merged rule set as a whole.
//!
//! `Severity::Error` findings block composition; warnings are reported and
//! otherwise ignored.

use super::headers::SectionSet;
use super::merge::MergedRuleSet;
use crate::{Document, DocumentId, DocumentKind, Library, SectionKind, ValidationConfig};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingKind {
    MissingSection(SectionKind),
    DuplicateRuleId(String),
    EmptySection(SectionKind),
    BudgetExceeded { limit: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub document: DocumentId,
    pub severity: Severity,
    pub kind: FindingKind,
}

impl Finding {
    fn error(document: &DocumentId, kind: FindingKind) -> Self {
        Finding { document: document.clone(), severity: Severity::Error, kind }
    }

    fn warning(document: &DocumentId, kind: FindingKind) -> Self {
        Finding { document: document.clone(), severity: Severity::Warning, kind }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] ", self.severity, self.document)?;
        match &self.kind {
            FindingKind::MissingSection(kind) => write!(f, "missing section `{kind}`"),
            FindingKind::DuplicateRuleId(id) => write!(f, "rule `{id}` declared more than once"),
            FindingKind::EmptySection(kind) => write!(f, "section `{kind}` has no content"),
            FindingKind::BudgetExceeded { limit, actual } => write!(f, "{actual} lines, over the budget of {limit}"),
        }
    }
}

/// Sections whose emptiness blocks composition.
fn empty_is_error(kind: SectionKind) -> bool {
    matches!(kind, SectionKind::Instructions | SectionKind::MustRules)
}

/// Structural and budget pass over one document.
pub(crate) fn document(doc: &Document, config: &ValidationConfig) -> Vec<Finding> {
    let mut findings = Vec::new();
    let present = SectionSet::collect(doc.sections.iter().map(|s| &s.kind));

    let mut checked: Vec<SectionKind> = Vec::new();
    match doc.kind {
        DocumentKind::Rules => {
            if !present.intersects(SectionSet::TIERS) {
                findings.push(Finding::error(&doc.id, FindingKind::MissingSection(SectionKind::MustRules)));
            }
        }
        DocumentKind::Template => {
            for kind in SectionSet::TEMPLATE_ORDER {
                if present.contains(SectionSet::of(kind)) {
                    checked.push(kind);
                } else {
                    findings.push(Finding::error(&doc.id, FindingKind::MissingSection(kind)));
                }
            }
        }
    }
    checked.extend(
        [SectionKind::MustRules, SectionKind::ShouldRules, SectionKind::CouldRules]
            .into_iter()
            .filter(|k| present.contains(SectionSet::of(*k))),
    );

    for kind in checked {
        if doc.sections_of(kind).all(|s| s.is_empty()) {
            let finding = FindingKind::EmptySection(kind);
            findings.push(if empty_is_error(kind) {
                Finding::error(&doc.id, finding)
            } else {
                Finding::warning(&doc.id, finding)
            });
        }
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut duplicates: Vec<&str> = Vec::new();
    for rule in doc.rules() {
        let count = counts.entry(rule.id.as_str()).or_default();
        *count += 1;
        if *count == 2 {
            duplicates.push(rule.id.as_str());
        }
    }
    findings.extend(duplicates.into_iter().map(|id| Finding::error(&doc.id, FindingKind::DuplicateRuleId(id.into()))));

    findings.extend(budget(doc, config));
    findings
}

/// Line budget of one document: a hard ceiling for Rules documents, a soft
/// limit for Templates.
fn budget(doc: &Document, config: &ValidationConfig) -> Option<Finding> {
    match doc.kind {
        DocumentKind::Rules => {
            let limit = doc.metadata.budget.unwrap_or(config.rules_line_budget);
            (doc.line_count > limit)
                .then(|| Finding::error(&doc.id, FindingKind::BudgetExceeded { limit, actual: doc.line_count }))
        }
        DocumentKind::Template => {
            let limit = doc.metadata.budget.or(config.template_soft_limit)?;
            (doc.line_count > limit)
                .then(|| Finding::warning(&doc.id, FindingKind::BudgetExceeded { limit, actual: doc.line_count }))
        }
    }
}

/// Budget pass after merging.
pub(crate) fn merged(set: &MergedRuleSet, library: &Library, config: &ValidationConfig) -> Vec<Finding> {
    let mut findings: Vec<Finding> =
        set.sources.iter().filter_map(|id| library.get(id)).filter_map(|doc| budget(doc, config)).collect();

    if let Some(limit) = config.merged_line_budget {
        let actual = set.len() + set.principles.len() + set.patterns.len();
        if actual > limit {
            findings.push(Finding::error(&set.root, FindingKind::BudgetExceeded { limit, actual }));
        }
    }

    findings
}
