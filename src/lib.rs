extern crate self as promptloom;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[macro_use]
mod macros;
mod api;
mod engine;
mod error;

pub use api::{
    ComposeDetails, LoadReport, Options, ValidationConfig, compose, compose_document, compose_document_verbose,
    compose_with, load_library, merge_rules, parse, resolve_library, validate, validate_merged,
};
pub use engine::{
    ComposedContext, DocumentGraph, Finding, FindingKind, MergedRuleSet, Override, RenderedSection, Resolution,
    Severity, StageMetrics,
};
pub use error::{ComposeError, Malformation, MergeError, ParseError, PipelineError, ResolveError};

// --- Document model ---------------------------------------------------------

/// Stable, path-like identity of a document. Compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    /// Strip a leading `./` and a trailing `.md`, so `./base-backup.md` and
    /// `base-backup` name the same document.
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        let trimmed = trimmed.strip_suffix(".md").unwrap_or(trimmed);
        DocumentId(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId::new(s)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Rules,
    Template,
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Rules => f.write_str("rules"),
            DocumentKind::Template => f.write_str("template"),
        }
    }
}

/// Rule priority class. Declaration order is precedence order, so
/// `Tier::Must < Tier::Should` sorts the strongest tier first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Must,
    Should,
    Could,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Must, Tier::Should, Tier::Could];

    pub fn section(self) -> SectionKind {
        match self {
            Tier::Must => SectionKind::MustRules,
            Tier::Should => SectionKind::ShouldRules,
            Tier::Could => SectionKind::CouldRules,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Must => f.write_str("Must"),
            Tier::Should => f.write_str("Should"),
            Tier::Could => f.write_str("Could"),
        }
    }
}

/// Section classification. Anything the header table does not recognize is
/// `Freeform`; its name lives in the section's [`Heading`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Role,
    Context,
    Instructions,
    Constraints,
    OutputFormat,
    Principles,
    MustRules,
    ShouldRules,
    CouldRules,
    Patterns,
    References,
    Tldr,
    Freeform,
}

impl SectionKind {
    pub fn tier(self) -> Option<Tier> {
        match self {
            SectionKind::MustRules => Some(Tier::Must),
            SectionKind::ShouldRules => Some(Tier::Should),
            SectionKind::CouldRules => Some(Tier::Could),
            _ => None,
        }
    }

    /// Heading used when the compositor emits this section.
    pub fn title(self) -> &'static str {
        match self {
            SectionKind::Role => "Role",
            SectionKind::Context => "Context",
            SectionKind::Instructions => "Instructions",
            SectionKind::Constraints => "Constraints",
            SectionKind::OutputFormat => "Output Format",
            SectionKind::Principles => "Principles",
            SectionKind::MustRules => "Must Have",
            SectionKind::ShouldRules => "Should Have",
            SectionKind::CouldRules => "Could Have",
            SectionKind::Patterns => "Patterns",
            SectionKind::References => "References",
            SectionKind::Tldr => "TL;DR",
            SectionKind::Freeform => "Notes",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// A heading line as written: `level` counts the leading `#`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub heading: Heading,
    /// Content lines, verbatim, excluding the heading.
    pub lines: Vec<String>,
    /// Rule entries (tier sections only).
    pub rules: Vec<Rule>,
}

impl Section {
    /// Content lines that carry text.
    pub fn content_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str).filter(|l| !l.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.content_lines().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub id: String,
    pub tier: Tier,
    pub text: String,
    pub document: DocumentId,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceTarget {
    Document(DocumentId),
    /// External resource (URL and the like); a leaf that is never expanded.
    External(String),
}

impl fmt::Display for ReferenceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceTarget::Document(id) => write!(f, "{id}"),
            ReferenceTarget::External(uri) => f.write_str(uri),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub source: DocumentId,
    pub target: ReferenceTarget,
    /// Explicitly allowed to stay unresolved.
    pub optional: bool,
}

/// A `{{name}}` / `{{name|default}}` substitution slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    pub default: Option<String>,
    /// 1-based line in the raw document.
    pub line: usize,
}

/// Front-matter metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub kind: Option<DocumentKind>,
    pub budget: Option<usize>,
    pub overrides: Vec<String>,
    pub extra: BTreeMap<String, String>,
    /// The front-matter block as written, delimiters included.
    pub raw: Vec<String>,
}

/// A parsed Rules or Template document. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: DocumentId,
    pub kind: DocumentKind,
    pub metadata: Metadata,
    /// Lines between the front matter and the first heading.
    pub preamble: Vec<String>,
    pub sections: Vec<Section>,
    pub line_count: usize,
    pub references: Vec<Reference>,
    pub placeholders: Vec<Placeholder>,
}

impl Document {
    pub fn sections_of(&self, kind: SectionKind) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(move |s| s.kind == kind)
    }

    pub fn has_section(&self, kind: SectionKind) -> bool {
        self.sections.iter().any(|s| s.kind == kind)
    }

    /// All rules in document order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.sections.iter().flat_map(|s| s.rules.iter())
    }

    pub fn rules_in(&self, tier: Tier) -> impl Iterator<Item = &Rule> {
        self.rules().filter(move |r| r.tier == tier)
    }

    /// Referenced document IDs (external references excluded).
    pub fn referenced_documents(&self) -> impl Iterator<Item = (&DocumentId, bool)> {
        self.references.iter().filter_map(|r| match &r.target {
            ReferenceTarget::Document(id) => Some((id, r.optional)),
            ReferenceTarget::External(_) => None,
        })
    }

    /// Render the document back to its textual form.
    pub fn to_text(&self) -> String {
        engine::serialize::to_text(self)
    }
}

// --- Library snapshot -------------------------------------------------------

/// Immutable snapshot of every loaded document, keyed by ID.
///
/// Reloading builds a new `Library`; documents are shared via `Arc` so
/// snapshots are cheap to clone and safe to hand across threads.
#[derive(Debug, Clone, Default)]
pub struct Library {
    documents: BTreeMap<DocumentId, Arc<Document>>,
}

impl Library {
    pub fn new(documents: impl IntoIterator<Item = Document>) -> Self {
        let documents = documents.into_iter().map(|d| (d.id.clone(), Arc::new(d))).collect();
        Library { documents }
    }

    /// Return a new snapshot with `document` added (or replacing the one
    /// with the same ID).
    pub fn with(&self, document: Document) -> Self {
        let mut documents = self.documents.clone();
        documents.insert(document.id.clone(), Arc::new(document));
        Library { documents }
    }

    pub fn get(&self, id: &DocumentId) -> Option<&Arc<Document>> {
        self.documents.get(id)
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.documents.contains_key(id)
    }

    /// Documents in ID order.
    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_ids_normalize_paths() {
        assert_eq!(DocumentId::normalize("./base-backup.md"), DocumentId::new("base-backup"));
        assert_eq!(DocumentId::normalize(" rules/db.md "), DocumentId::new("rules/db"));
        assert_eq!(DocumentId::normalize("plain"), DocumentId::new("plain"));
    }

    #[test]
    fn tiers_sort_by_precedence() {
        let mut tiers = vec![Tier::Could, Tier::Must, Tier::Should];
        tiers.sort();
        assert_eq!(tiers, Tier::ALL.to_vec());
        assert_eq!(Tier::Should.section(), SectionKind::ShouldRules);
        assert_eq!(SectionKind::CouldRules.tier(), Some(Tier::Could));
        assert_eq!(SectionKind::Role.tier(), None);
    }

    #[test]
    fn library_snapshots_are_independent() {
        let first = Library::default();
        let doc = parse("## Must Have\n- R-1: keep it\n", "a").unwrap();
        let second = first.with(doc);

        assert!(first.is_empty());
        assert_eq!(second.len(), 1);
        assert!(second.contains(&DocumentId::new("a")));
    }

    #[test]
    fn document_accessors() {
        let doc = parse("## Must\n- M-1: a\n## Could\n- C-1: b\n- C-2: c\n## References\n- ./other.md\n", "d").unwrap();

        assert!(doc.has_section(SectionKind::CouldRules));
        assert!(!doc.has_section(SectionKind::ShouldRules));
        assert_eq!(doc.rules_in(Tier::Could).map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["C-1", "C-2"]);
        assert_eq!(doc.referenced_documents().collect::<Vec<_>>(), vec![(&DocumentId::new("other"), false)]);
    }
}
