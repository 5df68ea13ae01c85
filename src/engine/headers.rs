//! Section header recognition.
//!
//! Documents have no rigid grammar: the set of recognized headings *is* the
//! schema. A heading line is classified by normalizing its text and looking it
//! up in a fixed table; the lookup is exact (after normalization) and
//! case-insensitive.
//!
//! Normalization:
//!
//! ```text
//! "  **Must Have**:  " ──trim──▶ "**Must Have**:" ──strip `:`/`*`/`_`──▶
//! "Must Have" ──collapse whitespace + lowercase──▶ "must have" ──▶ MustRules
//! ```
//!
//! `SectionSet` is a compact presence mask used by the parser and validator to
//! check required structure without scanning section lists repeatedly.

use crate::{Heading, SectionKind};

bitflags::bitflags! {
    /// Which known section kinds a document contains.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionSet: u16 {
        const ROLE          = 1 << 0;
        const CONTEXT       = 1 << 1;
        const INSTRUCTIONS  = 1 << 2;
        const CONSTRAINTS   = 1 << 3;
        const OUTPUT_FORMAT = 1 << 4;
        const PRINCIPLES    = 1 << 5;
        const MUST          = 1 << 6;
        const SHOULD        = 1 << 7;
        const COULD         = 1 << 8;
        const PATTERNS      = 1 << 9;
        const REFERENCES    = 1 << 10;
        const TLDR          = 1 << 11;

        const TIERS = Self::MUST.bits() | Self::SHOULD.bits() | Self::COULD.bits();
        const TEMPLATE_REQUIRED = Self::ROLE.bits()
            | Self::CONTEXT.bits()
            | Self::INSTRUCTIONS.bits()
            | Self::OUTPUT_FORMAT.bits();
    }
}

impl SectionSet {
    pub fn of(kind: SectionKind) -> SectionSet {
        match kind {
            SectionKind::Role => SectionSet::ROLE,
            SectionKind::Context => SectionSet::CONTEXT,
            SectionKind::Instructions => SectionSet::INSTRUCTIONS,
            SectionKind::Constraints => SectionSet::CONSTRAINTS,
            SectionKind::OutputFormat => SectionSet::OUTPUT_FORMAT,
            SectionKind::Principles => SectionSet::PRINCIPLES,
            SectionKind::MustRules => SectionSet::MUST,
            SectionKind::ShouldRules => SectionSet::SHOULD,
            SectionKind::CouldRules => SectionSet::COULD,
            SectionKind::Patterns => SectionSet::PATTERNS,
            SectionKind::References => SectionSet::REFERENCES,
            SectionKind::Tldr => SectionSet::TLDR,
            SectionKind::Freeform => SectionSet::empty(),
        }
    }

    pub fn collect<'a>(kinds: impl IntoIterator<Item = &'a SectionKind>) -> SectionSet {
        kinds.into_iter().fold(SectionSet::empty(), |acc, kind| acc | SectionSet::of(*kind))
    }

    /// Required template sections in rendering order.
    pub const TEMPLATE_ORDER: [SectionKind; 4] =
        [SectionKind::Role, SectionKind::Context, SectionKind::Instructions, SectionKind::OutputFormat];
}

/// Known heading spellings, already normalized.
const KNOWN: &[(&str, SectionKind)] = &[
    ("role", SectionKind::Role),
    ("context", SectionKind::Context),
    ("instructions", SectionKind::Instructions),
    ("constraints", SectionKind::Constraints),
    ("output format", SectionKind::OutputFormat),
    ("principles", SectionKind::Principles),
    ("must", SectionKind::MustRules),
    ("must have", SectionKind::MustRules),
    ("must rules", SectionKind::MustRules),
    ("should", SectionKind::ShouldRules),
    ("should have", SectionKind::ShouldRules),
    ("should rules", SectionKind::ShouldRules),
    ("could", SectionKind::CouldRules),
    ("could have", SectionKind::CouldRules),
    ("could rules", SectionKind::CouldRules),
    ("patterns", SectionKind::Patterns),
    ("references", SectionKind::References),
    ("tl;dr", SectionKind::Tldr),
    ("tldr", SectionKind::Tldr),
];

/// Parse a heading line (`## Text`). Returns `None` for non-heading lines.
///
/// At most six `#`s, followed by whitespace and non-empty text. A closing
/// `#` run is dropped only when whitespace separates it from the text, so
/// `## C#` keeps its hash.
pub(crate) fn parse_heading(line: &str) -> Option<Heading> {
    let caps = regex!(r"^(#{1,6})\s+(.*?)(?:\s+#+)?\s*$").captures(line)?;
    let text = caps.get(2)?.as_str();
    if text.is_empty() {
        return None;
    }
    Some(Heading { level: caps[1].len() as u8, text: text.to_string() })
}

/// Code-fence state across consecutive lines of one section or document.
#[derive(Debug, Default)]
pub(crate) struct Fences {
    /// Marker of the open fence and the line it opened on.
    open: Option<(&'static str, usize)>,
}

impl Fences {
    /// Feed the next line. Returns `true` for fence delimiters and the lines
    /// between them.
    pub(crate) fn observe(&mut self, line: &str, number: usize) -> bool {
        let trimmed = line.trim_start();
        match self.open {
            Some((marker, _)) => {
                if trimmed.starts_with(marker) {
                    self.open = None;
                }
                true
            }
            None => match ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(m)) {
                Some(marker) => {
                    self.open = Some((marker, number));
                    true
                }
                None => false,
            },
        }
    }

    /// Line the still-open fence started on.
    pub(crate) fn open_since(&self) -> Option<usize> {
        self.open.map(|(_, line)| line)
    }
}

/// Lowercased, whitespace-collapsed heading text without emphasis markers or a
/// trailing colon.
pub(crate) fn normalize(text: &str) -> String {
    let stripped = text.trim().trim_end_matches(':').trim_matches(|c| c == '*' || c == '_').trim_end_matches(':');
    stripped.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Classify heading text; unknown text is `Freeform`.
pub(crate) fn classify(text: &str) -> SectionKind {
    let key = normalize(text);
    KNOWN.iter().find(|(name, _)| *name == key).map(|(_, kind)| *kind).unwrap_or(SectionKind::Freeform)
}
