//! Document parser.
//!
//! Turns raw text into a typed [`Document`] in a single deterministic pass:
//!
//! ```text
//! (0) front matter        -> Metadata (kind, budget, overrides, extra)
//! (1) partition lines     -> preamble + Sections, split at recognized headings
//!                            (headings inside code fences are content)
//! (2) placeholder scan    -> Template body lines outside code fences;
//!                            unterminated tokens are fatal
//! (3) per-section pass    -> Rules in tier sections, References in the
//!                            References section
//! (4) required structure  -> per-kind required sections
//! ```
//!
//! The parser is permissive about *extra* structure (unknown headings become
//! `Freeform`, unknown front-matter keys are kept in `Metadata::extra`) and
//! strict about *required* structure and internal consistency (duplicate rule
//! IDs, unterminated placeholders, rule bullets without an ID).
//!
//! ## Nesting
//!
//! A recognized heading opens a section at any level, so `### Must Have` under
//! an unrecognized `## Rules` heading becomes its own tier section. An
//! unrecognized heading deeper than the current section's heading stays inside
//! that section as content:
//!
//! ```text
//! ## Instructions          -> Instructions
//! ### Step one             -> content of Instructions
//! ## Appendix              -> Freeform
//! ```

use super::headers::{Fences, SectionSet, classify, parse_heading};
use super::placeholder::{self, ScanError};
use crate::{
    Document, DocumentId, DocumentKind, Heading, Malformation, Metadata, ParseError, Placeholder, Reference,
    ReferenceTarget, Rule, Section, SectionKind, Tier,
};
use std::collections::HashMap;

/// A section while lines are still being partitioned.
struct PendingSection {
    kind: SectionKind,
    heading: Heading,
    lines: Vec<PendingLine>,
}

struct PendingLine {
    /// 1-based source line number.
    number: usize,
    text: String,
    /// Inside a code fence or one of its delimiters.
    fenced: bool,
}

/// Classification of one line inside a tier section.
#[derive(Debug, PartialEq, Eq)]
enum RuleLine<'a> {
    Rule { id: &'a str, text: &'a str },
    Malformed,
    Content,
}

struct DocumentParser<'a> {
    id: DocumentId,
    lines: Vec<&'a str>,
}

impl<'a> DocumentParser<'a> {
    fn new(raw: &'a str, id: DocumentId) -> Self {
        DocumentParser { id, lines: raw.lines().collect() }
    }

    fn malformed(&self, problem: Malformation) -> ParseError {
        ParseError::Malformed { document: self.id.clone(), problem }
    }

    /// Parse the front-matter block, if any. Returns the metadata and the index
    /// of the first body line.
    fn front_matter(&self) -> Result<(Metadata, usize), ParseError> {
        let mut metadata = Metadata::default();
        if self.lines.first().map(|l| l.trim()) != Some("---") {
            return Ok((metadata, 0));
        }

        let close = self
            .lines
            .iter()
            .skip(1)
            .position(|l| l.trim() == "---")
            .map(|p| p + 1)
            .ok_or_else(|| self.malformed(Malformation::UnterminatedFrontMatter))?;

        for line in &self.lines[1..close] {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(self.malformed(Malformation::InvalidMetadata { key: line.to_string(), value: String::new() }));
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();
            let invalid = || self.malformed(Malformation::InvalidMetadata { key: key.clone(), value: value.to_string() });

            match key.as_str() {
                "kind" => {
                    metadata.kind = Some(match value.to_lowercase().as_str() {
                        "rules" => DocumentKind::Rules,
                        "template" => DocumentKind::Template,
                        _ => return Err(invalid()),
                    })
                }
                "budget" => metadata.budget = Some(value.parse().map_err(|_| invalid())?),
                "overrides" => {
                    metadata.overrides =
                        value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
                }
                _ => {
                    metadata.extra.insert(key.clone(), value.to_string());
                }
            }
        }

        metadata.raw = self.lines[..=close].iter().map(|l| l.to_string()).collect();
        Ok((metadata, close + 1))
    }

    /// Partition body lines into the preamble and sections.
    fn partition(&self, body_start: usize) -> Result<(Vec<PendingLine>, Vec<PendingSection>), ParseError> {
        let mut preamble = Vec::new();
        let mut sections: Vec<PendingSection> = Vec::new();
        let mut fences = Fences::default();

        for (idx, line) in self.lines.iter().enumerate().skip(body_start) {
            let line_no = idx + 1;
            let fenced = fences.observe(line, line_no);

            let opens_section = parse_heading(line).filter(|_| !fenced).and_then(|heading| {
                let kind = classify(&heading.text);
                let nested = matches!(sections.last(), Some(current) if heading.level > current.heading.level);
                (kind != SectionKind::Freeform || !nested).then(|| PendingSection { kind, heading, lines: Vec::new() })
            });

            if let Some(section) = opens_section {
                sections.push(section);
            } else if let Some(current) = sections.last_mut() {
                current.lines.push(PendingLine { number: line_no, text: line.to_string(), fenced });
            } else {
                preamble.push(PendingLine { number: line_no, text: line.to_string(), fenced });
            }
        }

        if let Some(line) = fences.open_since() {
            return Err(self.malformed(Malformation::UnterminatedCodeFence { line }));
        }

        Ok((preamble, sections))
    }

    /// Placeholders on unfenced lines, in line order.
    fn placeholders<'l>(&self, lines: impl Iterator<Item = &'l PendingLine>) -> Result<Vec<Placeholder>, ParseError> {
        let mut placeholders = Vec::new();
        for line in lines.filter(|l| !l.fenced) {
            for token in placeholder::scan(&line.text).map_err(|err| self.scan_error(err, line.number))? {
                placeholders.push(Placeholder {
                    name: token.name.to_string(),
                    default: token.default.map(str::to_string),
                    line: line.number,
                });
            }
        }
        Ok(placeholders)
    }

    fn scan_error(&self, err: ScanError, line: usize) -> ParseError {
        match err {
            ScanError::Unterminated => self.malformed(Malformation::UnterminatedPlaceholder { line }),
            ScanError::InvalidName(token) => self.malformed(Malformation::InvalidPlaceholder { line, token }),
        }
    }

    fn run(self) -> Result<Document, ParseError> {
        let (metadata, body_start) = self.front_matter()?;
        let (preamble, pending) = self.partition(body_start)?;

        let present = SectionSet::collect(pending.iter().map(|s| &s.kind));
        let kind = metadata.kind.unwrap_or(if present.intersects(SectionSet::TIERS) {
            DocumentKind::Rules
        } else {
            DocumentKind::Template
        });

        // Rules documents are never substituted, so their braces are plain text.
        let placeholders = match kind {
            DocumentKind::Template => {
                self.placeholders(preamble.iter().chain(pending.iter().flat_map(|s| s.lines.iter())))?
            }
            DocumentKind::Rules => Vec::new(),
        };

        let mut seen_rules: HashMap<String, usize> = HashMap::new();
        let mut references = Vec::new();
        let mut sections = Vec::with_capacity(pending.len());

        for section in pending {
            let mut rules = Vec::new();

            if let Some(tier) = section.kind.tier() {
                for PendingLine { number: line_no, text: line, .. } in section.lines.iter().filter(|l| !l.fenced) {
                    match classify_rule_line(line) {
                        RuleLine::Rule { id, text } => {
                            if seen_rules.insert(id.to_string(), *line_no).is_some() {
                                return Err(ParseError::DuplicateRuleId {
                                    document: self.id.clone(),
                                    rule_id: id.to_string(),
                                    line: *line_no,
                                });
                            }
                            rules.push(Rule {
                                id: id.to_string(),
                                tier,
                                text: text.to_string(),
                                document: self.id.clone(),
                            });
                        }
                        RuleLine::Malformed => {
                            return Err(self.malformed(Malformation::UnparseableRule { line: *line_no }));
                        }
                        RuleLine::Content => {}
                    }
                }
            } else if section.kind == SectionKind::References {
                references.extend(
                    section.lines.iter().filter(|l| !l.fenced).filter_map(|l| parse_reference(&l.text, &self.id)),
                );
            }

            sections.push(Section {
                kind: section.kind,
                heading: section.heading,
                lines: section.lines.into_iter().map(|l| l.text).collect(),
                rules,
            });
        }

        match kind {
            DocumentKind::Rules if !present.intersects(SectionSet::TIERS) => {
                return Err(self.malformed(Malformation::MissingTierSections));
            }
            DocumentKind::Template => {
                if let Some(missing) =
                    SectionSet::TEMPLATE_ORDER.into_iter().find(|k| !present.contains(SectionSet::of(*k)))
                {
                    return Err(self.malformed(Malformation::MissingSection(missing)));
                }
            }
            DocumentKind::Rules => {}
        }

        let document = Document {
            id: self.id,
            kind,
            metadata,
            preamble: preamble.into_iter().map(|l| l.text).collect(),
            sections,
            line_count: self.lines.len(),
            references,
            placeholders,
        };

        tracing::debug!(
            document = %document.id,
            kind = %document.kind,
            sections = document.sections.len(),
            rules = document.rules().count(),
            references = document.references.len(),
            "parsed document"
        );

        Ok(document)
    }
}

/// Parse `raw` into a [`Document`] identified by `id`.
pub(crate) fn parse(raw: &str, id: DocumentId) -> Result<Document, ParseError> {
    DocumentParser::new(raw, id).run()
}

/// Unindented list item body, if `line` is one.
fn list_item(line: &str) -> Option<&str> {
    regex!(r"^(?:[-*+]|\d+[.)])\s+(.*)$").captures(line).and_then(|c| c.get(1)).map(|m| m.as_str())
}

fn classify_rule_line(line: &str) -> RuleLine<'_> {
    if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
        return RuleLine::Content;
    }

    let item = list_item(line);
    let body = item.unwrap_or(line).trim_end();
    let entry = regex!(r"^(?:\*\*|`)?([A-Za-z][A-Za-z0-9_.-]*)(?:\*\*|`)?\s*:(?:\*\*)?\s+(\S.*)$");

    match entry.captures(body) {
        Some(caps) => match (caps.get(1), caps.get(2)) {
            (Some(id), Some(text)) => RuleLine::Rule { id: id.as_str(), text: text.as_str() },
            _ => RuleLine::Malformed,
        },
        None if item.is_some() => RuleLine::Malformed,
        None => RuleLine::Content,
    }
}

/// Parse one References line. Only unindented list items count.
fn parse_reference(line: &str, source: &DocumentId) -> Option<Reference> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let mut body = list_item(line)?.trim();

    let mut optional = false;
    if let Some(stripped) = strip_suffix_ignore_case(body, "(optional)") {
        optional = true;
        body = stripped.trim_end();
    }

    let target = match regex!(r"\[[^\]]*\]\(\s*([^)\s]+)\s*\)").captures(body).and_then(|c| c.get(1)) {
        Some(link) => link.as_str(),
        None => body.split_whitespace().next()?.trim_matches('`').trim_end_matches([':', ',', ';']),
    };
    if target.is_empty() {
        return None;
    }

    let target = if target.contains("://") {
        ReferenceTarget::External(target.to_string())
    } else {
        ReferenceTarget::Document(DocumentId::normalize(target))
    };

    Some(Reference { source: source.clone(), target, optional })
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let split = s.len().checked_sub(suffix.len())?;
    if !s.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = s.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}
