//! Composition and rendering.
//!
//! Renders a Template plus a [`MergedRuleSet`] plus variable bindings into the
//! final context document. The section order is fixed:
//!
//! ```text
//! Role → Context → Instructions → Constraints
//!      → Principles (template, then merged)
//!      → Must Have → Should Have → Could Have (merged, tier order)
//!      → Patterns (template, then merged) → [Freeform, opt-in]
//!      → Output Format → TL;DR
//! ```
//!
//! Sections with no content are left out. Placeholders are substituted in
//! template lines outside code fences; merged rule text is emitted as written.
//! Only sections that end up in the output need their placeholders bound, so
//! a `{{owner}}` under `## References` or an opted-out freeform heading is
//! never an error.
//!
//! The character budget is a hard limit. Output over budget is an error, never
//! a truncation.

use super::headers::Fences;
use super::merge::MergedRuleSet;
use super::placeholder;
use crate::{ComposeError, Document, DocumentId, DocumentKind, Options, SectionKind, Tier};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSection {
    pub kind: SectionKind,
    pub heading: String,
    pub lines: Vec<String>,
}

impl RenderedSection {
    fn render(&self) -> String {
        let mut out = format!("## {}\n", self.heading);
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// The composed output of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedContext {
    pub template: DocumentId,
    pub sections: Vec<RenderedSection>,
    pub rules: MergedRuleSet,
    pub text: String,
    pub line_count: usize,
    pub char_count: usize,
    /// Every document the output was built from: the template first, then
    /// the merge sources not already listed.
    pub sources: Vec<DocumentId>,
}

/// Concatenated lines of every `kind` section in `template`, with leading and
/// trailing blank lines dropped.
fn template_lines(template: &Document, kind: SectionKind) -> Vec<&str> {
    let lines: Vec<&str> = template.sections_of(kind).flat_map(|s| s.lines.iter().map(String::as_str)).collect();
    trim_blank(lines)
}

fn trim_blank(lines: Vec<&str>) -> Vec<&str> {
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).map_or(start, |i| i + 1);
    lines[start..end].to_vec()
}

/// Whether template sections of `kind` contribute lines to the output. Tier
/// sections are replaced by the merged rules.
fn renders(kind: SectionKind, options: &Options) -> bool {
    match kind {
        SectionKind::Freeform => options.include_freeform,
        SectionKind::References => false,
        kind => kind.tier().is_none(),
    }
}

/// First placeholder, in document order, that is rendered and has neither a
/// binding nor a default.
fn first_unbound<'t>(
    template: &'t Document,
    variables: &HashMap<String, String>,
    options: &Options,
) -> Option<&'t str> {
    template.sections.iter().filter(|s| renders(s.kind, options)).find_map(|section| {
        let mut fences = Fences::default();
        section
            .lines
            .iter()
            .enumerate()
            .filter(|(i, line)| !fences.observe(line, i + 1))
            .flat_map(|(_, line)| placeholder::scan(line).unwrap_or_default())
            .find(|token| token.default.is_none() && !variables.contains_key(token.name))
            .map(|token| token.name)
    })
}

struct Renderer<'a> {
    template: &'a Document,
    variables: &'a HashMap<String, String>,
    sections: Vec<RenderedSection>,
}

impl<'a> Renderer<'a> {
    fn substitute(&self, lines: &[&str]) -> Result<Vec<String>, ComposeError> {
        let mut fences = Fences::default();
        lines
            .iter()
            .enumerate()
            .map(|(i, line)| {
                if fences.observe(line, i + 1) {
                    Ok(line.to_string())
                } else {
                    placeholder::substitute(line, self.variables)
                }
            })
            .collect()
    }

    fn push(&mut self, kind: SectionKind, heading: String, lines: Vec<String>) {
        if lines.iter().any(|l| !l.trim().is_empty()) {
            self.sections.push(RenderedSection { kind, heading, lines });
        }
    }

    fn template_section(&mut self, kind: SectionKind) -> Result<(), ComposeError> {
        let lines = self.substitute(&template_lines(self.template, kind))?;
        self.push(kind, kind.title().to_string(), lines);
        Ok(())
    }

    /// Template lines followed by merged lines the template does not already
    /// contain.
    fn blended_section(&mut self, kind: SectionKind, merged: &[String]) -> Result<(), ComposeError> {
        let own = template_lines(self.template, kind);
        let present: HashSet<&str> = own.iter().copied().collect();

        let mut lines = self.substitute(&own)?;
        lines.extend(merged.iter().filter(|l| !present.contains(l.as_str())).cloned());
        self.push(kind, kind.title().to_string(), lines);
        Ok(())
    }

    fn freeform_sections(&mut self) -> Result<(), ComposeError> {
        let template = self.template;
        for section in template.sections_of(SectionKind::Freeform) {
            let lines = self.substitute(&trim_blank(section.lines.iter().map(String::as_str).collect()))?;
            self.push(SectionKind::Freeform, section.heading.text.clone(), lines);
        }
        Ok(())
    }

    fn tier_section(&mut self, rules: &MergedRuleSet, tier: Tier) {
        let lines = rules.tier(tier).iter().map(|r| format!("- {}: {}", r.id, r.text)).collect();
        self.push(tier.section(), tier.section().title().to_string(), lines);
    }
}

pub(crate) fn compose(
    template: &Document,
    rules: &MergedRuleSet,
    variables: &HashMap<String, String>,
    options: &Options,
) -> Result<ComposedContext, ComposeError> {
    if template.kind != DocumentKind::Template {
        return Err(ComposeError::NotATemplate { document: template.id.clone(), kind: template.kind });
    }

    if let Some(missing) = first_unbound(template, variables, options) {
        return Err(ComposeError::UnresolvedPlaceholder(missing.to_string()));
    }

    let mut renderer = Renderer { template, variables, sections: Vec::new() };
    for kind in [SectionKind::Role, SectionKind::Context, SectionKind::Instructions, SectionKind::Constraints] {
        renderer.template_section(kind)?;
    }
    renderer.blended_section(SectionKind::Principles, &rules.principles)?;
    for tier in Tier::ALL {
        renderer.tier_section(rules, tier);
    }
    renderer.blended_section(SectionKind::Patterns, &rules.patterns)?;
    if options.include_freeform {
        renderer.freeform_sections()?;
    }
    renderer.template_section(SectionKind::OutputFormat)?;
    renderer.template_section(SectionKind::Tldr)?;

    let sections = renderer.sections;
    let text = sections.iter().map(RenderedSection::render).collect::<Vec<_>>().join("\n");
    let char_count = text.chars().count();

    if let Some(limit) = options.max_chars {
        if char_count > limit {
            tracing::debug!(template = %template.id, limit, actual = char_count, "composition over budget");
            return Err(ComposeError::BudgetExceeded { limit, actual: char_count });
        }
    }

    let mut sources = vec![template.id.clone()];
    sources.extend(rules.sources.iter().filter(|id| **id != template.id).cloned());

    tracing::debug!(template = %template.id, sections = sections.len(), chars = char_count, "composed context");

    Ok(ComposedContext {
        template: template.id.clone(),
        line_count: text.lines().count(),
        char_count,
        sections,
        rules: rules.clone(),
        text,
        sources,
    })
}
