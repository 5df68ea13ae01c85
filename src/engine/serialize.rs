//! Document re-serialization.
//!
//! The parser keeps every line verbatim (front matter, preamble, headings and
//! section content), so serialization is a straight concatenation. Parsing the
//! output again yields an identical `Document`.

use crate::{Document, Heading};

fn heading_line(heading: &Heading) -> String {
    format!("{} {}", "#".repeat(heading.level as usize), heading.text)
}

pub(crate) fn to_text(document: &Document) -> String {
    let mut lines: Vec<&str> = Vec::with_capacity(document.line_count);
    lines.extend(document.metadata.raw.iter().map(String::as_str));
    lines.extend(document.preamble.iter().map(String::as_str));

    let headings: Vec<String> = document.sections.iter().map(|s| heading_line(&s.heading)).collect();
    for (section, heading) in document.sections.iter().zip(&headings) {
        lines.push(heading);
        lines.extend(section.lines.iter().map(String::as_str));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
