//! Placeholder tokens.
//!
//! A placeholder is `{{name}}` or `{{name|default}}`. Whitespace around the
//! name and default is ignored. The token must close on the line it opens on.
//!
//! ```text
//! "deploy to {{ env | staging }} now"
//!            ^start            ^end (exclusive)
//!            name = "env", default = Some("staging")
//! ```

use crate::ComposeError;
use std::collections::HashMap;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// A placeholder occurrence inside one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub start: usize,
    pub end: usize,
    pub name: &'a str,
    pub default: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScanError {
    Unterminated,
    InvalidName(String),
}

/// Find every placeholder in `line`, left to right.
pub(crate) fn scan(line: &str) -> Result<Vec<Token<'_>>, ScanError> {
    let mut tokens = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = line[cursor..].find(OPEN) {
        let start = cursor + offset;
        let body_start = start + OPEN.len();
        let Some(close) = line[body_start..].find(CLOSE) else {
            return Err(ScanError::Unterminated);
        };
        let body_end = body_start + close;
        let end = body_end + CLOSE.len();
        let body = &line[body_start..body_end];

        let (name, default) = match body.split_once('|') {
            Some((name, default)) => (name.trim(), Some(default.trim())),
            None => (body.trim(), None),
        };
        if !regex!(r"^[A-Za-z_][A-Za-z0-9_.-]*$").is_match(name) {
            return Err(ScanError::InvalidName(line[start..end].to_string()));
        }

        tokens.push(Token { start, end, name, default });
        cursor = end;
    }

    Ok(tokens)
}

/// Replace every placeholder in `line` with its bound value or default.
///
/// Lines were validated at parse time, so a scan error here means the line did
/// not come from a parsed document; such a line is passed through unchanged.
pub(crate) fn substitute(line: &str, variables: &HashMap<String, String>) -> Result<String, ComposeError> {
    let tokens = match scan(line) {
        Ok(tokens) => tokens,
        Err(_) => return Ok(line.to_string()),
    };
    if tokens.is_empty() {
        return Ok(line.to_string());
    }

    let mut out = String::with_capacity(line.len());
    let mut cursor = 0;
    for token in tokens {
        out.push_str(&line[cursor..token.start]);
        let value = variables
            .get(token.name)
            .map(String::as_str)
            .or(token.default)
            .ok_or_else(|| ComposeError::UnresolvedPlaceholder(token.name.to_string()))?;
        out.push_str(value);
        cursor = token.end;
    }
    out.push_str(&line[cursor..]);
    Ok(out)
}
