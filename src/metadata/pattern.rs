//! Caller-supplied name filters.
//!
//! Patterns use SQL `LIKE` syntax: `%` matches any run of characters, `_`
//! matches one character and `\` escapes the next character. A pattern
//! wrapped in double quotes is case-exact; otherwise it is folded with the
//! engine's unquoted-identifier rule before it reaches the engine, the same
//! way the engine itself would treat an unquoted name.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::types::IdentifierCase;

/// Escape character of the canonical pattern syntax.
pub const ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamePattern {
    body: String,
    quoted: bool,
}

impl NamePattern {
    /// Parse a caller pattern. Surrounding double quotes mark it case-exact.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            Self {
                body: trimmed[1..trimmed.len() - 1].replace("\"\"", "\""),
                quoted: true,
            }
        } else {
            Self {
                body: trimmed.to_string(),
                quoted: false,
            }
        }
    }

    /// The pattern body, without quotes and before folding.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn is_quoted(&self) -> bool {
        self.quoted
    }

    /// The pattern as it should be sent to an engine with the given folding.
    pub fn resolve(&self, case: IdentifierCase) -> String {
        if self.quoted {
            self.body.clone()
        } else {
            case.fold(&self.body)
        }
    }

    /// Client-side match, for engines whose catalog cannot filter natively.
    pub fn matches(&self, name: &str, case: IdentifierCase) -> bool {
        self.to_regex(case)
            .map(|re| re.is_match(name))
            .unwrap_or(false)
    }

    fn to_regex(&self, case: IdentifierCase) -> Option<Regex> {
        let resolved = self.resolve(case);
        let mut expr = String::with_capacity(resolved.len() + 8);
        expr.push('^');

        let mut chars = resolved.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => {
                    if let Some(next) = chars.next() {
                        expr.push_str(&regex::escape(&next.to_string()));
                    }
                }
                '%' => expr.push_str(".*"),
                '_' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        Regex::new(&expr).ok()
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", self.body)
        } else {
            f.write_str(&self.body)
        }
    }
}

impl From<&str> for NamePattern {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NamePattern {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
