//! Split rendered node text into a structured code and a human label.

use regex::Regex;
use std::sync::OnceLock;

/// Code/name pair parsed from a node's display text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedText {
    pub code: String,
    pub name: String,
}

/// Identifier shape: uppercase letters, digits and a few joiners.
const IDENT: &str = r"[A-Z0-9][A-Z0-9._-]*";

fn trailing_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^(?s)(.+?)\s*\(({IDENT})\)\s*$")).expect("valid trailing-code regex")
    })
}

fn leading_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"^({IDENT})\s*:?\s+(?s)(.+)$")).expect("valid leading-code regex")
    })
}

/// Collapse runs of whitespace (including newlines between grid cells).
pub fn normalize_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse `raw` in priority order: `name(CODE)`, then `CODE name` /
/// `CODE: name`, otherwise no code and the whole text as the name.
pub fn parse_node_text(raw: &str) -> ParsedText {
    let text = raw.trim();

    if let Some(caps) = trailing_code().captures(text) {
        let name = caps[1].trim();
        if !name.is_empty() {
            return ParsedText {
                code: caps[2].to_string(),
                name: name.to_string(),
            };
        }
    }

    if let Some(caps) = leading_code().captures(text) {
        let name = caps[2].trim();
        if !name.is_empty() {
            return ParsedText {
                code: caps[1].to_string(),
                name: name.to_string(),
            };
        }
    }

    ParsedText {
        code: String::new(),
        name: raw.to_string(),
    }
}
