//! HTML-to-text conversion for message bodies.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::NO_BODY;

// Compile-once regex patterns via OnceLock.
fn re_script_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap())
}

fn re_block_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)</?(br|p|div|li|ul|ol|tr|td|th|table|h[1-6]|blockquote|hr)\b[^>]*>")
            .unwrap()
    })
}

fn re_any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

fn re_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Converts an HTML body to plain text.
///
/// Script and style blocks go first, with their content. Remaining tags are
/// dropped (block-level tags become a space), entities are decoded and
/// whitespace runs collapse to one space. Input with no text left yields
/// [`NO_BODY`].
pub fn html_to_text(html: &str) -> String {
    let text = re_script_style().replace_all(html, " ");
    let text = re_block_tag().replace_all(&text, " ");
    let text = re_any_tag().replace_all(&text, "");
    let text = decode_entities(&text);
    or_sentinel(collapse_whitespace(&text))
}

/// Collapses whitespace in a plain-text body, substituting [`NO_BODY`] when empty.
pub fn plain_text(text: &str) -> String {
    or_sentinel(collapse_whitespace(text))
}

/// Normalizes a body given its declared content type (`html` or `text`).
pub fn body_to_text(content_type: Option<&str>, content: &str) -> String {
    match content_type {
        Some(kind) if kind.to_ascii_lowercase().contains("html") => html_to_text(content),
        _ => plain_text(content),
    }
}

/// Replaces every whitespace run with a single space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    re_whitespace().replace_all(text, " ").trim().to_string()
}

/// Wide enough that html2text never wraps a body line.
const DECODE_WIDTH: usize = 4096;

/// Decodes named and numeric character references in tag-free text.
///
/// Unknown names are left untouched. Whitespace may be collapsed.
pub fn decode_entities(text: &str) -> String {
    match html2text::from_read(text.as_bytes(), DECODE_WIDTH) {
        Ok(decoded) => decoded.trim_end_matches('\n').to_string(),
        Err(e) => {
            tracing::debug!(error = %e, "entity decoding failed, keeping raw text");
            text.to_string()
        }
    }
}

fn or_sentinel(text: String) -> String {
    if text.is_empty() {
        NO_BODY.to_string()
    } else {
        text
    }
}
