//! HTML-to-text normalization for item bodies.
//!
//! Feed bodies arrive as a small HTML subset (`<p>`, `<i>`, `<a>`, `<pre>`,
//! entity escapes). Paragraph breaks become blank lines, every other tag is
//! dropped, and entities are decoded.

use std::sync::LazyLock;

use regex::Regex;

static PARAGRAPH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(p|br)\s*/?\s*>").expect("Invalid paragraph regex"));
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("Invalid tag regex"));
static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[xX][0-9a-fA-F]+|#[0-9]+|[a-zA-Z]+);").expect("Invalid entity regex")
});
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("Invalid blank line regex"));

/// Convert an HTML fragment to plain text.
pub fn html_to_text(html: &str) -> String {
    let text = PARAGRAPH.replace_all(html, "\n\n");
    let text = TAG.replace_all(&text, "");
    let text = ENTITY.replace_all(&text, |caps: &regex::Captures<'_>| {
        decode_entity(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

fn decode_entity(name: &str) -> Option<String> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    let decoded = match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => " ",
        _ => return None,
    };
    Some(decoded.to_string())
}
