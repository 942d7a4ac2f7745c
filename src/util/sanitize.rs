//! Markup-to-text sanitization for feed bodies.
//!
//! Feed descriptions and Atom content are usually HTML, sometimes escaped
//! once more inside the XML. [`sanitize_markup`] reduces any of that to plain
//! text that is safe to put on a terminal: tags are dropped, block elements
//! become line breaks, entities are decoded, whitespace is collapsed and
//! control characters are stripped.

use std::borrow::Cow;

use quick_xml::escape::resolve_html5_entity;
use scraper::{ElementRef, Html};

use super::text::strip_control_chars;

/// Longest entity name we try to resolve (`&CounterClockwiseContourIntegral;`).
const MAX_ENTITY_LEN: usize = 40;

/// Elements whose text content is never shown.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "head", "title"];

/// Elements that start a new line of text when opened or closed.
const BLOCK_ELEMENTS: &[&str] = &[
    "address",
    "article",
    "blockquote",
    "br",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "tr",
    "ul",
];

/// Converts raw markup into sanitized plain text.
///
/// Pure and stateless; the same input always produces the same output, which
/// is what makes sanitized content usable as part of an item's identity.
///
/// # Examples
///
/// ```
/// use gleaner::util::sanitize_markup;
///
/// assert_eq!(sanitize_markup("<p>One</p><p>Two &amp; three</p>"), "One\n\nTwo & three");
/// assert_eq!(sanitize_markup("a < b"), "a < b");
/// ```
pub fn sanitize_markup(raw: &str) -> String {
    // The HTML parser decodes entities in text nodes, so no second pass here
    let text = strip_tags(raw);
    collapse_whitespace(&strip_control_chars(&text))
}

/// Decodes HTML5 named and numeric character references in text that did
/// not go through the HTML parser.
///
/// Unknown or unterminated references are left as written. Returns
/// `Cow::Borrowed` when the input contains no `&`.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];

        let resolved = after
            .char_indices()
            .take(MAX_ENTITY_LEN + 1)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| resolve_reference(&after[..semi]).map(|r| (semi, r)));

        match resolved {
            Some((semi, replacement)) => {
                out.push_str(&replacement);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve_reference(name: &str) -> Option<Cow<'static, str>> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(|c| Cow::Owned(c.to_string()));
    }
    resolve_html5_entity(name).map(Cow::Borrowed)
}

/// Text nodes of a parsed fragment in document order, with hidden elements
/// skipped and block boundaries turned into newlines.
fn strip_tags(raw: &str) -> String {
    // CDATA sections nested in escaped HTML are just text with markers
    let raw = if raw.contains("<![CDATA[") {
        Cow::Owned(raw.replace("<![CDATA[", "").replace("]]>", ""))
    } else {
        Cow::Borrowed(raw)
    };

    let fragment = Html::parse_fragment(&raw);
    let mut out = String::with_capacity(raw.len());

    // Nesting depth is feed-controlled, so no recursion
    let mut steps = vec![Step::Open(fragment.root_element())];
    while let Some(step) = steps.pop() {
        match step {
            Step::Text(text) => out.push_str(text),
            Step::Close(sep) => out.push_str(sep),
            Step::Open(el) => {
                let name = el.value().name();
                if HIDDEN_ELEMENTS.contains(&name) {
                    continue;
                }
                let sep = separator(name);
                out.push_str(sep);
                steps.push(Step::Close(sep));

                let children: Vec<_> = el.children().collect();
                for child in children.into_iter().rev() {
                    if let Some(text) = child.value().as_text() {
                        steps.push(Step::Text(&**text));
                    } else if let Some(el) = ElementRef::wrap(child) {
                        steps.push(Step::Open(el));
                    }
                }
            }
        }
    }
    out
}

enum Step<'a> {
    Open(ElementRef<'a>),
    Close(&'static str),
    Text(&'a str),
}

fn separator(name: &str) -> &'static str {
    if name == "p" {
        "\n\n"
    } else if BLOCK_ELEMENTS.contains(&name) {
        "\n"
    } else if matches!(name, "img" | "td" | "th") {
        " "
    } else {
        ""
    }
}

/// Collapses runs of horizontal whitespace to one space, trims every line and
/// allows at most one blank line between paragraphs.
fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0;

    for line in s.lines() {
        let words: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '\u{a0}')
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            blank_run += 1;
            continue;
        }

        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(&words.join(" "));
    }

    out
}
