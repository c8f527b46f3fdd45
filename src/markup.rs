//! Markup stripping: HTML/MOBI markup → plain text with paragraph breaks.
//!
//! `<script>` and `<style>` elements disappear together with their contents,
//! every other tag is dropped, and the text between tags survives as
//! fragments.  Fragments are trimmed, empty ones are discarded, and the rest
//! are joined with a blank line.  Character entities are decoded.
//!
//! Two backends implement the same rules:
//!
//! | Backend | Parser | Feature |
//! |---------|--------|---------|
//! | [`MarkupBackend::Dom`]   | html5ever tree via `scraper` | `dom` |
//! | [`MarkupBackend::Regex`] | tag scanner via `regex`      | always |
//!
//! Neither backend can fail; unclosed tags and stray `<` are tolerated.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Separator placed between surviving text fragments.
pub const PARAGRAPH_BREAK: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarkupBackend {
    Dom,
    Regex,
}

impl MarkupBackend {
    /// DOM when the `dom` feature is compiled in, regex otherwise.
    pub fn preferred() -> Self {
        if cfg!(feature = "dom") {
            MarkupBackend::Dom
        } else {
            MarkupBackend::Regex
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MarkupBackend::Dom   => "dom",
            MarkupBackend::Regex => "regex",
        }
    }

    /// Parse from a CLI string.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dom" | "html"  => Some(MarkupBackend::Dom),
            "regex" | "re"  => Some(MarkupBackend::Regex),
            _               => None,
        }
    }
}

impl Default for MarkupBackend {
    fn default() -> Self {
        Self::preferred()
    }
}

/// Strip markup with the preferred backend.
pub fn strip(text: &str) -> String {
    strip_with(text, MarkupBackend::preferred())
}

/// Strip markup with an explicit backend.  Asking for the DOM backend in a
/// build without `dom` uses the regex backend.
pub fn strip_with(text: &str, backend: MarkupBackend) -> String {
    match backend {
        MarkupBackend::Dom   => strip_dom(text),
        MarkupBackend::Regex => strip_regex(text),
    }
}

fn join_fragments<'a>(fragments: impl IntoIterator<Item = &'a str>) -> String {
    fragments
        .into_iter()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_BREAK)
}

// ── DOM backend ──────────────────────────────────────────────────────────────

#[cfg(feature = "dom")]
fn strip_dom(text: &str) -> String {
    use scraper::Html;

    let document = Html::parse_document(text);
    let mut fragments = Vec::new();
    collect_text(document.root_element(), &mut fragments);
    join_fragments(fragments)
}

#[cfg(feature = "dom")]
fn collect_text<'a>(element: scraper::ElementRef<'a>, out: &mut Vec<&'a str>) {
    use scraper::{ElementRef, Node};

    if matches!(element.value().name(), "script" | "style") {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(t) => out.push(&**t),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    collect_text(el, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(not(feature = "dom"))]
fn strip_dom(text: &str) -> String {
    log::debug!("dom backend not compiled in, using regex backend");
    strip_regex(text)
}

// ── Regex backend ────────────────────────────────────────────────────────────

static RE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("valid comment regex"));
// An unclosed block swallows the rest of the input, as a browser would.
static RE_SCRIPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?(?:</script\s*>|\z)").expect("valid script regex")
});
static RE_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<style\b[^>]*>.*?(?:</style\s*>|\z)").expect("valid style regex")
});
static RE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^<>]*>").expect("valid tag regex"));
static RE_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]+);").expect("valid entity regex")
});

fn strip_regex(text: &str) -> String {
    let text = RE_COMMENT.replace_all(text, " ");
    let text = RE_SCRIPT.replace_all(&text, " ");
    let text = RE_STYLE.replace_all(&text, " ");
    let fragments: Vec<String> = RE_TAG.split(&text).map(decode_entities).collect();
    join_fragments(fragments.iter().map(String::as_str))
}

/// Decode numeric references and the handful of named entities that show up
/// in MOBI text.  Unknown names are left as written.
fn decode_entities(text: &str) -> String {
    RE_ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let body = &caps[1];
            let decoded = match body.strip_prefix('#') {
                Some(num) => {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None      => num.parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                }
                None => named_entity(body),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp"    => '&',
        "lt"     => '<',
        "gt"     => '>',
        "quot"   => '"',
        "apos"   => '\'',
        "nbsp"   => '\u{00A0}',
        "mdash"  => '\u{2014}',
        "ndash"  => '\u{2013}',
        "hellip" => '\u{2026}',
        "lsquo"  => '\u{2018}',
        "rsquo"  => '\u{2019}',
        "ldquo"  => '\u{201C}',
        "rdquo"  => '\u{201D}',
        "copy"   => '\u{00A9}',
        _        => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: [MarkupBackend; 2] = [MarkupBackend::Dom, MarkupBackend::Regex];

    #[test]
    fn scripts_are_removed_with_contents() {
        for backend in BOTH {
            let out = strip_with("<p>A</p><script>evil()</script><p>B</p>", backend);
            assert_eq!(out, "A\n\nB", "{backend:?}");
        }
    }

    #[test]
    fn styles_are_removed_with_contents() {
        for backend in BOTH {
            let html = "<html><head><style type=\"text/css\">p { color: red }</style></head>\
                        <body><p>Body text</p></body></html>";
            assert_eq!(strip_with(html, backend), "Body text", "{backend:?}");
        }
    }

    #[test]
    fn fragments_are_trimmed_and_blank_ones_dropped() {
        for backend in BOTH {
            let html = "<div>\n  <p>  first  </p>\n\n  <p>\tsecond</p>  \n</div>";
            assert_eq!(strip_with(html, backend), "first\n\nsecond", "{backend:?}");
        }
    }

    #[test]
    fn entities_are_decoded() {
        for backend in BOTH {
            let out = strip_with("<p>Fish &amp; chips &#8212; &#x4E2D;&lt;</p>", backend);
            assert_eq!(out, "Fish & chips \u{2014} \u{4E2D}<", "{backend:?}");
        }
    }

    #[test]
    fn malformed_markup_never_fails() {
        for backend in BOTH {
            let out = strip_with("<p>open <b>bold <i>both</p> tail", backend);
            assert!(out.contains("open"), "{backend:?}: {out:?}");
            assert!(out.contains("tail"), "{backend:?}: {out:?}");
            assert!(!out.contains('<'), "{backend:?}: {out:?}");
        }
    }

    #[test]
    fn unclosed_script_swallows_the_rest() {
        let out = strip_with("<p>kept</p><script>never closed <p>gone</p>", MarkupBackend::Regex);
        assert_eq!(out, "kept");
    }

    #[test]
    fn comments_are_dropped() {
        let out = strip_with("<p>a</p><!-- <p>hidden</p> --><p>b</p>", MarkupBackend::Regex);
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn plain_text_survives() {
        for backend in BOTH {
            assert_eq!(strip_with("no markup here", backend), "no markup here");
            assert_eq!(strip_with("", backend), "");
        }
    }

    #[test]
    fn unknown_entities_are_left_alone() {
        assert_eq!(decode_entities("&bogus; &#xZZ; &amp;"), "&bogus; &#xZZ; &");
    }

    #[test]
    fn backend_names() {
        assert_eq!(MarkupBackend::from_name("DOM"), Some(MarkupBackend::Dom));
        assert_eq!(MarkupBackend::from_name("regex"), Some(MarkupBackend::Regex));
        assert_eq!(MarkupBackend::from_name("xslt"), None);
        assert_eq!(MarkupBackend::Regex.name(), "regex");
    }
}
