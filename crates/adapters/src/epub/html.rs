//! Allow-list HTML sanitizer producing well-formed XHTML fragments

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<!--.*?-->|<!\[CDATA\[(?P<cdata>.*?)\]\]>|<![^>]*>|<\?.*?\?>|<(?P<close>/?)(?P<name>[a-zA-Z][a-zA-Z0-9-]*)(?P<attrs>(?:[^>"']|"[^"]*"|'[^']*')*)>"#,
    )
    .expect("Valid regex")
});

static ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<name>[a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^\s"'=<>`]+)))?"#,
    )
    .expect("Valid regex")
});

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?P<ref>#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
        .expect("Valid regex")
});

/// Elements dropped together with their content; each needs a matching end tag
const DISCARDED: &[&str] = &[
    "script", "style", "iframe", "noscript", "textarea", "select", "object", "svg", "math",
    "template", "head", "title",
];

/// Void elements dropped as single tags
const DROPPED_VOID: &[&str] = &[
    "embed", "param", "source", "track", "input", "link", "meta", "base", "area",
];

const ALLOWED: &[&str] = &[
    "address", "article", "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6",
    "hgroup", "main", "nav", "section", "blockquote", "dd", "div", "dl", "dt", "figcaption",
    "figure", "hr", "li", "ol", "p", "pre", "ul", "a", "abbr", "b", "bdi", "bdo", "br", "cite",
    "code", "data", "dfn", "em", "i", "kbd", "mark", "q", "rb", "rp", "rt", "rtc", "ruby", "s",
    "samp", "small", "span", "strong", "sub", "sup", "time", "u", "var", "wbr", "caption", "col",
    "colgroup", "table", "tbody", "td", "tfoot", "th", "thead", "tr", "img",
];

const VOID: &[&str] = &["br", "hr", "img", "wbr", "col"];

/// Opening one of these closes an open `<p>`
const BLOCK: &[&str] = &[
    "address", "article", "aside", "footer", "header", "h1", "h2", "h3", "h4", "h5", "h6",
    "hgroup", "main", "nav", "section", "blockquote", "div", "dl", "figure", "hr", "ol", "p",
    "pre", "ul", "table",
];

/// Opening one of these closes a sibling of the same kind
const SELF_CLOSING_SIBLINGS: &[&str] = &["p", "li", "dt", "dd", "tr", "td", "th"];

const NAMED_ENTITIES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("iexcl", 161),
    ("pound", 163),
    ("sect", 167),
    ("copy", 169),
    ("laquo", 171),
    ("shy", 173),
    ("reg", 174),
    ("deg", 176),
    ("para", 182),
    ("middot", 183),
    ("raquo", 187),
    ("frac12", 189),
    ("iquest", 191),
    ("agrave", 224),
    ("aacute", 225),
    ("auml", 228),
    ("ccedil", 231),
    ("egrave", 232),
    ("eacute", 233),
    ("ouml", 246),
    ("uuml", 252),
    ("times", 215),
    ("ensp", 8194),
    ("emsp", 8195),
    ("thinsp", 8201),
    ("zwnj", 8204),
    ("zwj", 8205),
    ("ndash", 8211),
    ("mdash", 8212),
    ("lsquo", 8216),
    ("rsquo", 8217),
    ("ldquo", 8220),
    ("rdquo", 8221),
    ("bull", 8226),
    ("hellip", 8230),
    ("euro", 8364),
    ("trade", 8482),
    ("larr", 8592),
    ("rarr", 8594),
    ("hearts", 9829),
];

const XML_ENTITIES: &[(&str, char)] = &[
    ("amp", '&'),
    ("lt", '<'),
    ("gt", '>'),
    ("quot", '"'),
    ("apos", '\''),
];

/// What to do with `<img>` elements
#[derive(Debug, Clone, Copy)]
pub enum ImagePolicy<'a> {
    /// Drop every image
    Strip,
    /// Keep images whose remote URL maps to a local archive path
    Embed(&'a HashMap<String, String>),
}

/// Sanitize an article body into an XHTML fragment.
///
/// Unknown elements are unwrapped (content kept), discarded elements lose
/// their content too, and every open element is closed.
pub fn sanitize_html(html: &str, images: ImagePolicy<'_>) -> String {
    let mut out = String::with_capacity(html.len());
    let mut open: Vec<&'static str> = Vec::new();
    let mut discard = Discard::default();
    let mut last = 0;

    for caps in TOKEN.captures_iter(html) {
        let Some(token) = caps.get(0) else { continue };
        if !discard.active() {
            push_text(&mut out, &html[last..token.start()]);
        }
        last = token.end();

        let Some(element) = Element::from_captures(&caps) else {
            if !discard.active() {
                if let Some(cdata) = caps.name("cdata") {
                    push_escaped(&mut out, cdata.as_str());
                }
            }
            continue;
        };
        if discard.consume(&element) {
            continue;
        }

        let Some(tag) = ALLOWED.iter().copied().find(|t| *t == element.name) else {
            continue;
        };

        if element.closing {
            close_tag(&mut out, &mut open, tag);
        } else {
            open_tag(&mut out, &mut open, tag, element.attrs, images);
        }
    }

    if !discard.active() {
        push_text(&mut out, &html[last..]);
    }
    while let Some(tag) = open.pop() {
        push_close(&mut out, tag);
    }

    out
}

/// Remote image URLs referenced by the kept markup, in first-seen order
pub fn image_sources(html: &str) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    let mut discard = Discard::default();

    for caps in TOKEN.captures_iter(html) {
        let Some(element) = Element::from_captures(&caps) else { continue };
        if discard.consume(&element) {
            continue;
        }

        if element.name == "img" && !element.closing {
            if let Some(src) = attributes(element.attrs)
                .into_iter()
                .find(|(n, _)| n == "src")
                .map(|(_, v)| v)
                .filter(|v| is_web_url(v))
            {
                if !sources.contains(&src) {
                    sources.push(src);
                }
            }
        }
    }

    sources
}

/// One start or end tag from the token stream
struct Element<'h> {
    name: String,
    closing: bool,
    attrs: &'h str,
}

impl<'h> Element<'h> {
    fn from_captures(caps: &Captures<'h>) -> Option<Self> {
        let name = caps.name("name")?.as_str().to_ascii_lowercase();
        Some(Self {
            name,
            closing: caps.name("close").is_some_and(|c| !c.as_str().is_empty()),
            attrs: caps.name("attrs").map_or("", |a| a.as_str()),
        })
    }

    /// Written as `<tag/>`, so no end tag follows
    fn self_closed(&self) -> bool {
        self.attrs.trim_end().ends_with('/')
    }
}

/// Tracks the discarded element whose content is being skipped
#[derive(Default)]
struct Discard {
    skipping: Option<(String, usize)>,
}

impl Discard {
    fn active(&self) -> bool {
        self.skipping.is_some()
    }

    /// Returns true when the element must not reach the output
    fn consume(&mut self, element: &Element<'_>) -> bool {
        if let Some((skipped, depth)) = self.skipping.as_mut() {
            if *skipped == element.name {
                if element.closing {
                    *depth -= 1;
                } else if !element.self_closed() {
                    *depth += 1;
                }
            }
            if *depth == 0 {
                self.skipping = None;
            }
            return true;
        }

        if DISCARDED.contains(&element.name.as_str()) {
            if !element.closing && !element.self_closed() {
                self.skipping = Some((element.name.clone(), 1));
            }
            return true;
        }

        DROPPED_VOID.contains(&element.name.as_str())
    }
}

/// Escape text for XHTML element content or attribute values
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    push_escaped(&mut out, text);
    out
}

fn open_tag(
    out: &mut String,
    open: &mut Vec<&'static str>,
    tag: &'static str,
    raw_attrs: &str,
    images: ImagePolicy<'_>,
) {
    let attrs = match allowed_attributes(tag, raw_attrs, images) {
        Some(attrs) => attrs,
        None => return,
    };

    if let Some(top) = open.last().copied() {
        let closes_sibling = top == tag && SELF_CLOSING_SIBLINGS.contains(&tag);
        let closes_paragraph = top == "p" && BLOCK.contains(&tag);
        if closes_sibling || closes_paragraph {
            open.pop();
            push_close(out, top);
        }
    }

    out.push('<');
    out.push_str(tag);
    for (name, value) in &attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        push_escaped(out, value);
        out.push('"');
    }

    if VOID.contains(&tag) {
        out.push_str("/>");
    } else {
        out.push('>');
        open.push(tag);
    }
}

fn close_tag(out: &mut String, open: &mut Vec<&'static str>, tag: &'static str) {
    if VOID.contains(&tag) {
        return;
    }
    if let Some(position) = open.iter().rposition(|t| *t == tag) {
        while open.len() > position {
            if let Some(inner) = open.pop() {
                push_close(out, inner);
            }
        }
    }
}

fn push_close(out: &mut String, tag: &str) {
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

/// Filtered attributes for an element; `None` drops the element entirely
fn allowed_attributes(
    tag: &str,
    raw: &str,
    images: ImagePolicy<'_>,
) -> Option<Vec<(&'static str, String)>> {
    let parsed = attributes(raw);
    let value_of = |wanted: &str| {
        parsed
            .iter()
            .find(|(name, _)| name == wanted)
            .map(|(_, v)| v.clone())
    };

    match tag {
        "a" => {
            let mut kept = Vec::new();
            if let Some(href) = value_of("href").filter(|v| is_web_url(v)) {
                kept.push(("href", href.trim().to_string()));
            }
            if let Some(title) = value_of("title") {
                kept.push(("title", title));
            }
            Some(kept)
        }
        "img" => {
            let ImagePolicy::Embed(local) = images else {
                return None;
            };
            let src = value_of("src")?;
            let local_src = local.get(src.trim())?;
            let mut kept = vec![("src", local_src.clone())];
            // XHTML requires alt on img
            kept.push(("alt", value_of("alt").unwrap_or_default()));
            if let Some(title) = value_of("title") {
                kept.push(("title", title));
            }
            Some(kept)
        }
        _ => Some(Vec::new()),
    }
}

/// Lower-cased names with entity-decoded values; first occurrence wins
fn attributes(raw: &str) -> Vec<(String, String)> {
    let mut parsed: Vec<(String, String)> = Vec::new();
    for caps in ATTR.captures_iter(raw) {
        let Some(name) = caps.name("name") else { continue };
        let name = name.as_str().to_ascii_lowercase();
        if parsed.iter().any(|(n, _)| *n == name) {
            continue;
        }
        let value = caps
            .name("dq")
            .or_else(|| caps.name("sq"))
            .or_else(|| caps.name("bare"))
            .map_or(String::new(), |v| decode_entities(v.as_str()));
        parsed.push((name, value));
    }
    parsed
}

fn is_web_url(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    value.starts_with("http://") || value.starts_with("https://")
}

fn reference_char(reference: &str) -> Option<char> {
    if let Some(number) = reference.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code).filter(|c| *c != '\0');
    }
    XML_ENTITIES
        .iter()
        .find(|(name, _)| *name == reference)
        .map(|(_, c)| *c)
        .or_else(|| {
            NAMED_ENTITIES
                .iter()
                .find(|(name, _)| *name == reference)
                .and_then(|(_, code)| char::from_u32(*code))
        })
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| match reference_char(&caps["ref"]) {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Text content: known entities survive as XML-safe references
fn push_text(out: &mut String, text: &str) {
    let mut last = 0;
    for caps in ENTITY.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        push_escaped(out, &text[last..whole.start()]);
        last = whole.end();

        let reference = &caps["ref"];
        if XML_ENTITIES.iter().any(|(name, _)| *name == reference) {
            out.push_str(whole.as_str());
        } else if let Some(c) = reference_char(reference) {
            out.push_str(&format!("&#{};", c as u32));
        } else {
            push_escaped(out, whole.as_str());
        }
    }
    push_escaped(out, &text[last..]);
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(html: &str) -> String {
        sanitize_html(html, ImagePolicy::Strip)
    }

    #[test]
    fn test_drops_scripts_and_unknown_tags() {
        let html = r#"<div onclick="x()"><script>alert("hi")</script><font color="red">Hello</font> <b>world</b></div><style>p{}</style>"#;
        assert_eq!(strip(html), "<div>Hello <b>world</b></div>");
    }

    #[test]
    fn test_links_keep_only_web_urls() {
        assert_eq!(
            strip(r#"<a href="https://example.com/?a=1&amp;b=2" target="_blank" title="T">x</a>"#),
            r#"<a href="https://example.com/?a=1&amp;b=2" title="T">x</a>"#
        );
        assert_eq!(strip(r#"<a href="javascript:alert(1)">x</a>"#), "<a>x</a>");
    }

    #[test]
    fn test_balances_tags_and_closes_voids() {
        assert_eq!(
            strip("<p>one<p>two<br><hr><ul><li>a<li>b</ul></em>"),
            "<p>one</p><p>two<br/></p><hr/><ul><li>a</li><li>b</li></ul>"
        );
        assert_eq!(strip("<blockquote><p>unclosed"), "<blockquote><p>unclosed</p></blockquote>");
    }

    #[test]
    fn test_entities_become_xml_safe() {
        assert_eq!(
            strip("<p>a&nbsp;b &mdash; c &amp; d &bogus; 1 < 2</p>"),
            "<p>a&#160;b &#8212; c &amp; d &amp;bogus; 1 &lt; 2</p>"
        );
    }

    #[test]
    fn test_images_stripped_without_policy() {
        assert_eq!(
            strip(r#"<figure><img src="https://cdn.example.com/a.png" alt="A"><figcaption>Cap</figcaption></figure>"#),
            "<figure><figcaption>Cap</figcaption></figure>"
        );
    }

    #[test]
    fn test_images_rewritten_when_embedded() {
        let mut local = HashMap::new();
        local.insert(
            "https://cdn.example.com/a.png".to_string(),
            "images/img-001.png".to_string(),
        );
        let html = r#"<img src="https://cdn.example.com/a.png"><img src="https://cdn.example.com/missing.png" alt="gone">"#;

        assert_eq!(
            sanitize_html(html, ImagePolicy::Embed(&local)),
            r#"<img src="images/img-001.png" alt=""/>"#
        );
    }

    #[test]
    fn test_image_sources_in_order_without_duplicates() {
        let html = r#"<img src="https://a/1.png"><script><img src="https://a/hidden.png"></script><img src='https://a/2.jpg'><img src="https://a/1.png"><img src="data:image/png;base64,xx">"#;
        assert_eq!(
            image_sources(html),
            vec!["https://a/1.png".to_string(), "https://a/2.jpg".to_string()]
        );
    }

    #[test]
    fn test_comments_and_cdata() {
        assert_eq!(
            strip("<p><!-- hidden -->x<![CDATA[<raw>]]></p>"),
            "<p>x&lt;raw&gt;</p>"
        );
    }

    #[test]
    fn test_void_embed_keeps_following_content() {
        assert_eq!(
            strip(r#"<p>before</p><embed src="https://x/y.swf"><p>important</p>"#),
            "<p>before</p><p>important</p>"
        );
        assert_eq!(
            strip(r#"<video><source src="a.mp4"><track src="a.vtt"></video><p>after</p>"#),
            "<p>after</p>"
        );
    }

    #[test]
    fn test_select_dropped_with_unclosed_options() {
        assert_eq!(
            strip("<select><option>a<option>b</select><p>kept</p>"),
            "<p>kept</p>"
        );
        assert_eq!(strip("<p><option>loose</option></p>"), "<p>loose</p>");
    }

    #[test]
    fn test_image_sources_after_self_closed_iframe() {
        let html = r#"<iframe src="https://x/v"/><p>t</p><img src="https://x/a.png">"#;
        assert_eq!(image_sources(html), vec!["https://x/a.png".to_string()]);

        let mut local = HashMap::new();
        local.insert("https://x/a.png".to_string(), "images/img-001.png".to_string());
        assert_eq!(
            sanitize_html(html, ImagePolicy::Embed(&local)),
            r#"<p>t</p><img src="images/img-001.png" alt=""/>"#
        );
    }
}
