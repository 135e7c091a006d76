//! Markup normalisation: exported rich-text page bodies → [`Block`] lists.
//!
//! The export tool writes a small, regular HTML dialect, so a regex
//! tokenizer plus a flat state machine is enough; no DOM is built.
//!
//! ## Rules
//!
//! Applied while walking the token stream:
//!
//! 1. Comments dropped; `script`/`style`/`svg`/… dropped with their content
//! 2. Character entities decoded, whitespace collapsed, invisible Unicode removed
//! 3. Entity links (`@UUID[..]{..}`, `@Type[..]`, `content-link` anchors)
//!    rewritten to `[Linked: <name>]` placeholders
//! 4. `@Embed` directives removed, keeping any `readaloud` text;
//!    inline rolls reduced to their label or formula
//! 5. Headings h1–h6 become heading blocks (and page [`Heading`]s)
//! 6. Lists flattened to items with depth and bullet/number markers
//! 7. Tables kept as rows of cells, empty rows dropped
//! 8. Images kept with their best source attribute and size hints
//! 9. Every other tag dropped, inner text kept
//!
//! Malformed input never fails: unclosed constructs are closed at the end of
//! the body and reported in [`NormalizedPage::recovered`].

use crate::model::{Block, Heading, Inline, ListMarker, TableCell};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Output of [`normalize`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedPage {
    pub blocks: Vec<Block>,
    pub headings: Vec<Heading>,
    /// Human-readable notes about repaired markup.
    pub recovered: Vec<String>,
}

/// Normalize one page body.
pub fn normalize(body: &str) -> NormalizedPage {
    let mut n = Normalizer::default();
    let tokens: Vec<Captures> = RE_TOKEN.captures_iter(body).collect();
    let mut labels = markup_labels(body, &tokens).into_iter().peekable();
    let mut last = 0;

    for caps in &tokens {
        let Some(whole) = caps.get(0) else { continue };
        while let Some(&(start, end)) = labels.peek() {
            if start >= whole.start() {
                break;
            }
            labels.next();
            if start >= last {
                n.text(&body[last..start]);
                n.text(&RE_TOKEN.replace_all(&body[start..end], ""));
                last = end;
            }
        }
        if whole.start() < last {
            continue;
        }
        if whole.start() > last {
            n.text(&body[last..whole.start()]);
        }
        last = whole.end();

        if whole.as_str().starts_with("<!--") {
            continue;
        }
        let closing = caps.get(1).is_some_and(|g| !g.as_str().is_empty());
        let name = caps
            .get(2)
            .map(|g| g.as_str().to_ascii_lowercase())
            .unwrap_or_default();
        let raw_attrs = caps.get(3).map_or("", |g| g.as_str());

        if closing {
            n.end_tag(&name);
        } else {
            n.start_tag(&name, raw_attrs, whole.start());
            if raw_attrs.trim_end().ends_with('/') && !is_void(&name) {
                n.end_tag(&name);
            }
        }
    }
    for (start, end) in labels {
        if start >= last {
            n.text(&body[last..start]);
            n.text(&RE_TOKEN.replace_all(&body[start..end], ""));
            last = end;
        }
    }
    if last < body.len() {
        n.text(&body[last..]);
    }

    n.finish()
}

/// Macros whose `{label}` carries markup, e.g.
/// `@UUID[Actor.x]{<strong>Bob</strong>}`. Such a macro is fed to the
/// normalizer as one text run with the tags removed.
fn markup_labels(body: &str, tokens: &[Captures]) -> Vec<(usize, usize)> {
    if !body.contains('{') {
        return Vec::new();
    }
    RE_MARKUP_LABEL
        .find_iter(body)
        .map(|m| (m.start(), m.end()))
        .filter(|&(start, _)| {
            !tokens
                .iter()
                .filter_map(|c| c.get(0))
                .any(|t| t.start() < start && start < t.end())
        })
        .collect()
}

// ── Tokens ───────────────────────────────────────────────────────────────────

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<!--.*?-->|<(/?)([A-Za-z][A-Za-z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .unwrap()
});

static RE_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .unwrap()
});

fn parse_attrs(raw: &str) -> HashMap<String, String> {
    RE_ATTR
        .captures_iter(raw)
        .filter_map(|c| {
            let key = c.get(1)?.as_str().to_ascii_lowercase();
            let value = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map_or("", |m| m.as_str());
            Some((key, decode_entities(value)))
        })
        .collect()
}

fn is_void(name: &str) -> bool {
    matches!(
        name,
        "br" | "hr" | "img" | "input" | "meta" | "link" | "source" | "wbr" | "col" | "area"
    )
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "aside"
            | "header"
            | "footer"
            | "main"
            | "nav"
            | "blockquote"
            | "figure"
            | "figcaption"
            | "pre"
            | "center"
            | "details"
            | "summary"
            | "dl"
            | "dt"
            | "dd"
            | "caption"
            | "address"
    )
}

fn is_skipped(name: &str) -> bool {
    matches!(
        name,
        "script"
            | "style"
            | "template"
            | "noscript"
            | "iframe"
            | "svg"
            | "object"
            | "select"
            | "textarea"
            | "button"
            | "video"
            | "audio"
    )
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

// ── Entities and whitespace ──────────────────────────────────────────────────

static RE_ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

/// Decode HTML character references. Unknown names are left as written.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }
    RE_ENTITY
        .replace_all(input, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body
                .strip_prefix("#x")
                .or_else(|| body.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "bull" => '\u{2022}',
        "middot" => '\u{00B7}',
        "times" => '\u{00D7}',
        "divide" => '\u{00F7}',
        "copy" => '\u{00A9}',
        "reg" => '\u{00AE}',
        "trade" => '\u{2122}',
        "deg" => '\u{00B0}',
        "plusmn" => '\u{00B1}',
        "frac12" => '\u{00BD}',
        "frac14" => '\u{00BC}',
        "frac34" => '\u{00BE}',
        "sect" => '\u{00A7}',
        "para" => '\u{00B6}',
        "laquo" => '\u{00AB}',
        "raquo" => '\u{00BB}',
        "eacute" => '\u{00E9}',
        "egrave" => '\u{00E8}',
        "aacute" => '\u{00E1}',
        "agrave" => '\u{00E0}',
        "ouml" => '\u{00F6}',
        "uuml" => '\u{00FC}',
        "auml" => '\u{00E4}',
        "szlig" => '\u{00DF}',
        "ntilde" => '\u{00F1}',
        "ccedil" => '\u{00E7}',
        "shy" => '\u{00AD}',
        "zwj" => '\u{200D}',
        "zwnj" => '\u{200C}',
        _ => return None,
    })
}

fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}' | '\u{FEFF}' | '\u{00AD}' | '\u{200C}' | '\u{200D}' | '\u{2060}'
    )
}

/// Collapse whitespace runs to one space and drop invisible characters.
fn collapse_ws(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_ws = false;
    for c in input.chars() {
        if is_invisible(c) {
            continue;
        }
        if c.is_whitespace() {
            if !in_ws {
                out.push(' ');
                in_ws = true;
            }
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    out
}

// ── Rule 3/4: Platform macros ────────────────────────────────────────────────

static RE_EMBED_READALOUD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"@Embed\[[^\]]*?readaloud\s*=\s*["']([^"']*)["'][^\]]*\](?:\{[^}]*\})?"#).unwrap()
});

static RE_EMBED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@Embed\[[^\]]*\](?:\{[^}]*\})?").unwrap());

static RE_INLINE_ROLL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[\[(?:/[A-Za-z]+\s+)?([^\]]*?)\]\](?:\{([^}]*)\})?").unwrap()
});

static RE_MARKUP_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:@[A-Za-z]+\[[^\]<>]*\]|\[\[[^\]<>]*\]\])\{[^}]*<[^}]*\}").unwrap()
});

static RE_ENTITY_MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z]+)\[([^\]]*)\](?:\{([^}]*)\})?").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

fn expand_macros(text: &str) -> Vec<Segment> {
    if !text.contains('@') && !text.contains("[[") {
        return vec![Segment::Text(text.to_string())];
    }

    let s = RE_EMBED_READALOUD.replace_all(text, "$1");
    let s = RE_EMBED.replace_all(&s, "");
    let s = RE_INLINE_ROLL.replace_all(&s, |c: &Captures| {
        c.get(2)
            .map(|m| m.as_str().trim())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| c.get(1).map_or("", |m| m.as_str().trim()))
            .to_string()
    });

    let mut segments = Vec::new();
    let mut last = 0;
    for caps in RE_ENTITY_MACRO.captures_iter(&s) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            segments.push(Segment::Text(s[last..whole.start()].to_string()));
        }
        last = whole.end();
        let kind = caps.get(1).map_or("", |m| m.as_str());
        let target = caps.get(2).map_or("", |m| m.as_str());
        let label = caps.get(3).map(|m| m.as_str());
        segments.push(Segment::Placeholder(macro_name(kind, target, label)));
    }
    if last < s.len() {
        segments.push(Segment::Text(s[last..].to_string()));
    }
    segments
}

const FALLBACK_NAME: &str = "Linked Content";

fn macro_name(kind: &str, target: &str, label: Option<&str>) -> String {
    if let Some(l) = label.map(|l| collapse_ws(l).trim().to_string()) {
        if !l.is_empty() {
            return l;
        }
    }
    match kind {
        "UUID" | "Compendium" => {
            uuid_document_type(target).unwrap_or_else(|| FALLBACK_NAME.to_string())
        }
        other => humanize(other),
    }
}

/// Document type named inside a platform UUID such as
/// `Compendium.world.lore.JournalEntry.abc` or `Actor.xyz`.
fn uuid_document_type(uuid: &str) -> Option<String> {
    let parts: Vec<&str> = uuid.split('.').filter(|p| !p.is_empty()).collect();
    if parts.len() < 2 {
        return None;
    }
    let skip_first = usize::from(parts[0] == "Compendium");
    parts[skip_first..parts.len() - 1]
        .iter()
        .rev()
        .find(|p| {
            p.chars().next().is_some_and(|c| c.is_ascii_uppercase())
                && p.chars().all(|c| c.is_ascii_alphabetic())
        })
        .map(|p| humanize(p))
}

/// `JournalEntryPage` → `Journal Entry Page`.
fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_ascii_lowercase();
        out.push(c);
    }
    out
}

fn is_entity_link(tag: &str, attrs: &HashMap<String, String>) -> bool {
    let classed = attrs.get("class").is_some_and(|c| {
        c.split_whitespace()
            .any(|cls| cls == "content-link" || cls == "entity-link")
    });
    classed || (tag == "a" && attrs.contains_key("data-uuid"))
}

fn link_fallback(attrs: &HashMap<String, String>) -> String {
    let non_empty = |k: &str| {
        attrs
            .get(k)
            .map(|v| collapse_ws(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    ["data-name", "data-label", "data-tooltip", "aria-label", "title"]
        .iter()
        .find_map(|&k| non_empty(k))
        .or_else(|| non_empty("data-type").map(|t| humanize(&t)))
        .or_else(|| non_empty("data-uuid").and_then(|u| uuid_document_type(&u)))
        .or_else(|| non_empty("data-pack"))
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

fn parse_dimension(value: Option<&String>) -> Option<u32> {
    let v = value?.trim();
    let v = v.strip_suffix("px").unwrap_or(v).trim();
    v.parse::<f32>()
        .ok()
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.round() as u32)
}

// ── State machine ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Normalizer {
    blocks: Vec<Block>,
    inline: Vec<Inline>,
    bold: u32,
    italic: u32,
    lists: Vec<ListContext>,
    item: Option<(u8, ListMarker)>,
    heading: Option<HeadingContext>,
    table: Option<TableContext>,
    link: Option<LinkContext>,
    skip: Option<SkipContext>,
    recovered: Vec<String>,
}

struct ListContext {
    ordered: bool,
    next: u32,
}

struct HeadingContext {
    level: u8,
    offset: usize,
    text: String,
}

#[derive(Default)]
struct TableContext {
    rows: Vec<Vec<TableCell>>,
    cell: Option<TableCell>,
    nested: u32,
}

impl TableContext {
    fn close_cell(&mut self) {
        if let Some(cell) = self.cell.take() {
            let content = trim_inline(cell.content);
            if self.rows.is_empty() {
                self.rows.push(Vec::new());
            }
            if let Some(row) = self.rows.last_mut() {
                row.push(TableCell {
                    header: cell.header,
                    content,
                });
            }
        }
    }

    fn push_space(&mut self) {
        if let Some(cell) = self.cell.as_mut() {
            push_styled(&mut cell.content, " ", false, false);
        }
    }
}

struct LinkContext {
    tag: String,
    depth: u32,
    text: String,
    fallback: String,
}

struct SkipContext {
    tag: String,
    depth: u32,
}

fn push_styled(buf: &mut Vec<Inline>, text: &str, bold: bool, italic: bool) {
    if let Some(Inline::Text {
        text: prev,
        bold: b,
        italic: i,
    }) = buf.last_mut()
    {
        if *b == bold && *i == italic {
            if !(prev.ends_with(' ') && text.starts_with(' ')) {
                prev.push_str(text);
            } else {
                prev.push_str(&text[1..]);
            }
            return;
        }
    }
    buf.push(Inline::Text {
        text: text.to_string(),
        bold,
        italic,
    });
}

/// Trim outer whitespace and breaks; empty when nothing visible remains.
fn trim_inline(mut content: Vec<Inline>) -> Vec<Inline> {
    while matches!(content.first(), Some(Inline::LineBreak)) {
        content.remove(0);
    }
    while matches!(content.last(), Some(Inline::LineBreak)) {
        content.pop();
    }
    if let Some(Inline::Text { text, .. }) = content.first_mut() {
        *text = text.trim_start().to_string();
    }
    if let Some(Inline::Text { text, .. }) = content.last_mut() {
        *text = text.trim_end().to_string();
    }
    content.retain(|i| !matches!(i, Inline::Text { text, .. } if text.is_empty()));

    let visible = content.iter().any(|i| match i {
        Inline::Text { text, .. } => !text.trim().is_empty(),
        Inline::EntityPlaceholder { .. } => true,
        Inline::LineBreak => false,
    });
    if visible {
        content
    } else {
        Vec::new()
    }
}

impl Normalizer {
    fn text(&mut self, raw: &str) {
        if self.skip.is_some() {
            return;
        }
        let raw = match raw.find("<!--") {
            Some(i) => {
                self.recovered.push("unterminated comment".to_string());
                &raw[..i]
            }
            None => raw,
        };
        let decoded = decode_entities(raw);
        if let Some(link) = self.link.as_mut() {
            link.text.push_str(&decoded);
            return;
        }
        for seg in expand_macros(&decoded) {
            match seg {
                Segment::Text(t) => self.push_text(&t),
                Segment::Placeholder(name) => self.push_placeholder(name),
            }
        }
    }

    fn push_text(&mut self, raw: &str) {
        let collapsed = collapse_ws(raw);
        if collapsed.is_empty() {
            return;
        }
        let (bold, italic) = (self.bold > 0, self.italic > 0);
        if let Some(h) = self.heading.as_mut() {
            h.text.push_str(&collapsed);
            return;
        }
        if let Some(table) = self.table.as_mut() {
            if let Some(cell) = table.cell.as_mut() {
                push_styled(&mut cell.content, &collapsed, bold, italic);
            }
            return;
        }
        push_styled(&mut self.inline, &collapsed, bold, italic);
    }

    fn push_placeholder(&mut self, name: String) {
        if let Some(h) = self.heading.as_mut() {
            h.text.push_str(&Inline::placeholder_text(&name));
            return;
        }
        if let Some(table) = self.table.as_mut() {
            if let Some(cell) = table.cell.as_mut() {
                cell.content.push(Inline::EntityPlaceholder { name });
            }
            return;
        }
        self.inline.push(Inline::EntityPlaceholder { name });
    }

    fn start_tag(&mut self, name: &str, raw_attrs: &str, offset: usize) {
        if let Some(skip) = self.skip.as_mut() {
            if skip.tag == name {
                skip.depth += 1;
            }
            return;
        }
        if let Some(link) = self.link.as_mut() {
            if link.tag == name {
                link.depth += 1;
            }
            if name == "br" {
                link.text.push(' ');
            }
            return;
        }

        if is_skipped(name) {
            self.skip = Some(SkipContext {
                tag: name.to_string(),
                depth: 0,
            });
            return;
        }
        if let Some(level) = heading_level(name) {
            self.open_heading(level, offset);
            return;
        }

        match name {
            "a" | "span" => {
                let attrs = parse_attrs(raw_attrs);
                if is_entity_link(name, &attrs) {
                    self.link = Some(LinkContext {
                        tag: name.to_string(),
                        depth: 0,
                        text: String::new(),
                        fallback: link_fallback(&attrs),
                    });
                }
            }
            "strong" | "b" => self.bold += 1,
            "em" | "i" | "cite" | "var" | "dfn" => self.italic += 1,
            "br" => self.line_break(),
            "hr" => {
                if self.heading.is_none() && self.table.is_none() {
                    self.flush();
                    self.blocks.push(Block::Rule);
                }
            }
            "ul" | "ol" => {
                if self.in_table_or_heading() {
                    self.block_boundary();
                    return;
                }
                self.flush();
                self.item = None;
                let start = parse_attrs(raw_attrs)
                    .get("start")
                    .and_then(|s| s.trim().parse::<u32>().ok())
                    .unwrap_or(1);
                self.lists.push(ListContext {
                    ordered: name == "ol",
                    next: start,
                });
            }
            "li" => self.open_item(),
            "table" => {
                if let Some(t) = self.table.as_mut() {
                    t.nested += 1;
                    t.push_space();
                    return;
                }
                self.flush();
                self.table = Some(TableContext::default());
            }
            "tr" => match self.table.as_mut() {
                Some(t) if t.nested == 0 => {
                    t.close_cell();
                    t.rows.push(Vec::new());
                }
                Some(t) => t.push_space(),
                None => self.block_boundary(),
            },
            "td" | "th" => match self.table.as_mut() {
                Some(t) if t.nested == 0 => {
                    t.close_cell();
                    if t.rows.is_empty() {
                        t.rows.push(Vec::new());
                    }
                    t.cell = Some(TableCell {
                        header: name == "th",
                        content: Vec::new(),
                    });
                }
                Some(t) => t.push_space(),
                None => self.block_boundary(),
            },
            "img" => self.image(parse_attrs(raw_attrs)),
            other if is_block(other) => self.block_boundary(),
            _ => {}
        }
    }

    fn end_tag(&mut self, name: &str) {
        if let Some(skip) = self.skip.as_mut() {
            if skip.tag == name {
                if skip.depth == 0 {
                    self.skip = None;
                } else {
                    skip.depth -= 1;
                }
            }
            return;
        }
        if let Some(link) = self.link.as_mut() {
            if link.tag == name {
                if link.depth == 0 {
                    self.close_link();
                } else {
                    link.depth -= 1;
                }
            }
            return;
        }
        if heading_level(name).is_some() {
            self.close_heading();
            return;
        }

        match name {
            "strong" | "b" => self.bold = self.bold.saturating_sub(1),
            "em" | "i" | "cite" | "var" | "dfn" => self.italic = self.italic.saturating_sub(1),
            "ul" | "ol" => {
                if self.in_table_or_heading() {
                    self.block_boundary();
                    return;
                }
                self.flush();
                self.item = None;
                self.lists.pop();
            }
            "li" => {
                if self.in_table_or_heading() {
                    self.block_boundary();
                    return;
                }
                self.flush();
                self.item = None;
            }
            "table" => {
                if let Some(t) = self.table.as_mut() {
                    if t.nested > 0 {
                        t.nested -= 1;
                        return;
                    }
                    self.close_table();
                }
            }
            "tr" | "td" | "th" => match self.table.as_mut() {
                Some(t) if t.nested == 0 => t.close_cell(),
                Some(t) => t.push_space(),
                None => {}
            },
            other if is_block(other) => self.block_boundary(),
            _ => {}
        }
    }

    fn in_table_or_heading(&self) -> bool {
        self.table.is_some() || self.heading.is_some()
    }

    fn block_boundary(&mut self) {
        if self.heading.is_some() {
            self.push_text(" ");
            return;
        }
        if let Some(t) = self.table.as_mut() {
            t.push_space();
            return;
        }
        self.flush();
    }

    fn line_break(&mut self) {
        if self.heading.is_some() {
            self.push_text(" ");
            return;
        }
        if let Some(t) = self.table.as_mut() {
            if let Some(cell) = t.cell.as_mut() {
                cell.content.push(Inline::LineBreak);
            }
            return;
        }
        self.inline.push(Inline::LineBreak);
    }

    fn flush(&mut self) {
        let content = trim_inline(std::mem::take(&mut self.inline));
        if content.is_empty() {
            return;
        }
        match self.item.take() {
            Some((depth, marker)) => self.blocks.push(Block::ListItem {
                depth,
                marker,
                content,
            }),
            None => self.blocks.push(Block::Paragraph { content }),
        }
    }

    fn open_heading(&mut self, level: u8, offset: usize) {
        if self.table.is_some() {
            return;
        }
        if self.heading.is_some() {
            self.recovered
                .push("heading opened before the previous one closed".to_string());
            self.close_heading();
        }
        self.flush();
        self.heading = Some(HeadingContext {
            level,
            offset,
            text: String::new(),
        });
    }

    fn close_heading(&mut self) {
        if let Some(h) = self.heading.take() {
            let text = collapse_ws(&h.text).trim().to_string();
            if !text.is_empty() {
                self.blocks.push(Block::Heading {
                    level: h.level,
                    text,
                    offset: h.offset,
                });
            }
        }
    }

    fn open_item(&mut self) {
        if self.in_table_or_heading() {
            self.block_boundary();
            return;
        }
        self.flush();
        let depth = self.lists.len().saturating_sub(1).min(u8::MAX as usize) as u8;
        let marker = match self.lists.last_mut() {
            Some(list) if list.ordered => {
                let n = list.next;
                list.next += 1;
                ListMarker::Number(n)
            }
            _ => ListMarker::Bullet,
        };
        self.item = Some((depth, marker));
    }

    fn close_table(&mut self) {
        if let Some(mut t) = self.table.take() {
            t.close_cell();
            let rows: Vec<Vec<TableCell>> = t
                .rows
                .into_iter()
                .filter(|row| row.iter().any(|c| !c.is_empty()))
                .collect();
            if !rows.is_empty() {
                self.blocks.push(Block::Table { rows });
            }
        }
    }

    fn close_link(&mut self) {
        if let Some(link) = self.link.take() {
            let label = collapse_ws(&link.text).trim().to_string();
            let name = if label.is_empty() {
                link.fallback
            } else {
                label
            };
            self.push_placeholder(name);
        }
    }

    fn image(&mut self, attrs: HashMap<String, String>) {
        let src = [
            "data-export-src",
            "data-export-original-src",
            "data-src",
            "src",
        ]
        .iter()
        .find_map(|k| attrs.get(*k).map(|v| v.trim()).filter(|v| !v.is_empty()))
        .map(str::to_string);
        let Some(src) = src else { return };
        let alt = attrs
            .get("alt")
            .map(|a| collapse_ws(a).trim().to_string())
            .filter(|a| !a.is_empty());

        if self.in_table_or_heading() {
            if let Some(alt) = alt {
                self.push_text(&alt);
            }
            return;
        }

        self.flush();
        self.blocks.push(Block::Image {
            src,
            width: parse_dimension(attrs.get("width")),
            height: parse_dimension(attrs.get("height")),
            alt,
        });
    }

    fn finish(mut self) -> NormalizedPage {
        if self.link.is_some() {
            self.recovered.push("unclosed entity link".to_string());
            self.close_link();
        }
        if self.heading.is_some() {
            self.recovered.push("unclosed heading".to_string());
            self.close_heading();
        }
        if self.table.is_some() {
            self.recovered.push("unclosed table".to_string());
            self.close_table();
        }
        if let Some(skip) = self.skip.take() {
            self.recovered.push(format!("unclosed <{}>", skip.tag));
        }
        self.flush();

        let headings = self
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| match b {
                Block::Heading {
                    level,
                    text,
                    offset,
                } => Some(Heading {
                    text: text.clone(),
                    level: *level,
                    offset: *offset,
                    block_index: i,
                }),
                _ => None,
            })
            .collect();

        NormalizedPage {
            blocks: self.blocks,
            headings,
            recovered: self.recovered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::inline_text;

    fn texts(page: &NormalizedPage) -> Vec<String> {
        page.blocks
            .iter()
            .map(|b| match b {
                Block::Heading { text, .. } => format!("H:{text}"),
                Block::Paragraph { content } => inline_text(content),
                Block::ListItem {
                    marker, content, ..
                } => format!("{} {}", marker.label(), inline_text(content)),
                Block::Table { rows } => format!("T:{}", rows.len()),
                Block::Image { src, .. } => format!("I:{src}"),
                Block::Rule => "---".to_string(),
            })
            .collect()
    }

    // ── Entities / whitespace ────────────────────────────────────────────

    #[test]
    fn entities_decoded() {
        assert_eq!(decode_entities("a &amp; b&nbsp;c"), "a & b c");
        assert_eq!(decode_entities("&#65;&#x42;"), "AB");
        assert_eq!(decode_entities("&unknown; &"), "&unknown; &");
    }

    #[test]
    fn whitespace_collapsed_and_invisible_removed() {
        let p = normalize("<p>  a \n\t b\u{200B}c  </p>");
        assert_eq!(texts(&p), vec!["a bc"]);
    }

    // ── Entity links ─────────────────────────────────────────────────────

    #[test]
    fn uuid_macro_with_label() {
        let p = normalize("<p>Talk to @UUID[Actor.abc123]{Old Tom} today.</p>");
        assert_eq!(texts(&p), vec!["Talk to [Linked: Old Tom] today."]);
    }

    #[test]
    fn unlabeled_macros_use_document_type() {
        let p = normalize("<p>@UUID[Compendium.world.lore.JournalEntry.x1]</p><p>@Actor[xyz]</p><p>@UUID[abc]</p>");
        assert_eq!(
            texts(&p),
            vec![
                "[Linked: Journal Entry]",
                "[Linked: Actor]",
                "[Linked: Linked Content]"
            ]
        );
    }

    #[test]
    fn macro_labels_with_markup() {
        let p = normalize("<p>Ask @UUID[Actor.x]{<strong>Bob</strong> Smith} or [[/r 1d6]]{<em>roll</em>}.</p>");
        assert_eq!(texts(&p), vec!["Ask [Linked: Bob Smith] or roll."]);
        assert!(!texts(&p)[0].contains(['{', '}']));

        let body = "<h2>Start</h2><p>@UUID[Item.i]{<b>Rope</b>}</p><h3>Next</h3>";
        let p = normalize(body);
        assert_eq!(texts(&p), vec!["H:Start", "[Linked: Rope]", "H:Next"]);
        assert_eq!(p.headings[1].offset, body.find("<h3>").unwrap());
    }

    #[test]
    fn content_link_anchor_uses_inner_text() {
        let html = r#"<p><a class="content-link" draggable="true" data-uuid="Scene.s1" data-type="Scene"><i class="fas fa-map"></i>Old Mill</a> awaits</p>"#;
        let p = normalize(html);
        assert_eq!(texts(&p), vec!["[Linked: Old Mill] awaits"]);
        assert!(!texts(&p)[0].contains("content-link"));
    }

    #[test]
    fn content_link_falls_back_to_attributes() {
        let p = normalize(r#"<p><a class="entity-link" data-uuid="Macro.m1"></a></p>"#);
        assert_eq!(texts(&p), vec!["[Linked: Macro]"]);
        let p = normalize(r#"<p><span class="content-link" data-name="Fireball"></span></p>"#);
        assert_eq!(texts(&p), vec!["[Linked: Fireball]"]);
    }

    #[test]
    fn embed_readaloud_kept_other_embeds_removed() {
        let p = normalize(
            r#"<p>@Embed[JournalEntryPage.x readaloud="The door creaks."]</p><p>Before @Embed[Actor.y inline] after</p>"#,
        );
        assert_eq!(texts(&p), vec!["The door creaks.", "Before after"]);
    }

    #[test]
    fn inline_rolls_reduced() {
        let p = normalize("<p>Roll [[/r 1d20+5]] or [[/roll 2d6]]{damage}.</p>");
        assert_eq!(texts(&p), vec!["Roll 1d20+5 or damage."]);
    }

    #[test]
    fn placeholder_inside_heading_is_literal() {
        let p = normalize("<h2>Meet @UUID[Actor.a]{Bob}</h2>");
        assert_eq!(p.headings[0].text, "Meet [Linked: Bob]");
    }

    // ── Structure ────────────────────────────────────────────────────────

    #[test]
    fn headings_carry_level_and_offset() {
        let body = "<p>intro</p><h2>Alpha</h2><p>a</p><h3 class=\"x\">Beta</h3>";
        let p = normalize(body);
        assert_eq!(p.headings.len(), 2);
        assert_eq!(p.headings[0].level, 2);
        assert_eq!(p.headings[0].offset, body.find("<h2>").unwrap());
        assert_eq!(p.headings[1].text, "Beta");
        assert_eq!(p.headings[1].block_index, 3);
    }

    #[test]
    fn empty_heading_dropped() {
        let p = normalize("<h2> </h2><p>x</p>");
        assert!(p.headings.is_empty());
    }

    #[test]
    fn lists_get_markers_and_depth() {
        let p = normalize("<ol><li><p>one</p></li><li>two<ul><li>inner</li></ul></li></ol>");
        assert_eq!(texts(&p), vec!["1. one", "2. two", "\u{2022} inner"]);
        match &p.blocks[2] {
            Block::ListItem { depth, .. } => assert_eq!(*depth, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tables_keep_rows_and_drop_empty_ones() {
        let p = normalize(
            "<table><thead><tr><th>Roll</th><th>Result</th></tr></thead>\
             <tbody><tr><td>1</td><td>@UUID[Actor.g]{Goblin}</td></tr><tr><td> </td><td></td></tr></tbody></table>",
        );
        let Block::Table { rows } = &p.blocks[0] else {
            panic!("expected table, got {:?}", p.blocks)
        };
        assert_eq!(rows.len(), 2);
        assert!(rows[0][0].header);
        assert_eq!(inline_text(&rows[1][1].content), "[Linked: Goblin]");
    }

    #[test]
    fn image_prefers_export_src_and_parses_hints() {
        let p = normalize(
            r#"<p>x</p><img src="remote.png" data-export-src="assets/local.png" width="300px" height="auto" alt=" Map ">"#,
        );
        assert_eq!(
            p.blocks[1],
            Block::Image {
                src: "assets/local.png".into(),
                width: Some(300),
                height: None,
                alt: Some("Map".into()),
            }
        );
    }

    #[test]
    fn bold_and_italic_runs() {
        let p = normalize("<p>a <strong>b</strong> <em>c</em></p>");
        let Block::Paragraph { content } = &p.blocks[0] else {
            panic!()
        };
        assert!(content
            .iter()
            .any(|i| matches!(i, Inline::Text { text, bold: true, .. } if text == "b")));
        assert!(content
            .iter()
            .any(|i| matches!(i, Inline::Text { text, italic: true, .. } if text == "c")));
    }

    #[test]
    fn unknown_tags_keep_text_and_scripts_are_dropped() {
        let p = normalize("<section><secret>GM only</secret></section><script>alert(1)</script><p>ok</p>");
        assert_eq!(texts(&p), vec!["GM only", "ok"]);
    }

    #[test]
    fn comments_removed() {
        let p = normalize("<p>a<!-- hidden <b>x</b> -->b</p>");
        assert_eq!(texts(&p), vec!["ab"]);
    }

    // ── Recovery ─────────────────────────────────────────────────────────

    #[test]
    fn unclosed_constructs_recovered() {
        let p = normalize("<h2>Title<p>text");
        assert_eq!(p.headings.len(), 1);
        assert!(p.recovered.iter().any(|r| r.contains("heading")));

        let p = normalize("<table><tr><td>a");
        assert!(matches!(p.blocks[0], Block::Table { .. }));
        assert!(p.recovered.iter().any(|r| r.contains("table")));
    }

    #[test]
    fn stray_end_tags_and_angle_brackets_survive() {
        let p = normalize("</div></p>3 < 4 and 5 > 2");
        assert_eq!(texts(&p), vec!["3 < 4 and 5 > 2"]);
        assert!(p.recovered.is_empty());
    }

    #[test]
    fn plain_text_body() {
        let p = normalize("Just words.");
        assert_eq!(texts(&p), vec!["Just words."]);
    }
}
