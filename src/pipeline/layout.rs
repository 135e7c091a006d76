//! Pass 1: place every block of an [`AssembledDocument`] on pages.
//!
//! ```text
//! page 0        cover
//! page 1..=t    table of contents   (t known before content is placed)
//! page t+1..    content
//! ```
//!
//! The TOC is laid out first with a reserved page-number column, so its
//! page count never changes once content positions are known. Page numbers
//! and link destinations are left symbolic ([`Item::TocNumber`],
//! [`Item::Link`]) and resolved by [`crate::pipeline::render`] in pass 2.
//!
//! Coordinates are PDF user space: points, origin bottom-left.

use crate::config::ExportConfig;
use crate::error::ConversionWarning;
use crate::model::{Block, Inline, TableCell};
use crate::pipeline::assemble::{AssembledDocument, DocBlock, TitleRole, TocEntry};
use crate::pipeline::fonts::{text_width, FontStyle};
use crate::pipeline::images::{display_size, ImageCache, ImageOutcome, PreparedImage};
use crate::progress::{NoopProgressCallback, RenderProgressCallback};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Destination name of the first TOC page.
pub const TOC_ANCHOR: &str = "toc";

const LEADING: f32 = 1.3;
const CELL_PAD: f32 = 3.0;
const TOC_INDENT: f32 = 18.0;
const LIST_INDENT: f32 = 14.0;
const MAX_LIST_LEVEL: u8 = 8;

// ── Output types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Cover,
    Toc,
    Content,
}

/// A drawing instruction on one page.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Text drawn with its baseline at `y`.
    Text {
        x: f32,
        y: f32,
        size: f32,
        style: FontStyle,
        text: String,
    },
    Line {
        x0: f32,
        y0: f32,
        x1: f32,
        y1: f32,
        width: f32,
    },
    /// Stroked rectangle with its lower-left corner at (`x`, `y`).
    Rect { x: f32, y: f32, w: f32, h: f32 },
    /// Index into [`Layout::images`].
    Image {
        index: usize,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    },
    /// Page number of `anchor`, right-aligned at `right`.
    TocNumber {
        right: f32,
        y: f32,
        size: f32,
        style: FontStyle,
        anchor: String,
    },
    /// Clickable area `[x0, y0, x1, y1]` jumping to `anchor`.
    Link { rect: [f32; 4], anchor: String },
}

#[derive(Debug, Clone)]
pub struct LaidPage {
    pub kind: PageKind,
    pub items: Vec<Item>,
}

/// Where an anchor landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Destination {
    /// 0-indexed PDF page.
    pub page: usize,
    /// Top of the anchored title, in points from the bottom.
    pub top: f32,
}

/// Result of pass 1.
#[derive(Debug, Clone)]
pub struct Layout {
    pub page_size: (f32, f32),
    pub pages: Vec<LaidPage>,
    pub anchors: HashMap<String, Destination>,
    pub images: Vec<Arc<PreparedImage>>,
    pub toc: Vec<TocEntry>,
    pub toc_pages: usize,
    pub warnings: Vec<ConversionWarning>,
    pub images_embedded: usize,
    pub image_placeholders: usize,
}

impl Layout {
    /// The page `anchor` points at, 0-indexed.
    pub fn page_of(&self, anchor: &str) -> Option<usize> {
        self.anchors.get(anchor).map(|d| d.page)
    }
}

// ── Text shaping ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Word {
    text: String,
    style: FontStyle,
    space_before: bool,
    hard_break: bool,
}

/// A run of same-styled text on one line, offset from the line start.
#[derive(Debug, Clone, PartialEq)]
struct Segment {
    dx: f32,
    style: FontStyle,
    text: String,
}

fn inline_words(content: &[Inline], force_bold: bool) -> Vec<Word> {
    let mut out = Vec::new();
    let mut pending_space = false;
    let mut pending_break = false;
    for inline in content {
        match inline {
            Inline::Text { text, bold, italic } => {
                let style = FontStyle::from_flags(*bold || force_bold, *italic);
                let mut first = true;
                for w in text.split_whitespace() {
                    out.push(Word {
                        text: w.to_string(),
                        style,
                        space_before: !first
                            || pending_space
                            || text.starts_with(char::is_whitespace),
                        hard_break: pending_break,
                    });
                    first = false;
                    pending_break = false;
                }
                if first {
                    pending_space |= !text.is_empty();
                } else {
                    pending_space = text.ends_with(char::is_whitespace);
                }
            }
            Inline::EntityPlaceholder { name } => {
                out.push(Word {
                    text: Inline::placeholder_text(name),
                    style: FontStyle::from_flags(force_bold, true),
                    space_before: pending_space,
                    hard_break: pending_break,
                });
                pending_space = false;
                pending_break = false;
            }
            Inline::LineBreak => {
                // a second break in a row leaves a blank line
                if pending_break {
                    out.push(Word {
                        text: String::new(),
                        style: FontStyle::Regular,
                        space_before: false,
                        hard_break: true,
                    });
                }
                pending_break = true;
                pending_space = false;
            }
        }
    }
    out
}

fn plain_words(text: &str, style: FontStyle) -> Vec<Word> {
    text.split_whitespace()
        .map(|w| Word {
            text: w.to_string(),
            style,
            space_before: true,
            hard_break: false,
        })
        .collect()
}

fn push_piece(line: &mut Vec<Segment>, x: &mut f32, text: &str, style: FontStyle, space: bool, size: f32) {
    let sp = if space && !line.is_empty() {
        text_width(" ", style, size)
    } else {
        0.0
    };
    match line.last_mut() {
        Some(last) if last.style == style => {
            if sp > 0.0 {
                last.text.push(' ');
            }
            last.text.push_str(text);
        }
        _ => line.push(Segment {
            dx: *x + sp,
            style,
            text: text.to_string(),
        }),
    }
    *x += sp + text_width(text, style, size);
}

/// Greedy line breaking. Words wider than `width` are split by character.
fn wrap(words: &[Word], width: f32, size: f32) -> Vec<Vec<Segment>> {
    let mut lines: Vec<Vec<Segment>> = Vec::new();
    let mut line: Vec<Segment> = Vec::new();
    let mut x = 0.0f32;

    for (i, w) in words.iter().enumerate() {
        if w.hard_break && i > 0 {
            lines.push(std::mem::take(&mut line));
            x = 0.0;
        }
        if w.text.is_empty() {
            continue;
        }
        let ww = text_width(&w.text, w.style, size);
        let sp = if w.space_before && !line.is_empty() {
            text_width(" ", w.style, size)
        } else {
            0.0
        };
        if !line.is_empty() && x + sp + ww > width {
            lines.push(std::mem::take(&mut line));
            x = 0.0;
        }
        if ww <= width {
            push_piece(&mut line, &mut x, &w.text, w.style, w.space_before, size);
            continue;
        }
        let mut chunk = String::new();
        for c in w.text.chars() {
            chunk.push(c);
            if text_width(&chunk, w.style, size) > width - x && chunk.chars().count() > 1 {
                chunk.pop();
                push_piece(&mut line, &mut x, &chunk, w.style, false, size);
                lines.push(std::mem::take(&mut line));
                x = 0.0;
                chunk.clear();
                chunk.push(c);
            }
        }
        if !chunk.is_empty() {
            push_piece(&mut line, &mut x, &chunk, w.style, false, size);
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

fn line_width(line: &[Segment], size: f32) -> f32 {
    line.last()
        .map(|s| s.dx + text_width(&s.text, s.style, size))
        .unwrap_or(0.0)
}

// ── Page cursor ──────────────────────────────────────────────────────────

struct Cursor {
    width: f32,
    height: f32,
    margin: f32,
    pages: Vec<LaidPage>,
    /// Top of the free space on the current page.
    y: f32,
}

impl Cursor {
    fn x0(&self) -> f32 {
        self.margin
    }

    fn x1(&self) -> f32 {
        self.width - self.margin
    }

    fn top(&self) -> f32 {
        self.height - self.margin
    }

    fn bottom(&self) -> f32 {
        self.margin
    }

    fn content_width(&self) -> f32 {
        self.x1() - self.x0()
    }

    fn content_height(&self) -> f32 {
        self.top() - self.bottom()
    }

    fn page_index(&self) -> usize {
        self.pages.len().saturating_sub(1)
    }

    fn at_top(&self) -> bool {
        self.y >= self.top()
    }

    fn new_page(&mut self, kind: PageKind) {
        self.pages.push(LaidPage {
            kind,
            items: Vec::new(),
        });
        self.y = self.top();
    }

    /// Start a new page unless `h` points still fit (or the page is empty).
    fn ensure(&mut self, h: f32, kind: PageKind) {
        if self.y - h < self.bottom() && !self.at_top() {
            self.new_page(kind);
        }
    }

    fn push(&mut self, item: Item) {
        if let Some(p) = self.pages.last_mut() {
            p.items.push(item);
        }
    }

    fn gap(&mut self, h: f32) {
        if !self.at_top() {
            self.y = (self.y - h).max(self.bottom());
        }
    }

    /// Draw wrapped lines starting at the cursor, breaking pages as needed.
    fn lines(&mut self, lines: &[Vec<Segment>], x: f32, size: f32, kind: PageKind) {
        let lh = size * LEADING;
        for line in lines {
            self.ensure(lh, kind);
            let baseline = self.y - size;
            for seg in line {
                self.push(Item::Text {
                    x: x + seg.dx,
                    y: baseline,
                    size,
                    style: seg.style,
                    text: seg.text.clone(),
                });
            }
            self.y -= lh;
        }
    }
}

// ── Styles ───────────────────────────────────────────────────────────────

struct Sizes {
    body: f32,
}

impl Sizes {
    fn cover(&self) -> f32 {
        self.body * 2.8
    }
    fn journal(&self) -> f32 {
        self.body * 2.2
    }
    fn page_title(&self) -> f32 {
        self.body * 1.6
    }
    fn heading(&self, level: u8) -> f32 {
        match level {
            0 | 1 => self.body * 1.4,
            2 => self.body * 1.3,
            3 => self.body * 1.1,
            _ => self.body,
        }
    }
    fn table(&self) -> f32 {
        self.body * 0.9
    }
    /// (size, style, indent) of a TOC line at `depth`.
    fn toc(&self, depth: usize) -> (f32, FontStyle, f32) {
        match depth {
            0 => (self.body * 1.2, FontStyle::Bold, 0.0),
            1 => (self.body, FontStyle::Regular, TOC_INDENT),
            d => (
                self.body * 0.9,
                FontStyle::Regular,
                TOC_INDENT * (d.min(5) as f32),
            ),
        }
    }
}

// ── Pass 1 ───────────────────────────────────────────────────────────────

/// Lay out `doc` on pages.
pub fn layout(doc: &AssembledDocument, config: &ExportConfig) -> Layout {
    let (width, height) = config.page_size();
    let sizes = Sizes {
        body: config.body_font_size,
    };
    let noop = NoopProgressCallback;
    let progress: &dyn RenderProgressCallback = match &config.progress_callback {
        Some(cb) => cb.as_ref(),
        None => &noop,
    };

    let mut cur = Cursor {
        width,
        height,
        margin: config.margin_pt,
        pages: Vec::new(),
        y: 0.0,
    };
    let mut anchors = HashMap::new();

    cover(&mut cur, doc, &sizes);
    let toc_start = cur.pages.len();
    toc_pages(&mut cur, &doc.toc, &sizes);
    let toc_pages = cur.pages.len() - toc_start;
    anchors.insert(
        TOC_ANCHOR.to_string(),
        Destination {
            page: toc_start,
            top: cur.top(),
        },
    );
    debug!("TOC needs {} page(s) for {} entries", toc_pages, doc.toc.len());

    let mut state = ContentState {
        images: Vec::new(),
        image_index: HashMap::new(),
        warnings: Vec::new(),
        embedded: 0,
        placeholders: 0,
    };
    let mut cache = ImageCache::new(&config.capabilities);

    cur.new_page(PageKind::Content);
    let mut current_part = None;
    for (i, block) in doc.blocks.iter().enumerate() {
        if let Some(next) = doc.parts.iter().position(|p| p.first_block == i) {
            if let Some(prev) = current_part.replace(next) {
                progress.on_journal_complete(prev, doc.parts.len(), &doc.parts[prev].title);
            }
            progress.on_journal_start(next, doc.parts.len(), &doc.parts[next].title);
        }

        match block {
            DocBlock::PageBreak => {
                if !cur.at_top() {
                    cur.new_page(PageKind::Content);
                }
            }
            DocBlock::Divider { title, anchor } => {
                if !cur.at_top() {
                    cur.new_page(PageKind::Content);
                }
                anchors.insert(
                    anchor.clone(),
                    Destination {
                        page: cur.page_index(),
                        top: cur.top(),
                    },
                );
                let size = sizes.journal() * 1.2;
                let lines = wrap(&plain_words(title, FontStyle::Bold), cur.content_width(), size);
                let block_h = lines.len() as f32 * size * LEADING;
                cur.y = (height + block_h) / 2.0;
                for line in &lines {
                    let x = (width - line_width(line, size)) / 2.0;
                    cur.lines(std::slice::from_ref(line), x, size, PageKind::Content);
                }
                cur.new_page(PageKind::Content);
            }
            DocBlock::Title {
                text,
                role,
                level,
                anchor,
            } => {
                let size = match role {
                    TitleRole::Journal => sizes.journal(),
                    TitleRole::Page => sizes.page_title(),
                    TitleRole::Heading => sizes.heading(*level),
                };
                let lines = wrap(&plain_words(text, FontStyle::Bold), cur.content_width(), size);
                let title_h = lines.len() as f32 * size * LEADING;
                cur.gap(size * 0.6);
                // keep with the next two body lines
                cur.ensure(title_h + 2.0 * sizes.body * LEADING, PageKind::Content);
                anchors.insert(
                    anchor.clone(),
                    Destination {
                        page: cur.page_index(),
                        top: cur.y,
                    },
                );
                let x = cur.x0();
                cur.lines(&lines, x, size, PageKind::Content);
                cur.gap(size * 0.3);
            }
            DocBlock::Content { part, page, block } => {
                let assets = doc.parts.get(*part).map(|p| p.assets.as_ref());
                content_block(&mut cur, &sizes, config, block, |src, hint| {
                    let asset = assets.and_then(|a| a.resolve(src));
                    cache.get(*part, asset, src, hint)
                }, page, &mut state, progress);
            }
        }
    }
    if let Some(prev) = current_part {
        progress.on_journal_complete(prev, doc.parts.len(), &doc.parts[prev].title);
    }
    if cur.pages.last().is_some_and(|p| p.items.is_empty()) && cur.pages.len() > toc_start + toc_pages + 1 {
        cur.pages.pop();
    }

    progress.on_layout_complete(cur.pages.len());
    info!(
        "Layout complete: {} page(s), {} image(s) embedded, {} placeholder(s)",
        cur.pages.len(),
        state.embedded,
        state.placeholders
    );

    Layout {
        page_size: (width, height),
        pages: cur.pages,
        anchors,
        images: state.images,
        toc: doc.toc.clone(),
        toc_pages,
        warnings: state.warnings,
        images_embedded: state.embedded,
        image_placeholders: state.placeholders,
    }
}

fn cover(cur: &mut Cursor, doc: &AssembledDocument, sizes: &Sizes) {
    cur.new_page(PageKind::Cover);
    let size = sizes.cover();
    let lines = wrap(&plain_words(&doc.title, FontStyle::Bold), cur.content_width(), size);
    cur.y = cur.height * 0.62;
    for line in &lines {
        let x = (cur.width - line_width(line, size)) / 2.0;
        cur.lines(std::slice::from_ref(line), x, size, PageKind::Cover);
    }
    if doc.parts.len() > 1 {
        cur.y -= size * 0.8;
        let sub = sizes.body * 1.2;
        for p in &doc.parts {
            let lines = wrap(&plain_words(&p.title, FontStyle::Regular), cur.content_width(), sub);
            for line in &lines {
                if cur.y - sub * LEADING < cur.bottom() {
                    return;
                }
                let x = (cur.width - line_width(line, sub)) / 2.0;
                cur.lines(std::slice::from_ref(line), x, sub, PageKind::Cover);
            }
        }
    }
}

fn toc_pages(cur: &mut Cursor, toc: &[TocEntry], sizes: &Sizes) {
    cur.new_page(PageKind::Toc);
    let hsize = sizes.page_title();
    let x0 = cur.x0();
    let heading = wrap(
        &plain_words("Table of Contents", FontStyle::Bold),
        cur.content_width(),
        hsize,
    );
    cur.lines(&heading, x0, hsize, PageKind::Toc);
    cur.gap(hsize * 0.6);

    for entry in toc {
        let (size, style, indent) = sizes.toc(entry.depth);
        let number_col = text_width("0000", style, size);
        let x = cur.x0() + indent;
        let label_w = (cur.x1() - x - number_col - 6.0).max(size * 4.0);
        let lines = wrap(&plain_words(&entry.label, style), label_w, size);
        let lh = size * LEADING;

        if entry.depth == 0 {
            cur.gap(size * 0.5);
        }
        cur.ensure(lh * lines.len().min(2) as f32, PageKind::Toc);
        let last = lines.len().saturating_sub(1);
        for (i, line) in lines.iter().enumerate() {
            cur.ensure(lh, PageKind::Toc);
            let baseline = cur.y - size;
            for seg in line {
                cur.push(Item::Text {
                    x: x + seg.dx,
                    y: baseline,
                    size,
                    style: seg.style,
                    text: seg.text.clone(),
                });
            }
            if i == last {
                let start = x + line_width(line, size) + 3.0;
                let end = cur.x1() - number_col - 3.0;
                let dot = text_width(".", FontStyle::Regular, size);
                let count = ((end - start) / dot).floor();
                if count >= 2.0 {
                    cur.push(Item::Text {
                        x: end - count * dot,
                        y: baseline,
                        size,
                        style: FontStyle::Regular,
                        text: ".".repeat(count as usize),
                    });
                }
                cur.push(Item::TocNumber {
                    right: cur.x1(),
                    y: baseline,
                    size,
                    style,
                    anchor: entry.anchor.clone(),
                });
            }
            cur.push(Item::Link {
                rect: [x, baseline - size * 0.25, cur.x1(), baseline + size],
                anchor: entry.anchor.clone(),
            });
            cur.y -= lh;
        }
    }
}

struct ContentState {
    images: Vec<Arc<PreparedImage>>,
    image_index: HashMap<*const PreparedImage, usize>,
    warnings: Vec<ConversionWarning>,
    embedded: usize,
    placeholders: usize,
}

impl ContentState {
    fn warn(&mut self, w: ConversionWarning, progress: &dyn RenderProgressCallback) {
        warn!("{w}");
        progress.on_warning(&w.to_string());
        self.warnings.push(w);
    }

    fn image_slot(&mut self, img: &Arc<PreparedImage>) -> usize {
        let key = Arc::as_ptr(img);
        if let Some(&i) = self.image_index.get(&key) {
            return i;
        }
        self.images.push(Arc::clone(img));
        self.image_index.insert(key, self.images.len() - 1);
        self.images.len() - 1
    }
}

#[allow(clippy::too_many_arguments)]
fn content_block<F>(
    cur: &mut Cursor,
    sizes: &Sizes,
    config: &ExportConfig,
    block: &Block,
    mut image: F,
    page: &str,
    state: &mut ContentState,
    progress: &dyn RenderProgressCallback,
) where
    F: FnMut(&str, Option<u32>) -> ImageOutcome,
{
    let size = sizes.body;
    let x0 = cur.x0();
    match block {
        Block::Paragraph { content } => {
            let lines = wrap(&inline_words(content, false), cur.content_width(), size);
            cur.lines(&lines, x0, size, PageKind::Content);
            cur.gap(size * 0.6);
        }
        Block::ListItem {
            depth,
            marker,
            content,
        } => {
            let level = f32::from((*depth).min(MAX_LIST_LEVEL));
            let marker_x = x0 + LIST_INDENT * level;
            let label = marker.label();
            let text_x = marker_x + (text_width(&label, FontStyle::Regular, size) + 5.0).max(LIST_INDENT);
            let lines = wrap(&inline_words(content, false), cur.x1() - text_x, size);
            cur.ensure(size * LEADING, PageKind::Content);
            cur.push(Item::Text {
                x: marker_x,
                y: cur.y - size,
                size,
                style: FontStyle::Regular,
                text: label,
            });
            if lines.is_empty() {
                cur.y -= size * LEADING;
            }
            cur.lines(&lines, text_x, size, PageKind::Content);
            cur.gap(size * 0.25);
        }
        Block::Table { rows } => table(cur, sizes, rows),
        Block::Image {
            src, width, height, ..
        } => match image(src, *width) {
            ImageOutcome::Ready(img) => {
                let (w, h) = display_size(
                    (img.width, img.height),
                    *width,
                    *height,
                    cur.content_width(),
                    cur.content_height() * config.max_image_height_ratio,
                );
                cur.ensure(h, PageKind::Content);
                let index = state.image_slot(&img);
                cur.push(Item::Image {
                    index,
                    x: x0,
                    y: cur.y - h,
                    w,
                    h,
                });
                cur.y -= h;
                cur.gap(size * 0.6);
                state.embedded += 1;
            }
            ImageOutcome::Missing => {
                state.warn(
                    ConversionWarning::AssetMissing {
                        page: page.to_string(),
                        src: src.clone(),
                    },
                    progress,
                );
                caption(cur, size, &format!("[Missing image: {src}]"));
                state.placeholders += 1;
            }
            ImageOutcome::Unavailable(reason) => {
                state.warn(
                    ConversionWarning::ImageUnavailable {
                        page: page.to_string(),
                        src: src.clone(),
                        reason,
                    },
                    progress,
                );
                caption(cur, size, &format!("[Image unavailable: {src}]"));
                state.placeholders += 1;
            }
        },
        Block::Rule => {
            cur.ensure(size, PageKind::Content);
            let y = cur.y - size / 2.0;
            let x1 = cur.x1();
            cur.push(Item::Line {
                x0,
                y0: y,
                x1,
                y1: y,
                width: 0.5,
            });
            cur.y -= size;
        }
        Block::Heading { .. } => {}
    }
}

/// Placeholder text kept on one line whenever it fits.
fn caption(cur: &mut Cursor, size: f32, text: &str) {
    let x0 = cur.x0();
    let words = if text_width(text, FontStyle::Italic, size) <= cur.content_width() {
        vec![Word {
            text: text.to_string(),
            style: FontStyle::Italic,
            space_before: false,
            hard_break: false,
        }]
    } else {
        plain_words(text, FontStyle::Italic)
    };
    let lines = wrap(&words, cur.content_width(), size);
    cur.lines(&lines, x0, size, PageKind::Content);
    cur.gap(size * 0.6);
}

fn table(cur: &mut Cursor, sizes: &Sizes, rows: &[Vec<TableCell>]) {
    let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    if cols == 0 {
        return;
    }
    let size = sizes.table();
    let lh = size * LEADING;
    let col_w = cur.content_width() / cols as f32;
    let page_lines = ((cur.content_height() - 2.0 * CELL_PAD) / lh).floor().max(1.0) as usize;

    for row in rows {
        let cells: Vec<Vec<Vec<Segment>>> = row
            .iter()
            .map(|c| wrap(&inline_words(&c.content, c.header), col_w - 2.0 * CELL_PAD, size))
            .collect();
        let line_count = cells.iter().map(Vec::len).max().unwrap_or(0).max(1);
        if line_count <= page_lines {
            cur.ensure(line_count as f32 * lh + 2.0 * CELL_PAD, PageKind::Content);
        } else {
            debug!("Table row of {line_count} lines continues over several pages");
        }

        // Rows taller than the free space are split into slices, one per
        // page, each with its own borders.
        let mut done = 0;
        while done < line_count {
            let free = ((cur.y - cur.bottom() - 2.0 * CELL_PAD) / lh).floor().max(0.0) as usize;
            if free == 0 && !cur.at_top() {
                cur.new_page(PageKind::Content);
                continue;
            }
            let take = free.max(1).min(line_count - done);
            table_slice(cur, &cells, cols, col_w, size, done..done + take);
            done += take;
            if done < line_count {
                cur.new_page(PageKind::Content);
            }
        }
    }
    cur.gap(sizes.body * 0.6);
}

/// Draw lines `range` of every cell of one row as a band of bordered cells.
fn table_slice(
    cur: &mut Cursor,
    cells: &[Vec<Vec<Segment>>],
    cols: usize,
    col_w: f32,
    size: f32,
    range: std::ops::Range<usize>,
) {
    let lh = size * LEADING;
    let row_h = range.len() as f32 * lh + 2.0 * CELL_PAD;
    let top = cur.y;
    for c in 0..cols {
        let x = cur.x0() + c as f32 * col_w;
        cur.push(Item::Rect {
            x,
            y: top - row_h,
            w: col_w,
            h: row_h,
        });
        let Some(lines) = cells.get(c) else {
            continue;
        };
        let slice = lines.get(range.start..range.end.min(lines.len())).unwrap_or_default();
        for (i, line) in slice.iter().enumerate() {
            let baseline = top - CELL_PAD - i as f32 * lh - size;
            for seg in line {
                cur.push(Item::Text {
                    x: x + CELL_PAD + seg.dx,
                    y: baseline,
                    size,
                    style: seg.style,
                    text: seg.text.clone(),
                });
            }
        }
    }
    cur.y = top - row_h;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssetStore, JournalEntry, Page};
    use crate::pipeline::assemble::assemble;
    use crate::pipeline::normalize::normalize;
    use crate::selection::SelectionModel;

    fn journal(title: &str, bodies: &[(&str, &str)]) -> JournalEntry {
        JournalEntry {
            id: title.into(),
            title: title.into(),
            pages: bodies
                .iter()
                .map(|(t, b)| {
                    let n = normalize(b);
                    Page {
                        id: t.to_string(),
                        title: t.to_string(),
                        level: 1,
                        sort: 0,
                        body: b.to_string(),
                        blocks: n.blocks,
                        headings: n.headings,
                    }
                })
                .collect(),
            assets: Arc::new(AssetStore::new()),
        }
    }

    fn laid(js: &[JournalEntry], config: &ExportConfig) -> Layout {
        let sel = SelectionModel::build(js);
        let doc = assemble(js, &sel, config, None).unwrap();
        layout(&doc, config)
    }

    fn all_text(l: &Layout) -> Vec<String> {
        l.pages
            .iter()
            .flat_map(|p| &p.items)
            .filter_map(|i| match i {
                Item::Text { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn wrap_respects_width_and_styles() {
        let words = inline_words(
            &[
                Inline::plain("alpha beta "),
                Inline::Text {
                    text: "gamma".into(),
                    bold: true,
                    italic: false,
                },
                Inline::plain(" delta"),
            ],
            false,
        );
        let lines = wrap(&words, 1000.0, 10.0);
        assert_eq!(lines.len(), 1);
        let texts: Vec<&str> = lines[0].iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma", "delta"]);
        let narrow = wrap(&words, 40.0, 10.0);
        assert!(narrow.len() >= 3);
        for l in &narrow {
            assert!(line_width(l, 10.0) <= 40.0 + 1e-3);
        }
    }

    #[test]
    fn long_words_are_split() {
        let words = plain_words(&"x".repeat(200), FontStyle::Regular);
        let lines = wrap(&words, 50.0, 10.0);
        assert!(lines.len() > 5);
        assert!(lines.iter().all(|l| line_width(l, 10.0) <= 50.0 + 1e-3));
    }

    #[test]
    fn placeholder_is_one_unbroken_run() {
        let words = inline_words(
            &[
                Inline::plain("See "),
                Inline::EntityPlaceholder {
                    name: "Goblin Boss".into(),
                },
            ],
            false,
        );
        let lines = wrap(&words, 500.0, 10.0);
        assert!(lines[0].iter().any(|s| s.text == "[Linked: Goblin Boss]"));
    }

    #[test]
    fn page_order_and_anchors() {
        let js = vec![journal("J", &[("P", "<p>hi</p><h2>H</h2><p>x</p>")])];
        let l = laid(&js, &ExportConfig::default());
        assert_eq!(l.pages[0].kind, PageKind::Cover);
        assert_eq!(l.pages[1].kind, PageKind::Toc);
        assert_eq!(l.toc_pages, 1);
        assert_eq!(l.pages[2].kind, PageKind::Content);
        assert_eq!(l.page_of(TOC_ANCHOR), Some(1));
        assert_eq!(l.page_of("j0-p0"), Some(2));
        assert_eq!(l.page_of("j0-p0-h0"), Some(2));
        let numbers = l.pages[1]
            .items
            .iter()
            .filter(|i| matches!(i, Item::TocNumber { .. }))
            .count();
        assert_eq!(numbers, 2);
    }

    #[test]
    fn many_toc_entries_span_pages() {
        let body: String = (0..120).map(|i| format!("<h2>Section {i}</h2><p>t</p>")).collect();
        let js = vec![journal("J", &[("P", body.as_str())])];
        let l = laid(&js, &ExportConfig::default());
        assert!(l.toc_pages >= 2);
        assert!(l.pages[1..=l.toc_pages].iter().all(|p| p.kind == PageKind::Toc));
        assert_eq!(l.page_of(TOC_ANCHOR), Some(1));
    }

    #[test]
    fn missing_images_get_captions_and_warnings() {
        let js = vec![journal(
            "J",
            &[(
                "P",
                "<img src=\"a.png\"><img src=\"b.png\"><p>t</p><img src=\"c.webp\">",
            )],
        )];
        let l = laid(&js, &ExportConfig::default());
        let captions = all_text(&l)
            .iter()
            .filter(|t| t.starts_with("[Missing image:"))
            .count();
        assert_eq!(captions, 3);
        assert_eq!(l.image_placeholders, 3);
        assert_eq!(l.warnings.len(), 3);
    }

    #[test]
    fn divider_pages_for_multiple_journals() {
        let js = vec![
            journal("A", &[("P1", "<p>a</p>")]),
            journal("B", &[("P2", "<p>b</p>")]),
        ];
        let l = laid(&js, &ExportConfig::default());
        let a = l.page_of("j0").unwrap();
        let p1 = l.page_of("j0-p0").unwrap();
        let b = l.page_of("j1").unwrap();
        let p2 = l.page_of("j1-p0").unwrap();
        assert!(a < p1 && p1 < b && b < p2);
        assert_eq!(p1, a + 1);
    }

    #[test]
    fn tables_draw_cell_borders() {
        let js = vec![journal(
            "J",
            &[("P", "<table><tr><th>A</th><th>B</th></tr><tr><td>1</td><td>2</td></tr></table>")],
        )];
        let l = laid(&js, &ExportConfig::default());
        let rects = l
            .pages
            .iter()
            .flat_map(|p| &p.items)
            .filter(|i| matches!(i, Item::Rect { .. }))
            .count();
        assert_eq!(rects, 4);
    }

    fn text_x(l: &Layout, wanted: &str) -> Option<f32> {
        l.pages.iter().flat_map(|p| &p.items).find_map(|i| match i {
            Item::Text { text, x, .. } if text == wanted => Some(*x),
            _ => None,
        })
    }

    #[test]
    fn nested_list_items_are_indented() {
        let js = vec![journal(
            "J",
            &[("P", "<ul><li>outer</li><li>o2<ul><li>inner</li></ul></li></ul>")],
        )];
        let l = laid(&js, &ExportConfig::default());
        let outer = text_x(&l, "outer").unwrap();
        let inner = text_x(&l, "inner").unwrap();
        assert!((inner - outer - LIST_INDENT).abs() < 1e-3, "outer {outer}, inner {inner}");
    }

    #[test]
    fn tall_table_cells_continue_on_the_next_page() {
        let words: Vec<String> = (0..3000).map(|i| format!("w{i}")).collect();
        let body = format!(
            "<table><tr><td>{}</td><td>short</td></tr><tr><td>after</td><td>row</td></tr></table>",
            words.join(" ")
        );
        let js = vec![journal("J", &[("P", body.as_str())])];
        let l = laid(&js, &ExportConfig::default());

        let seen: Vec<String> = all_text(&l)
            .iter()
            .flat_map(|t| t.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|w| w.starts_with('w') && w[1..].chars().all(|c| c.is_ascii_digit()))
            .collect();
        assert_eq!(seen, words);

        let pages_with_cells = l
            .pages
            .iter()
            .filter(|p| p.items.iter().any(|i| matches!(i, Item::Rect { .. })))
            .count();
        assert!(pages_with_cells >= 2);
        assert!(all_text(&l).iter().any(|t| t == "after"));
        assert!(l.warnings.is_empty());
    }
}
