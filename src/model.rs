//! In-memory model of an opened journal export.
//!
//! ```text
//! JournalEntry ──▶ Page ──▶ Heading
//!      │            └─────▶ Block (normalized content)
//!      └─▶ Arc<AssetStore> ──▶ Asset
//! ```
//!
//! Everything here is immutable once the export is loaded. Inclusion flags
//! live in [`crate::selection::SelectionModel`], never on these types.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ── Journals and pages ───────────────────────────────────────────────────

/// A named document composed of ordered pages.
#[derive(Clone, Serialize)]
pub struct JournalEntry {
    pub id: String,
    pub title: String,
    pub pages: Vec<Page>,
    /// Assets of the export this journal was read from.
    #[serde(skip)]
    pub assets: Arc<AssetStore>,
}

impl fmt::Debug for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalEntry")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("pages", &self.pages.len())
            .field("assets", &self.assets.len())
            .finish()
    }
}

impl JournalEntry {
    pub fn heading_count(&self) -> usize {
        self.pages.iter().map(|p| p.headings.len()).sum()
    }
}

/// One journal page: a title plus a markup body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    /// Title level from the export (`title.level`), 1 when absent.
    pub level: u8,
    pub sort: i64,
    /// Raw markup exactly as exported.
    pub body: String,
    /// Normalized content derived from `body`.
    pub blocks: Vec<Block>,
    /// Headings found in `body`, in document order.
    pub headings: Vec<Heading>,
}

impl Page {
    /// Blocks before the first heading.
    pub fn preface(&self) -> &[Block] {
        let end = self
            .headings
            .first()
            .map(|h| h.block_index)
            .unwrap_or(self.blocks.len());
        &self.blocks[..end]
    }

    /// Blocks belonging to heading `index`, excluding the heading block itself.
    pub fn section(&self, index: usize) -> &[Block] {
        let Some(h) = self.headings.get(index) else {
            return &[];
        };
        let start = (h.block_index + 1).min(self.blocks.len());
        let end = self
            .headings
            .get(index + 1)
            .map(|n| n.block_index)
            .unwrap_or(self.blocks.len());
        &self.blocks[start..end.max(start)]
    }

    /// Image sources referenced anywhere in the page.
    pub fn image_sources(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Image { src, .. } => Some(src.as_str()),
            _ => None,
        })
    }
}

/// A heading found in a page body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub text: String,
    pub level: u8,
    /// Byte offset of the opening tag in [`Page::body`].
    pub offset: usize,
    /// Index of the matching [`Block::Heading`] in [`Page::blocks`].
    pub block_index: usize,
}

// ── Normalized content ───────────────────────────────────────────────────

/// A renderable unit of normalized page content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Heading {
        level: u8,
        text: String,
        offset: usize,
    },
    Paragraph {
        content: Vec<Inline>,
    },
    ListItem {
        depth: u8,
        marker: ListMarker,
        content: Vec<Inline>,
    },
    Table {
        rows: Vec<Vec<TableCell>>,
    },
    Image {
        src: String,
        width: Option<u32>,
        height: Option<u32>,
        alt: Option<String>,
    },
    Rule,
}

/// Inline content inside paragraphs, list items and table cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inline {
    Text {
        text: String,
        bold: bool,
        italic: bool,
    },
    /// A rewritten reference to another platform object.
    EntityPlaceholder { name: String },
    LineBreak,
}

impl Inline {
    pub fn plain(text: impl Into<String>) -> Self {
        Inline::Text {
            text: text.into(),
            bold: false,
            italic: false,
        }
    }

    /// The literal text an entity reference is rendered as.
    pub fn placeholder_text(name: &str) -> String {
        format!("[Linked: {name}]")
    }
}

/// Flatten inline content to plain text.
pub fn inline_text(content: &[Inline]) -> String {
    let mut out = String::new();
    for i in content {
        match i {
            Inline::Text { text, .. } => out.push_str(text),
            Inline::EntityPlaceholder { name } => out.push_str(&Inline::placeholder_text(name)),
            Inline::LineBreak => out.push(' '),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListMarker {
    Bullet,
    Number(u32),
}

impl ListMarker {
    pub fn label(&self) -> String {
        match self {
            ListMarker::Bullet => "\u{2022}".to_string(),
            ListMarker::Number(n) => format!("{n}."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub header: bool,
    pub content: Vec<Inline>,
}

impl TableCell {
    pub fn is_empty(&self) -> bool {
        inline_text(&self.content).trim().is_empty()
    }
}

// ── Assets ───────────────────────────────────────────────────────────────

/// A binary file shipped with the export.
#[derive(Clone, Serialize)]
pub struct Asset {
    /// Path relative to the export root, `/`-separated.
    pub filename: String,
    #[serde(skip)]
    pub data: Vec<u8>,
    pub mime: String,
    /// Ids of pages whose markup references this asset.
    pub referenced_by: Vec<String>,
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("filename", &self.filename)
            .field("bytes", &self.data.len())
            .field("mime", &self.mime)
            .field("referenced_by", &self.referenced_by)
            .finish()
    }
}

impl Asset {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        let filename = filename.into();
        let mime = mime_for(&filename).to_string();
        Self {
            filename,
            data,
            mime,
            referenced_by: Vec::new(),
        }
    }
}

/// MIME type derived from a file extension.
pub fn mime_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// All assets of one export, keyed by root-relative path.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    assets: BTreeMap<String, Asset>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: Asset) {
        self.assets.insert(asset.filename.clone(), asset);
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn get(&self, key: &str) -> Option<&Asset> {
        self.assets.get(key)
    }

    /// Find the asset an image `src` refers to.
    ///
    /// Tries, in order: the path as written, percent-decoded, with an
    /// `assets/` prefix, without a leading `assets/` segment, and finally
    /// any asset with the same file name.
    pub fn resolve(&self, src: &str) -> Option<&Asset> {
        self.resolve_key(src).and_then(|k| self.assets.get(&k))
    }

    /// Record that page `page_id` references `src`. Returns false when the
    /// source cannot be resolved.
    pub fn mark_reference(&mut self, src: &str, page_id: &str) -> bool {
        let Some(key) = self.resolve_key(src) else {
            return false;
        };
        if let Some(asset) = self.assets.get_mut(&key) {
            if !asset.referenced_by.iter().any(|p| p == page_id) {
                asset.referenced_by.push(page_id.to_string());
            }
        }
        true
    }

    fn resolve_key(&self, src: &str) -> Option<String> {
        let trimmed = src.trim();
        let trimmed = trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or(trimmed)
            .trim_start_matches("./")
            .trim_start_matches('/');
        let decoded = percent_decode_str(trimmed).decode_utf8_lossy().to_string();

        for cand in [trimmed, decoded.as_str()] {
            if cand.is_empty() {
                continue;
            }
            if self.assets.contains_key(cand) {
                return Some(cand.to_string());
            }
            let prefixed = format!("assets/{cand}");
            if self.assets.contains_key(&prefixed) {
                return Some(prefixed);
            }
            if let Some(rest) = strip_assets_prefix(cand) {
                let k = format!("assets/{rest}");
                if self.assets.contains_key(&k) {
                    return Some(k);
                }
            }
        }

        let base = decoded.rsplit('/').next().unwrap_or(&decoded);
        if base.is_empty() {
            return None;
        }
        self.assets
            .keys()
            .find(|k| k.rsplit('/').next() == Some(base))
            .cloned()
    }
}

fn strip_assets_prefix(path: &str) -> Option<&str> {
    let (head, rest) = path.split_once('/')?;
    head.eq_ignore_ascii_case("assets").then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AssetStore {
        let mut s = AssetStore::new();
        s.insert(Asset::new("assets/maps/cave map.png", vec![1, 2, 3]));
        s.insert(Asset::new("assets/token.webp", vec![4]));
        s
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for("a/B.JPG"), "image/jpeg");
        assert_eq!(mime_for("x.svg"), "image/svg+xml");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[test]
    fn resolve_exact_and_prefixed() {
        let s = store();
        assert!(s.resolve("assets/token.webp").is_some());
        assert!(s.resolve("token.webp").is_some());
        assert!(s.resolve("./assets/token.webp").is_some());
        assert!(s.resolve("Assets/token.webp").is_some());
    }

    #[test]
    fn resolve_percent_encoded_and_basename() {
        let s = store();
        assert!(s.resolve("assets/maps/cave%20map.png").is_some());
        assert!(s.resolve("worlds/demo/uploads/cave map.png").is_some());
        assert!(s.resolve("assets/token.webp?v=2").is_some());
        assert!(s.resolve("missing.png").is_none());
        assert!(s.resolve("").is_none());
    }

    #[test]
    fn mark_reference_is_idempotent() {
        let mut s = store();
        assert!(s.mark_reference("token.webp", "p1"));
        assert!(s.mark_reference("assets/token.webp", "p1"));
        assert!(s.mark_reference("token.webp", "p2"));
        assert!(!s.mark_reference("nope.png", "p1"));
        assert_eq!(
            s.get("assets/token.webp").unwrap().referenced_by,
            vec!["p1".to_string(), "p2".to_string()]
        );
    }

    #[test]
    fn page_preface_and_sections() {
        let page = Page {
            id: "p".into(),
            title: "P".into(),
            level: 1,
            sort: 0,
            body: String::new(),
            blocks: vec![
                Block::Paragraph {
                    content: vec![Inline::plain("intro")],
                },
                Block::Heading {
                    level: 2,
                    text: "A".into(),
                    offset: 10,
                },
                Block::Paragraph {
                    content: vec![Inline::plain("a")],
                },
                Block::Heading {
                    level: 3,
                    text: "B".into(),
                    offset: 30,
                },
            ],
            headings: vec![
                Heading {
                    text: "A".into(),
                    level: 2,
                    offset: 10,
                    block_index: 1,
                },
                Heading {
                    text: "B".into(),
                    level: 3,
                    offset: 30,
                    block_index: 3,
                },
            ],
        };
        assert_eq!(page.preface().len(), 1);
        assert_eq!(page.section(0).len(), 1);
        assert!(page.section(1).is_empty());
        assert!(page.section(7).is_empty());
    }

    #[test]
    fn placeholder_text_format() {
        assert_eq!(Inline::placeholder_text("Goblin"), "[Linked: Goblin]");
        let text = inline_text(&[
            Inline::plain("See "),
            Inline::EntityPlaceholder {
                name: "Goblin".into(),
            },
        ]);
        assert_eq!(text, "See [Linked: Goblin]");
    }
}
