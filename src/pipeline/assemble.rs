//! Document assembly: journals + selection → ordered blocks and TOC entries.
//!
//! ## Inclusion
//!
//! * A page's flag controls its title and its preface.
//! * A heading's flag controls the heading and its section.
//! * A journal title is emitted, and listed at TOC depth 0, only when the
//!   journal flag is set and more than one journal contributes content.
//!
//! ## TOC nesting
//!
//! Within a page, headings nest by level under the page entry: a deeper
//! level opens a child group, the same or a shallower level pops back.
//! Headings of an excluded page nest directly under the journal level.
//!
//! Anchors are positional (`j0`, `j0-p2`, `j0-p2-h1`), so regenerating from
//! an unchanged selection yields the same destinations.

use crate::config::ExportConfig;
use crate::error::Journal2PdfError;
use crate::model::{AssetStore, Block, JournalEntry};
use crate::selection::{IncludedItem, SelectionModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Title used when neither the configuration nor the export names the document.
pub const DEFAULT_TITLE: &str = "FVTT Journals";

/// Which structural level a title or TOC entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TitleRole {
    Journal,
    Page,
    Heading,
}

/// A unit of the assembled document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocBlock {
    /// Start a fresh PDF page.
    PageBreak,
    /// A full page carrying only a journal title.
    Divider { title: String, anchor: String },
    /// A journal, page or heading title with its link destination.
    Title {
        text: String,
        role: TitleRole,
        /// Markup level for headings, page title level for pages.
        level: u8,
        anchor: String,
    },
    /// Normalized page content.
    Content {
        /// Index into [`AssembledDocument::parts`].
        part: usize,
        /// Title of the page the block came from.
        page: String,
        block: Block,
    },
}

/// One table-of-contents entry, before page numbers are known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub label: String,
    pub depth: usize,
    pub anchor: String,
    pub role: TitleRole,
}

/// A journal that contributes content.
#[derive(Debug, Clone)]
pub struct JournalPart {
    /// Position of the journal in the session.
    pub journal: usize,
    pub title: String,
    /// Index of the first block belonging to this journal.
    pub first_block: usize,
    pub assets: Arc<AssetStore>,
}

/// The render-ready document.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub title: String,
    pub blocks: Vec<DocBlock>,
    pub toc: Vec<TocEntry>,
    pub parts: Vec<JournalPart>,
}

impl AssembledDocument {
    pub fn heading_entries(&self) -> usize {
        self.toc
            .iter()
            .filter(|e| e.role == TitleRole::Heading)
            .count()
    }
}

pub fn journal_anchor(journal: usize) -> String {
    format!("j{journal}")
}

pub fn page_anchor(journal: usize, page: usize) -> String {
    format!("j{journal}-p{page}")
}

pub fn heading_anchor(journal: usize, page: usize, heading: usize) -> String {
    format!("j{journal}-p{page}-h{heading}")
}

/// Pick the document title: configuration, then export name, then the only
/// journal's title, then [`DEFAULT_TITLE`].
pub fn document_title(
    config: &ExportConfig,
    export_title: Option<&str>,
    journals: &[JournalEntry],
) -> String {
    config
        .title
        .clone()
        .or_else(|| {
            export_title
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
        .or_else(|| match journals {
            [only] => Some(only.title.clone()),
            _ => None,
        })
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// What is included from one page.
#[derive(Default)]
struct PagePick {
    page: bool,
    headings: Vec<usize>,
}

/// Assemble the selected content of `journals` into a render-ready document.
///
/// # Errors
/// [`Journal2PdfError::NothingSelected`] when the selection includes no page
/// or heading.
pub fn assemble(
    journals: &[JournalEntry],
    selection: &SelectionModel,
    config: &ExportConfig,
    export_title: Option<&str>,
) -> Result<AssembledDocument, Journal2PdfError> {
    // journal → page → pick, ordered
    let mut picks: BTreeMap<usize, BTreeMap<usize, PagePick>> = BTreeMap::new();
    for item in selection.included_leaves() {
        match item {
            IncludedItem::Page { journal, page } => {
                picks.entry(journal).or_default().entry(page).or_default().page = true;
            }
            IncludedItem::Heading {
                journal,
                page,
                heading,
            } => picks
                .entry(journal)
                .or_default()
                .entry(page)
                .or_default()
                .headings
                .push(heading),
        }
    }
    picks.retain(|&j, _| j < journals.len());
    if picks.is_empty() {
        return Err(Journal2PdfError::NothingSelected);
    }

    let title = document_title(config, export_title, journals);
    let show_journal_titles = picks.len() > 1;
    let mut doc = AssembledDocument {
        title,
        blocks: Vec::new(),
        toc: Vec::new(),
        parts: Vec::new(),
    };

    for (ji, pages) in picks {
        let journal = &journals[ji];
        if !doc.blocks.is_empty() {
            doc.blocks.push(DocBlock::PageBreak);
        }
        let part = doc.parts.len();
        doc.parts.push(JournalPart {
            journal: ji,
            title: journal.title.clone(),
            first_block: doc.blocks.len(),
            assets: Arc::clone(&journal.assets),
        });

        let journal_flag = selection
            .journal_node(ji)
            .is_some_and(|id| selection.is_included(id));
        let titled = journal_flag && show_journal_titles;
        let page_depth = usize::from(titled);
        if titled {
            let anchor = journal_anchor(ji);
            doc.toc.push(TocEntry {
                label: journal.title.clone(),
                depth: 0,
                anchor: anchor.clone(),
                role: TitleRole::Journal,
            });
            if config.divider_pages {
                doc.blocks.push(DocBlock::Divider {
                    title: journal.title.clone(),
                    anchor,
                });
            } else {
                doc.blocks.push(DocBlock::Title {
                    text: journal.title.clone(),
                    role: TitleRole::Journal,
                    level: 0,
                    anchor,
                });
            }
        }

        let mut first_page = true;
        for (pi, pick) in pages {
            let Some(page) = journal.pages.get(pi) else {
                continue;
            };
            if config.page_break_per_page && !first_page {
                doc.blocks.push(DocBlock::PageBreak);
            }
            first_page = false;

            if pick.page {
                let anchor = page_anchor(ji, pi);
                doc.toc.push(TocEntry {
                    label: page.title.clone(),
                    depth: page_depth,
                    anchor: anchor.clone(),
                    role: TitleRole::Page,
                });
                doc.blocks.push(DocBlock::Title {
                    text: page.title.clone(),
                    role: TitleRole::Page,
                    level: page.level,
                    anchor,
                });
                push_content(&mut doc.blocks, part, &page.title, page.preface(), config);
            }

            let base = if pick.page { page_depth + 1 } else { page_depth };
            let mut stack: Vec<u8> = Vec::new();
            for hi in pick.headings {
                let Some(h) = page.headings.get(hi) else {
                    continue;
                };
                while stack.last().is_some_and(|&top| top >= h.level) {
                    stack.pop();
                }
                let anchor = heading_anchor(ji, pi, hi);
                doc.toc.push(TocEntry {
                    label: h.text.clone(),
                    depth: base + stack.len(),
                    anchor: anchor.clone(),
                    role: TitleRole::Heading,
                });
                stack.push(h.level);
                doc.blocks.push(DocBlock::Title {
                    text: h.text.clone(),
                    role: TitleRole::Heading,
                    level: h.level,
                    anchor,
                });
                push_content(&mut doc.blocks, part, &page.title, page.section(hi), config);
            }
        }
        debug!("Assembled journal '{}'", journal.title);
    }

    info!(
        "Assembled {} block(s), {} TOC entr(ies) from {} journal(s)",
        doc.blocks.len(),
        doc.toc.len(),
        doc.parts.len()
    );
    Ok(doc)
}

fn push_content(
    out: &mut Vec<DocBlock>,
    part: usize,
    page: &str,
    blocks: &[Block],
    config: &ExportConfig,
) {
    for b in blocks {
        let keep = match b {
            Block::Table { .. } => config.include_tables,
            Block::Image { .. } => config.include_images,
            Block::Heading { .. } => false,
            _ => true,
        };
        if keep {
            out.push(DocBlock::Content {
                part,
                page: page.to_string(),
                block: b.clone(),
            });
        }
    }
}
