//! Result types returned by rendering and inspection.

use crate::error::ConversionWarning;
use crate::pipeline::input::ExportLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A rendered PDF plus everything learned while producing it.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Serialised PDF document.
    pub pdf: Vec<u8>,
    /// Table of contents as printed, with resolved page numbers.
    pub toc: Vec<TocLine>,
    /// Non-fatal problems, in the order they were found.
    pub warnings: Vec<ConversionWarning>,
    pub stats: RenderStats,
}

/// One printed line of the table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocLine {
    pub label: String,
    /// Nesting depth; 0 is the outermost level.
    pub depth: usize,
    /// Named destination the line links to.
    pub anchor: String,
    /// 1-indexed PDF page the anchor lands on.
    pub page: usize,
}

/// Counters and timings for one render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStats {
    /// Journals that contributed content.
    pub journals: usize,
    /// Pages in the finished PDF.
    pub total_pages: usize,
    pub toc_pages: usize,
    pub content_pages: usize,
    pub toc_entries: usize,
    pub images_embedded: usize,
    /// Image blocks rendered as a placeholder caption.
    pub image_placeholders: usize,
    pub pdf_bytes: usize,
    pub layout_duration_ms: u64,
    pub emit_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// What an export contains, without rendering anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSummary {
    pub source: PathBuf,
    pub layout: ExportLayout,
    pub title: Option<String>,
    pub journals: Vec<JournalSummary>,
    pub asset_count: usize,
    /// Image sources referenced by a page but absent from the export.
    pub missing_assets: Vec<String>,
    pub warnings: Vec<ConversionWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalSummary {
    pub id: String,
    pub title: String,
    pub pages: usize,
    pub headings: usize,
    pub images: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_default_is_zeroed() {
        let s = RenderStats::default();
        assert_eq!(s.total_pages, 0);
        assert_eq!(s.image_placeholders, 0);
    }

    #[test]
    fn summary_serialises_layout() {
        let s = ExportSummary {
            source: PathBuf::from("a.zip"),
            layout: ExportLayout::FolderExport,
            title: Some("Campaign".into()),
            journals: vec![JournalSummary {
                id: "j1".into(),
                title: "Lore".into(),
                pages: 2,
                headings: 5,
                images: 1,
            }],
            asset_count: 1,
            missing_assets: vec![],
            warnings: vec![],
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"FolderExport\""));
        assert!(json.contains("\"headings\":5"));
    }
}
