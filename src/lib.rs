//! # journal2pdf
//!
//! Convert virtual-tabletop journal exports (ZIP or JSON bundles produced by
//! a journal export module) into a PDF with a clickable table of contents.
//!
//! ## Pipeline Overview
//!
//! ```text
//! export (.zip / .json / directory)
//!  │
//!  ├─ 1. Read       detect single-journal vs folder export, load assets
//!  ├─ 2. Normalize  strip editor markup, entity links → [Linked: …]
//!  ├─ 3. Select     journal → page → heading checkbox tree
//!  ├─ 4. Assemble   ordered blocks + TOC entries with anchors
//!  ├─ 5. Layout     pass 1: paginate, record the page of every anchor
//!  └─ 6. Emit       pass 2: PDF with TOC links, back links, bookmarks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use journal2pdf::{convert_file, ExportConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExportConfig::builder().title("Campaign Notes").build()?;
//!     let output = convert_file("journals.zip", "campaign.pdf", &config)?;
//!     eprintln!("{} pages, {} warnings", output.stats.total_pages, output.warnings.len());
//!     Ok(())
//! }
//! ```
//!
//! Use [`Session`] to pick journals, pages and headings before rendering:
//!
//! ```rust,no_run
//! use journal2pdf::{ExportConfig, Session};
//!
//! let mut session = Session::new(ExportConfig::default());
//! session.open("journals.zip").ok();
//! session.toggle_path("Bestiary/Dragons", false).ok();
//! let dialog = session.generate("out.pdf");
//! println!("{}: {}", dialog.title, dialog.message);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `journal2pdf` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! journal2pdf = { version = "0.3", default-features = false }
//! ```
//!
//! ## SVG images
//!
//! PNG, JPEG, GIF and WebP are embedded directly. SVG needs an external
//! rasteriser (`rsvg-convert` or `resvg`), probed once through
//! [`Capabilities::detect`]. Without one, SVG images render as a
//! placeholder caption.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod app;
pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod selection;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use app::{Dialog, DialogKind, Session, TreeRow};
pub use config::{Capabilities, ExportConfig, ExportConfigBuilder, PaperSize};
pub use convert::{convert_file, generate, generate_to_file, inspect, open_export, summarize};
pub use error::{ConversionWarning, Journal2PdfError};
pub use model::{Asset, AssetStore, Block, Heading, Inline, JournalEntry, Page};
pub use output::{ExportSummary, JournalSummary, RenderOutput, RenderStats, TocLine};
pub use pipeline::input::{ExportBundle, ExportLayout};
pub use progress::{NoopProgressCallback, ProgressCallback, RenderProgressCallback};
pub use selection::{CheckState, IncludedItem, NodeId, NodeKind, SelectionModel, SelectionObserver};
