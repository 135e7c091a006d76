//! Pipeline stages for journal-export-to-PDF conversion.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ (selection) ──▶ assemble ──▶ layout ──▶ render
//! (ZIP/JSON)  (markup)     (user flags)    (blocks)   (pass 1)   (pass 2)
//! ```
//!
//! 1. [`input`]: open a ZIP, JSON file or directory, detect single vs
//!    folder layout, load journals and assets
//! 2. [`normalize`]: turn each page's HTML into [`crate::model::Block`]s,
//!    rewriting entity links into placeholders
//! 3. [`assemble`]: walk the [`crate::selection::SelectionModel`] and emit
//!    an ordered block list plus TOC entries with anchors
//! 4. [`layout`]: pass 1, wrap text, paginate, record where every
//!    anchor lands; [`fonts`] and [`images`] support it
//! 5. [`render`]: pass 2, write the PDF with `lopdf`, resolving TOC page
//!    numbers and link destinations

pub mod assemble;
pub mod fonts;
pub mod images;
pub mod input;
pub mod layout;
pub mod normalize;
pub mod render;
