//! Top-level entry points: open an export, inspect it, generate a PDF.
//!
//! Everything here is synchronous. [`generate`] runs the assembler and both
//! renderer passes; [`generate_to_file`] adds the atomic write;
//! [`convert_file`] chains open + select-everything + write for callers
//! that don't need the selection tree.

use crate::config::ExportConfig;
use crate::error::Journal2PdfError;
use crate::model::JournalEntry;
use crate::output::{ExportSummary, JournalSummary, RenderOutput, RenderStats, TocLine};
use crate::pipeline::input::{self, ExportBundle};
use crate::pipeline::layout::PageKind;
use crate::pipeline::{assemble, layout, render};
use crate::selection::SelectionModel;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Read an export from disk.
///
/// # Errors
/// Input errors only: [`Journal2PdfError::FileNotFound`],
/// [`Journal2PdfError::PermissionDenied`], [`Journal2PdfError::FileFormat`]
/// and [`Journal2PdfError::MalformedJson`].
pub fn open_export(path: impl AsRef<Path>) -> Result<ExportBundle, Journal2PdfError> {
    let path = path.as_ref();
    let bundle = input::read_export(path)?;
    info!(
        "Opened {:?} export '{}': {} journal(s), {} asset(s)",
        bundle.layout,
        path.display(),
        bundle.journals.len(),
        bundle.assets.len()
    );
    for w in &bundle.warnings {
        warn!("{w}");
    }
    Ok(bundle)
}

/// Summarise an export without rendering anything.
pub fn inspect(path: impl AsRef<Path>) -> Result<ExportSummary, Journal2PdfError> {
    open_export(path).map(|b| summarize(&b))
}

/// Build the [`ExportSummary`] of an already opened export.
pub fn summarize(bundle: &ExportBundle) -> ExportSummary {
    let mut missing: Vec<String> = Vec::new();
    let journals = bundle
        .journals
        .iter()
        .map(|j| {
            let mut images = 0;
            for src in j.pages.iter().flat_map(|p| p.image_sources()) {
                images += 1;
                if j.assets.resolve(src).is_none() && !missing.iter().any(|m| m == src) {
                    missing.push(src.to_string());
                }
            }
            JournalSummary {
                id: j.id.clone(),
                title: j.title.clone(),
                pages: j.pages.len(),
                headings: j.heading_count(),
                images,
            }
        })
        .collect();

    ExportSummary {
        source: bundle.source.clone(),
        layout: bundle.layout,
        title: bundle.title.clone(),
        journals,
        asset_count: bundle.assets.len(),
        missing_assets: missing,
        warnings: bundle.warnings.clone(),
    }
}

/// Render the selected content of `journals` to PDF bytes.
///
/// `export_title` is the folder name of the export, used for the cover
/// when the configuration sets no title.
///
/// # Returns
/// `Ok(RenderOutput)` even when images were missing or unavailable; those
/// are listed in `output.warnings`.
///
/// # Errors
/// [`Journal2PdfError::NothingSelected`] for an empty selection and
/// [`Journal2PdfError::Render`] when PDF serialisation fails.
pub fn generate(
    journals: &[JournalEntry],
    selection: &SelectionModel,
    config: &ExportConfig,
    export_title: Option<&str>,
) -> Result<RenderOutput, Journal2PdfError> {
    let total_start = Instant::now();

    // ── Step 1: Assemble ─────────────────────────────────────────────────
    let doc = assemble::assemble(journals, selection, config, export_title)?;
    debug!("Document title: '{}'", doc.title);
    if let Some(ref cb) = config.progress_callback {
        cb.on_render_start(doc.parts.len(), doc.blocks.len());
    }

    // ── Step 2: Layout (pass 1) ──────────────────────────────────────────
    let layout_start = Instant::now();
    let laid = layout::layout(&doc, config);
    let layout_duration_ms = layout_start.elapsed().as_millis() as u64;

    // ── Step 3: Emit (pass 2) ────────────────────────────────────────────
    let emit_start = Instant::now();
    let pdf = render::render(&laid, &doc.title, config)?;
    let emit_duration_ms = emit_start.elapsed().as_millis() as u64;

    // ── Step 4: Stats ────────────────────────────────────────────────────
    let toc: Vec<TocLine> = laid
        .toc
        .iter()
        .filter_map(|e| {
            laid.page_of(&e.anchor).map(|p| TocLine {
                label: e.label.clone(),
                depth: e.depth,
                anchor: e.anchor.clone(),
                page: p + 1,
            })
        })
        .collect();
    if toc.len() != laid.toc.len() {
        debug!("{} TOC entr(ies) without destination", laid.toc.len() - toc.len());
    }

    let stats = RenderStats {
        journals: doc.parts.len(),
        total_pages: laid.pages.len(),
        toc_pages: laid.toc_pages,
        content_pages: laid
            .pages
            .iter()
            .filter(|p| p.kind == PageKind::Content)
            .count(),
        toc_entries: toc.len(),
        images_embedded: laid.images_embedded,
        image_placeholders: laid.image_placeholders,
        pdf_bytes: pdf.len(),
        layout_duration_ms,
        emit_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Render complete: {} page(s), {} bytes, {}ms total",
        stats.total_pages, stats.pdf_bytes, stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_render_complete(stats.total_pages, stats.pdf_bytes);
    }

    Ok(RenderOutput {
        pdf,
        toc,
        warnings: laid.warnings,
        stats,
    })
}

/// Render and write the PDF to `output_path`.
///
/// Uses atomic write (temp file in the target directory + rename), so a
/// failed render never leaves a partial file behind.
pub fn generate_to_file(
    journals: &[JournalEntry],
    selection: &SelectionModel,
    config: &ExportConfig,
    export_title: Option<&str>,
    output_path: impl AsRef<Path>,
) -> Result<RenderOutput, Journal2PdfError> {
    let output = generate(journals, selection, config, export_title)?;
    write_atomic(output_path.as_ref(), &output.pdf)?;
    Ok(output)
}

/// Open `input`, include everything, and write the PDF to `output_path`.
///
/// Warnings from reading the export are prepended to the render warnings.
pub fn convert_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ExportConfig,
) -> Result<RenderOutput, Journal2PdfError> {
    let bundle = open_export(input_path)?;
    let selection = SelectionModel::build(&bundle.journals);
    let mut output = generate_to_file(
        &bundle.journals,
        &selection,
        config,
        bundle.title.as_deref(),
        output_path,
    )?;
    let mut warnings = bundle.warnings;
    warnings.append(&mut output.warnings);
    output.warnings = warnings;
    Ok(output)
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Journal2PdfError> {
    let fail = |source: std::io::Error| Journal2PdfError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::env::current_dir().map_err(fail)?,
    };
    std::fs::create_dir_all(&dir).map_err(fail)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    info!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn journal_json() -> &'static str {
        r#"{"_id":"j1","name":"Lore","pages":[
            {"_id":"p1","name":"Gods","type":"text","sort":0,
             "text":{"content":"<h2>Sun</h2><p>Bright @UUID[Actor.x]{Ra}</p><img src=\"assets/gone.png\">"}}
        ]}"#
    }

    #[test]
    fn summarize_counts_and_lists_missing_assets() {
        let bundle = input::read_export_bytes(journal_json().as_bytes(), Path::new("journal.json")).unwrap();
        let s = summarize(&bundle);
        assert_eq!(s.journals.len(), 1);
        assert_eq!(s.journals[0].headings, 1);
        assert_eq!(s.journals[0].images, 1);
        assert_eq!(s.missing_assets, vec!["assets/gone.png".to_string()]);
    }

    #[test]
    fn generate_reports_toc_with_page_numbers() {
        let bundle = input::read_export_bytes(journal_json().as_bytes(), Path::new("journal.json")).unwrap();
        let sel = SelectionModel::build(&bundle.journals);
        let config = ExportConfig::default();
        let out = generate(&bundle.journals, &sel, &config, None).unwrap();
        let labels: Vec<_> = out.toc.iter().map(|l| l.label.as_str()).collect();
        assert_eq!(labels, ["Gods", "Sun"]);
        assert!(out.toc.iter().all(|l| l.page > out.stats.toc_pages));
        assert_eq!(out.stats.image_placeholders, 1);
        assert_eq!(out.stats.pdf_bytes, out.pdf.len());
    }

    #[test]
    fn empty_selection_is_an_error() {
        let bundle = input::read_export_bytes(journal_json().as_bytes(), Path::new("journal.json")).unwrap();
        let mut sel = SelectionModel::build(&bundle.journals);
        sel.set_all(false);
        let err = generate(&bundle.journals, &sel, &ExportConfig::default(), None).unwrap_err();
        assert!(matches!(err, Journal2PdfError::NothingSelected));
    }

    #[test]
    fn convert_file_writes_pdf_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("journal.json");
        std::fs::write(&input_path, journal_json()).unwrap();
        let out_path = dir.path().join("out/lore.pdf");
        let out = convert_file(&input_path, &out_path, &ExportConfig::default()).unwrap();
        let written = std::fs::read(&out_path).unwrap();
        assert_eq!(written, out.pdf);
        let leftovers: Vec<PathBuf> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn missing_input_is_reported() {
        let err = inspect("/definitely/not/here.zip").unwrap_err();
        assert!(matches!(err, Journal2PdfError::FileNotFound { .. }));
    }
}
