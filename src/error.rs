//! Error types for the journal2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Journal2PdfError`]: **fatal**, the operation cannot proceed at all
//!   (unreadable export, malformed JSON, nothing selected, output not
//!   writable). Returned as `Err(Journal2PdfError)` from the top-level entry
//!   points; the caller reports it and stays usable.
//!
//! * [`ConversionWarning`]: **non-fatal**, one page or one asset had a
//!   problem (recovered markup, missing image, broken journal file in a
//!   folder export) but the document is still produced. Collected in
//!   [`crate::output::RenderOutput::warnings`] and on
//!   [`crate::pipeline::input::ExportBundle::warnings`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the journal2pdf library.
#[derive(Debug, Error)]
pub enum Journal2PdfError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Export not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The export is readable but its layout is not one we understand
    /// (no manifest or journal file, corrupt archive, no parsable journal).
    #[error("Unsupported export '{path}': {detail}")]
    FileFormat { path: PathBuf, detail: String },

    /// A JSON entry inside the export failed to parse.
    #[error("Malformed JSON in '{entry}' of '{path}': {detail}")]
    MalformedJson {
        path: PathBuf,
        entry: String,
        detail: String,
    },

    // ── Selection errors ──────────────────────────────────────────────────
    /// The selection includes no page or heading.
    #[error("Nothing is selected for export.\nTick at least one journal, page or heading.")]
    NothingSelected,

    /// A selection path did not match any node.
    #[error("No journal, page or heading matches '{path}'")]
    UnknownSelection { path: String },

    // ── Render errors ─────────────────────────────────────────────────────
    /// Layout or PDF serialisation failed.
    #[error("PDF rendering failed: {detail}")]
    Render { detail: String },

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Journal2PdfError {
    /// True for failures caused by the input export rather than by rendering.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Journal2PdfError::FileNotFound { .. }
                | Journal2PdfError::PermissionDenied { .. }
                | Journal2PdfError::FileFormat { .. }
                | Journal2PdfError::MalformedJson { .. }
        )
    }
}

impl From<lopdf::Error> for Journal2PdfError {
    fn from(e: lopdf::Error) -> Self {
        Journal2PdfError::Render {
            detail: e.to_string(),
        }
    }
}

/// A non-fatal problem with a single page, asset or journal file.
///
/// The document is still produced; the affected spot carries placeholder
/// text or best-effort content instead.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ConversionWarning {
    /// The page markup was malformed and had to be repaired.
    #[error("Page '{page}': markup recovered: {detail}")]
    MarkupRecovery { page: String, detail: String },

    /// An image reference points at an asset that is not in the export.
    #[error("Page '{page}': missing image '{src}'")]
    AssetMissing { page: String, src: String },

    /// The asset exists but cannot be embedded (unsupported or corrupt).
    #[error("Page '{page}': image '{src}' unavailable: {reason}")]
    ImageUnavailable {
        page: String,
        src: String,
        reason: String,
    },

    /// A journal file in a folder export failed to parse and was skipped.
    #[error("Skipped journal file '{entry}': {detail}")]
    JournalSkipped { entry: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_format_display() {
        let e = Journal2PdfError::FileFormat {
            path: PathBuf::from("/tmp/export.zip"),
            detail: "neither manifest.json nor journal.json found".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("export.zip"), "got: {msg}");
        assert!(msg.contains("manifest.json"), "got: {msg}");
    }

    #[test]
    fn malformed_json_names_entry() {
        let e = Journal2PdfError::MalformedJson {
            path: PathBuf::from("a.zip"),
            entry: "journals/lore.json".into(),
            detail: "expected value at line 1 column 1".into(),
        };
        assert!(e.to_string().contains("journals/lore.json"));
    }

    #[test]
    fn input_errors_are_classified() {
        assert!(Journal2PdfError::FileNotFound {
            path: PathBuf::from("x")
        }
        .is_input_error());
        assert!(!Journal2PdfError::NothingSelected.is_input_error());
        assert!(!Journal2PdfError::Render {
            detail: "x".into()
        }
        .is_input_error());
    }

    #[test]
    fn asset_missing_display() {
        let w = ConversionWarning::AssetMissing {
            page: "Goblin Camp".into(),
            src: "assets/map.webp".into(),
        };
        let msg = w.to_string();
        assert!(msg.contains("Goblin Camp"));
        assert!(msg.contains("assets/map.webp"));
    }

    #[test]
    fn warnings_serialise() {
        let w = ConversionWarning::JournalSkipped {
            entry: "journals/broken.json".into(),
            detail: "EOF".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("JournalSkipped"));
        let back: ConversionWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }
}
