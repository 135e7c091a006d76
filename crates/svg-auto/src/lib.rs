//! # svg-auto
//!
//! Find an SVG rasteriser already installed on the machine and use it to
//! turn SVG documents into PNG bytes. Nothing is bundled: when no rasteriser
//! is present, [`locate_rasteriser`] returns `None` and callers fall back to
//! whatever placeholder they prefer.
//!
//! ## How it works
//!
//! On the first call to [`locate_rasteriser`]:
//!
//! 1. Checks `SVG_AUTO_RASTERISER` (or the caller-supplied override) for an
//!    explicit executable path.
//! 2. Otherwise searches `PATH` for `rsvg-convert`, then `resvg`.
//! 3. Caches the result for the lifetime of the process.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use svg_auto::locate_rasteriser;
//!
//! if let Some(r) = locate_rasteriser() {
//!     let png = r.rasterise(b"<svg xmlns='http://www.w3.org/2000/svg'/>", Some(64))
//!         .expect("rasterise failed");
//!     assert!(png.starts_with(b"\x89PNG"));
//! }
//! ```
//!
//! ## Supported tools
//!
//! | Tool           | Invocation                                        |
//! |----------------|---------------------------------------------------|
//! | `rsvg-convert` | `rsvg-convert --format png [--width N] -o out in` |
//! | `resvg`        | `resvg [--width N] in out`                        |

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable holding an explicit rasteriser path.
pub const RASTERISER_ENV: &str = "SVG_AUTO_RASTERISER";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by svg-auto operations.
#[derive(Error, Debug)]
pub enum SvgAutoError {
    /// Scratch file handling failed.
    #[error("Scratch file error: {0}")]
    Scratch(#[source] std::io::Error),

    /// The rasteriser process could not be started.
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The rasteriser ran but reported failure.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: PathBuf,
        status: String,
        stderr: String,
    },

    /// The rasteriser exited cleanly but produced no PNG.
    #[error("'{program}' produced no PNG output")]
    EmptyOutput { program: PathBuf },
}

// ── Rasteriser handle ────────────────────────────────────────────────────────

/// Which command-line dialect the located executable speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasteriserKind {
    RsvgConvert,
    Resvg,
}

impl RasteriserKind {
    /// Guess the dialect from an executable's file name. Anything that is not
    /// recognisably `resvg` is driven with `rsvg-convert` arguments.
    pub fn from_program(path: &Path) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if stem == "resvg" {
            RasteriserKind::Resvg
        } else {
            RasteriserKind::RsvgConvert
        }
    }
}

/// A located SVG rasteriser executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvgRasteriser {
    program: PathBuf,
    kind: RasteriserKind,
}

impl SvgRasteriser {
    /// Wrap an explicit executable path.
    pub fn from_path(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let kind = RasteriserKind::from_program(&program);
        Self { program, kind }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn kind(&self) -> RasteriserKind {
        self.kind
    }

    /// Rasterise `svg` to PNG bytes, optionally scaling to `width_px`.
    pub fn rasterise(&self, svg: &[u8], width_px: Option<u32>) -> Result<Vec<u8>, SvgAutoError> {
        let dir = tempfile::TempDir::new().map_err(SvgAutoError::Scratch)?;
        let input = dir.path().join("in.svg");
        let output = dir.path().join("out.png");
        std::fs::write(&input, svg).map_err(SvgAutoError::Scratch)?;

        let args = self.arguments(&input, &output, width_px);
        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| SvgAutoError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !result.status.success() {
            return Err(SvgAutoError::Failed {
                program: self.program.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        let png = std::fs::read(&output).map_err(SvgAutoError::Scratch)?;
        if png.is_empty() {
            return Err(SvgAutoError::EmptyOutput {
                program: self.program.clone(),
            });
        }
        Ok(png)
    }

    fn arguments(&self, input: &Path, output: &Path, width_px: Option<u32>) -> Vec<String> {
        let mut args = Vec::with_capacity(6);
        match self.kind {
            RasteriserKind::RsvgConvert => {
                args.push("--format".to_string());
                args.push("png".to_string());
                if let Some(w) = width_px {
                    args.push(format!("--width={w}"));
                }
                args.push("--output".to_string());
                args.push(output.display().to_string());
                args.push(input.display().to_string());
            }
            RasteriserKind::Resvg => {
                if let Some(w) = width_px {
                    args.push("--width".to_string());
                    args.push(w.to_string());
                }
                args.push(input.display().to_string());
                args.push(output.display().to_string());
            }
        }
        args
    }
}

// ── Thread-safe singleton ────────────────────────────────────────────────────

static LOCATED: OnceLock<Option<SvgRasteriser>> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Locate a rasteriser, probing the environment once per process.
pub fn locate_rasteriser() -> Option<SvgRasteriser> {
    LOCATED
        .get_or_init(|| probe(std::env::var_os(RASTERISER_ENV).map(PathBuf::from)))
        .clone()
}

/// Probe without touching the process-wide cache.
///
/// `explicit` wins when it points to an existing file; otherwise `PATH` is
/// searched for `rsvg-convert` and then `resvg`.
pub fn probe(explicit: Option<PathBuf>) -> Option<SvgRasteriser> {
    if let Some(p) = explicit {
        if p.is_file() {
            return Some(SvgRasteriser::from_path(p));
        }
        eprintln!(
            "svg-auto: {RASTERISER_ENV} '{}' not found; searching PATH",
            p.display()
        );
    }

    ["rsvg-convert", "resvg"]
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(SvgRasteriser::from_path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
