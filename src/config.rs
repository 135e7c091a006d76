//! Configuration types for journal-to-PDF export.
//!
//! All rendering behaviour is controlled through [`ExportConfig`], built via
//! its [`ExportConfigBuilder`]. The selection itself lives in
//! [`crate::selection::SelectionModel`]; this struct only covers how the
//! selected content is laid out.

use crate::error::Journal2PdfError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use svg_auto::SvgRasteriser;

/// Configuration for one PDF export.
///
/// Built via [`ExportConfig::builder()`] or using [`ExportConfig::default()`].
///
/// # Example
/// ```rust
/// use journal2pdf::{ExportConfig, PaperSize};
///
/// let config = ExportConfig::builder()
///     .paper(PaperSize::A4)
///     .title("Campaign Notes")
///     .divider_pages(false)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExportConfig {
    /// Document title shown on the cover and in the PDF metadata.
    /// If None, the folder-export name or the single journal's title is used.
    pub title: Option<String>,

    /// Paper size. Default: [`PaperSize::Letter`].
    pub paper: PaperSize,

    /// Page margin on all four sides in points. Range: 18–144. Default: 54.
    pub margin_pt: f32,

    /// Body text size in points. Range: 6–18. Default: 10.
    ///
    /// Heading, TOC and footer sizes scale from this value.
    pub body_font_size: f32,

    /// Start every journal on a divider page carrying its title. Default: true.
    ///
    /// Only applies when more than one journal contributes content.
    pub divider_pages: bool,

    /// Start every journal page on a fresh PDF page. Default: false.
    pub page_break_per_page: bool,

    /// Render tables. Default: true.
    pub include_tables: bool,

    /// Embed images. Default: true. When false, image blocks are dropped.
    pub include_images: bool,

    /// Add "Back to Table of Contents" links to content pages. Default: true.
    pub back_to_toc_links: bool,

    /// Print page numbers in the footer. Default: true.
    pub page_numbers: bool,

    /// Largest share of the content box height one image may occupy.
    /// Range: 0.1–1.0. Default: 0.85.
    pub max_image_height_ratio: f32,

    /// Flate-compress page content streams. Default: true.
    pub compress_streams: bool,

    /// Optional renderers available on this machine.
    pub capabilities: Capabilities,

    /// Receives render progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            title: None,
            paper: PaperSize::default(),
            margin_pt: 54.0,
            body_font_size: 10.0,
            divider_pages: true,
            page_break_per_page: false,
            include_tables: true,
            include_images: true,
            back_to_toc_links: true,
            page_numbers: true,
            max_image_height_ratio: 0.85,
            compress_streams: true,
            capabilities: Capabilities::none(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("title", &self.title)
            .field("paper", &self.paper)
            .field("margin_pt", &self.margin_pt)
            .field("body_font_size", &self.body_font_size)
            .field("divider_pages", &self.divider_pages)
            .field("page_break_per_page", &self.page_break_per_page)
            .field("include_tables", &self.include_tables)
            .field("include_images", &self.include_images)
            .field("back_to_toc_links", &self.back_to_toc_links)
            .field("page_numbers", &self.page_numbers)
            .field("max_image_height_ratio", &self.max_image_height_ratio)
            .field("compress_streams", &self.compress_streams)
            .field("capabilities", &self.capabilities)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl ExportConfig {
    /// Create a new builder for `ExportConfig`.
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::default(),
        }
    }

    /// Page width and height in points.
    pub fn page_size(&self) -> (f32, f32) {
        self.paper.dimensions()
    }

    /// Width of the content box in points.
    pub fn content_width(&self) -> f32 {
        self.page_size().0 - 2.0 * self.margin_pt
    }

    /// Height of the content box in points.
    pub fn content_height(&self) -> f32 {
        self.page_size().1 - 2.0 * self.margin_pt
    }
}

/// Builder for [`ExportConfig`].
#[derive(Debug)]
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        let t = title.into();
        self.config.title = (!t.trim().is_empty()).then(|| t.trim().to_string());
        self
    }

    pub fn paper(mut self, paper: PaperSize) -> Self {
        self.config.paper = paper;
        self
    }

    pub fn margin_pt(mut self, pt: f32) -> Self {
        self.config.margin_pt = pt.clamp(18.0, 144.0);
        self
    }

    pub fn body_font_size(mut self, pt: f32) -> Self {
        self.config.body_font_size = pt.clamp(6.0, 18.0);
        self
    }

    pub fn divider_pages(mut self, v: bool) -> Self {
        self.config.divider_pages = v;
        self
    }

    pub fn page_break_per_page(mut self, v: bool) -> Self {
        self.config.page_break_per_page = v;
        self
    }

    pub fn include_tables(mut self, v: bool) -> Self {
        self.config.include_tables = v;
        self
    }

    pub fn include_images(mut self, v: bool) -> Self {
        self.config.include_images = v;
        self
    }

    pub fn back_to_toc_links(mut self, v: bool) -> Self {
        self.config.back_to_toc_links = v;
        self
    }

    pub fn page_numbers(mut self, v: bool) -> Self {
        self.config.page_numbers = v;
        self
    }

    pub fn max_image_height_ratio(mut self, ratio: f32) -> Self {
        self.config.max_image_height_ratio = ratio.clamp(0.1, 1.0);
        self
    }

    pub fn compress_streams(mut self, v: bool) -> Self {
        self.config.compress_streams = v;
        self
    }

    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.config.capabilities = caps;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExportConfig, Journal2PdfError> {
        let c = &self.config;
        if !c.margin_pt.is_finite() || !(18.0..=144.0).contains(&c.margin_pt) {
            return Err(Journal2PdfError::InvalidConfig(format!(
                "Margin must be 18–144 pt, got {}",
                c.margin_pt
            )));
        }
        if !c.body_font_size.is_finite() || !(6.0..=18.0).contains(&c.body_font_size) {
            return Err(Journal2PdfError::InvalidConfig(format!(
                "Body font size must be 6–18 pt, got {}",
                c.body_font_size
            )));
        }
        if c.content_width() < 144.0 {
            return Err(Journal2PdfError::InvalidConfig(
                "Margins leave less than 2 inches of content width".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output paper size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperSize {
    /// US Letter, 8.5 × 11 in. (default)
    #[default]
    Letter,
    /// ISO A4, 210 × 297 mm.
    A4,
}

impl PaperSize {
    /// Width and height in points.
    pub fn dimensions(&self) -> (f32, f32) {
        match self {
            PaperSize::Letter => (612.0, 792.0),
            PaperSize::A4 => (595.28, 841.89),
        }
    }
}

impl std::str::FromStr for PaperSize {
    type Err = Journal2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "letter" | "us-letter" => Ok(PaperSize::Letter),
            "a4" => Ok(PaperSize::A4),
            other => Err(Journal2PdfError::InvalidConfig(format!(
                "Unknown paper size '{other}' (expected letter or a4)"
            ))),
        }
    }
}

// ── Capabilities ─────────────────────────────────────────────────────────

/// Optional renderers found on this machine, probed once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// External SVG rasteriser. SVG images render as placeholders without it.
    pub svg: Option<SvgRasteriser>,
}

impl Capabilities {
    /// No optional renderers.
    pub fn none() -> Self {
        Self::default()
    }

    /// Probe the environment (cached for the process lifetime).
    pub fn detect() -> Self {
        Self {
            svg: svg_auto::locate_rasteriser(),
        }
    }

    pub fn with_svg(mut self, rasteriser: Option<SvgRasteriser>) -> Self {
        self.svg = rasteriser;
        self
    }

    pub fn has_svg(&self) -> bool {
        self.svg.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExportConfig::default();
        assert_eq!(c.paper, PaperSize::Letter);
        assert_eq!(c.margin_pt, 54.0);
        assert!(c.divider_pages);
        assert!(!c.page_break_per_page);
        assert!(c.back_to_toc_links);
        assert!(!c.capabilities.has_svg());
        assert_eq!(c.content_width(), 504.0);
    }

    #[test]
    fn builder_clamps() {
        let c = ExportConfig::builder()
            .margin_pt(2.0)
            .body_font_size(40.0)
            .max_image_height_ratio(3.0)
            .build()
            .unwrap();
        assert_eq!(c.margin_pt, 18.0);
        assert_eq!(c.body_font_size, 18.0);
        assert_eq!(c.max_image_height_ratio, 1.0);
    }

    #[test]
    fn blank_title_is_none() {
        let c = ExportConfig::builder().title("   ").build().unwrap();
        assert!(c.title.is_none());
        let c = ExportConfig::builder().title(" Notes ").build().unwrap();
        assert_eq!(c.title.as_deref(), Some("Notes"));
    }

    #[test]
    fn build_rejects_out_of_range_fields() {
        let mut b = ExportConfig::builder();
        b.config.margin_pt = f32::NAN;
        assert!(matches!(b.build(), Err(Journal2PdfError::InvalidConfig(_))));
    }

    #[test]
    fn paper_parse_and_dimensions() {
        assert_eq!("A4".parse::<PaperSize>().unwrap(), PaperSize::A4);
        assert_eq!("letter".parse::<PaperSize>().unwrap(), PaperSize::Letter);
        assert!("legal".parse::<PaperSize>().is_err());
        assert_eq!(PaperSize::Letter.dimensions(), (612.0, 792.0));
        let json = serde_json::to_string(&PaperSize::A4).unwrap();
        assert_eq!(json, "\"a4\"");
    }

    #[test]
    fn capabilities_with_explicit_rasteriser() {
        let caps = Capabilities::none().with_svg(Some(SvgRasteriser::from_path("/x/resvg")));
        assert!(caps.has_svg());
    }
}
