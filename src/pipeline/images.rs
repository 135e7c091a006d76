//! Image preparation: export asset → flate-compressed RGB ready for an
//! `/XObject` stream.
//!
//! Raster formats are decoded with the `image` crate; alpha is flattened
//! onto white because the PDF is printed on white paper and a soft mask
//! would double the payload. SVG goes through the external rasteriser when
//! [`Capabilities::svg`] is present. Every failure is reported as a reason
//! string; the renderer turns it into a placeholder caption.

use crate::config::Capabilities;
use crate::model::Asset;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Longest side, in pixels, an embedded image is downscaled to.
pub const MAX_IMAGE_PIXELS: u32 = 2400;

/// Pixel → point factor for HTML width/height hints (96 dpi CSS pixels).
pub const PX_TO_PT: f32 = 0.75;

/// Width SVGs are rasterised at when the markup gives no hint.
const SVG_DEFAULT_WIDTH: u32 = 1200;

/// Decoded image data for one XObject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub width: u32,
    pub height: u32,
    /// zlib-compressed 8-bit RGB samples.
    pub data: Vec<u8>,
}

/// Decode, flatten and compress one asset.
pub fn prepare(asset: &Asset, caps: &Capabilities, width_hint: Option<u32>) -> Result<PreparedImage, String> {
    let img = if asset.mime == "image/svg+xml" {
        let Some(r) = caps.svg.as_ref() else {
            return Err("SVG rendering is not available".to_string());
        };
        let width = width_hint.unwrap_or(SVG_DEFAULT_WIDTH).min(MAX_IMAGE_PIXELS);
        let png = r.rasterise(&asset.data, Some(width)).map_err(|e| e.to_string())?;
        image::load_from_memory_with_format(&png, image::ImageFormat::Png).map_err(|e| e.to_string())?
    } else {
        image::load_from_memory(&asset.data).map_err(|e| e.to_string())?
    };

    let img = downscale(img);
    let rgb = flatten_onto_white(&img);
    let (width, height) = rgb.dimensions();
    let data = deflate(rgb.as_raw()).map_err(|e| e.to_string())?;
    debug!(
        "Prepared image '{}': {}x{} px, {} bytes compressed",
        asset.filename,
        width,
        height,
        data.len()
    );
    Ok(PreparedImage {
        width,
        height,
        data,
    })
}

fn downscale(img: DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    if w.max(h) <= MAX_IMAGE_PIXELS {
        return img;
    }
    img.resize(MAX_IMAGE_PIXELS, MAX_IMAGE_PIXELS, FilterType::Triangle)
}

/// Composite onto an opaque white background.
pub fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (x, y, p) in rgba.enumerate_pixels() {
        let a = u32::from(p[3]);
        let blend = |c: u8| ((u32::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        out.put_pixel(x, y, image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])]));
    }
    out
}

pub fn deflate(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    enc.write_all(bytes)?;
    enc.finish()
}

/// Display size in points for an image of `px` pixels, honouring markup
/// hints and fitting inside `max_w` × `max_h` with the aspect ratio kept.
pub fn display_size(
    px: (u32, u32),
    hint_w: Option<u32>,
    hint_h: Option<u32>,
    max_w: f32,
    max_h: f32,
) -> (f32, f32) {
    let (pw, ph) = (px.0.max(1) as f32, px.1.max(1) as f32);
    let (mut w, mut h) = match (hint_w, hint_h) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w as f32 * PX_TO_PT, h as f32 * PX_TO_PT),
        (Some(w), _) if w > 0 => {
            let w = w as f32 * PX_TO_PT;
            (w, w * ph / pw)
        }
        (_, Some(h)) if h > 0 => {
            let h = h as f32 * PX_TO_PT;
            (h * pw / ph, h)
        }
        _ => (pw * PX_TO_PT, ph * PX_TO_PT),
    };
    if w > max_w {
        h *= max_w / w;
        w = max_w;
    }
    if h > max_h {
        w *= max_h / h;
        h = max_h;
    }
    (w, h)
}

// ── Cache ────────────────────────────────────────────────────────────────

/// Result of looking up one image source.
#[derive(Debug, Clone)]
pub enum ImageOutcome {
    Ready(Arc<PreparedImage>),
    /// The export has no asset for this source.
    Missing,
    /// The asset exists but cannot be embedded.
    Unavailable(String),
}

/// Prepares every distinct asset once per render.
pub struct ImageCache<'a> {
    caps: &'a Capabilities,
    /// Keyed by scope, file name and, for SVG only, the rasterising width.
    prepared: HashMap<(usize, String, Option<u32>), ImageOutcome>,
}

impl<'a> ImageCache<'a> {
    pub fn new(caps: &'a Capabilities) -> Self {
        Self {
            caps,
            prepared: HashMap::new(),
        }
    }

    /// `scope` separates asset stores of different exports.
    pub fn get(
        &mut self,
        scope: usize,
        asset: Option<&Asset>,
        src: &str,
        width_hint: Option<u32>,
    ) -> ImageOutcome {
        let Some(asset) = asset else {
            return ImageOutcome::Missing;
        };
        let caps = self.caps;
        let width = width_hint.filter(|_| asset.mime == "image/svg+xml");
        self.prepared
            .entry((scope, asset.filename.clone(), width))
            .or_insert_with(|| match prepare(asset, caps, width_hint) {
                Ok(p) => ImageOutcome::Ready(Arc::new(p)),
                Err(reason) => {
                    debug!("Image '{src}' unavailable: {reason}");
                    ImageOutcome::Unavailable(reason)
                }
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use image::{Rgba, RgbaImage};
    use std::io::{Cursor, Read};

    fn png(w: u32, h: u32, px: Rgba<u8>) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, px));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn transparent_pixels_become_white() {
        let asset = Asset::new("assets/t.png", png(2, 1, Rgba([0, 0, 0, 0])));
        let p = prepare(&asset, &Capabilities::none(), None).unwrap();
        assert_eq!((p.width, p.height), (2, 1));
        let mut raw = Vec::new();
        ZlibDecoder::new(&p.data[..]).read_to_end(&mut raw).unwrap();
        assert_eq!(raw, vec![255; 6]);
    }

    #[test]
    fn half_alpha_blends() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let rgb = flatten_onto_white(&img);
        assert_eq!(rgb.get_pixel(0, 0)[0], 127);
    }

    #[test]
    fn corrupt_and_svg_without_rasteriser_are_unavailable() {
        let bad = Asset::new("assets/x.png", b"definitely not a png".to_vec());
        assert!(prepare(&bad, &Capabilities::none(), None).is_err());
        let svg = Asset::new("assets/x.svg", b"<svg/>".to_vec());
        let err = prepare(&svg, &Capabilities::none(), None).unwrap_err();
        assert!(err.contains("SVG"));
    }

    #[test]
    fn large_images_are_downscaled() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(5000, 100, Rgba([1, 2, 3, 255])));
        let small = downscale(img);
        assert_eq!(small.width(), MAX_IMAGE_PIXELS);
    }

    #[test]
    fn display_size_uses_hints_and_clamps() {
        assert_eq!(display_size((400, 200), None, None, 1000.0, 1000.0), (300.0, 150.0));
        assert_eq!(display_size((400, 200), Some(200), None, 1000.0, 1000.0), (150.0, 75.0));
        let (w, h) = display_size((2000, 1000), None, None, 500.0, 1000.0);
        assert_eq!((w, h), (500.0, 250.0));
        let (w, h) = display_size((100, 1000), None, None, 500.0, 300.0);
        assert!((h - 300.0).abs() < 1e-3 && (w - 30.0).abs() < 1e-3);
    }

    #[test]
    fn cache_prepares_once_and_reports_missing() {
        let caps = Capabilities::none();
        let mut cache = ImageCache::new(&caps);
        let asset = Asset::new("assets/a.png", png(1, 1, Rgba([9, 9, 9, 255])));
        assert!(matches!(cache.get(0, Some(&asset), "a.png", None), ImageOutcome::Ready(_)));
        assert!(matches!(cache.get(0, Some(&asset), "assets/a.png", None), ImageOutcome::Ready(_)));
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get(0, None, "gone.png", None), ImageOutcome::Missing));
    }

    #[test]
    fn svg_width_hint_is_part_of_the_cache_key() {
        let caps = Capabilities::none();
        let mut cache = ImageCache::new(&caps);
        let svg = Asset::new("assets/crest.svg", b"<svg/>".to_vec());
        cache.get(0, Some(&svg), "crest.svg", Some(100));
        cache.get(0, Some(&svg), "crest.svg", Some(400));
        cache.get(0, Some(&svg), "crest.svg", Some(100));
        assert_eq!(cache.len(), 2);

        let raster = Asset::new("assets/a.png", png(1, 1, Rgba([9, 9, 9, 255])));
        cache.get(0, Some(&raster), "a.png", Some(100));
        cache.get(0, Some(&raster), "a.png", Some(400));
        assert_eq!(cache.len(), 3);
    }
}
