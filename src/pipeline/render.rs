//! Pass 2: serialise a [`Layout`] as a PDF with `lopdf`.
//!
//! Everything symbolic from pass 1 is resolved here:
//!
//! * [`Item::TocNumber`] → the printed page number of its anchor
//! * [`Item::Link`] → a `/Link` annotation with an explicit `/XYZ` destination
//! * content pages get "Back to Table of Contents" links in the top and
//!   bottom margins plus an optional page-number footer
//! * the TOC is mirrored as the document outline (bookmarks)
//!
//! Fonts are the four standard Helvetica faces, so nothing is embedded.
//! Output is deterministic: no timestamps, no random ids.

use crate::config::ExportConfig;
use crate::error::Journal2PdfError;
use crate::pipeline::fonts::{self, FontStyle};
use crate::pipeline::images::deflate;
use crate::pipeline::layout::{Destination, Item, Layout, PageKind, TOC_ANCHOR};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, info};

/// Label of the per-page link back to the table of contents.
pub const BACK_TO_TOC: &str = "Back to Table of Contents";

const LINK_RGB: [f32; 3] = [0.0, 0.2, 0.6];

/// Serialise `layout` into PDF bytes.
pub fn render(layout: &Layout, title: &str, config: &ExportConfig) -> Result<Vec<u8>, Journal2PdfError> {
    let (width, height) = layout.page_size;
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let page_ids: Vec<ObjectId> = layout.pages.iter().map(|_| doc.new_object_id()).collect();

    // ── Shared resources ─────────────────────────────────────────────────
    let mut font_dict = Dictionary::new();
    for style in FontStyle::ALL {
        let id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => style.base_font(),
            "Encoding" => "WinAnsiEncoding",
        });
        font_dict.set(style.resource_name(), id);
    }
    let mut xobjects = Dictionary::new();
    for (i, img) in layout.images.iter().enumerate() {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(img.width),
                "Height" => i64::from(img.height),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "FlateDecode",
            },
            img.data.clone(),
        );
        let id = doc.add_object(stream);
        xobjects.set(image_name(i), id);
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => font_dict,
        "XObject" => xobjects,
    });

    let dest = |anchor: &str| -> Option<(Destination, Object)> {
        let d = *layout.anchors.get(anchor)?;
        let page = *page_ids.get(d.page)?;
        let top = (d.top + 6.0).min(height);
        Some((
            d,
            Object::Array(vec![
                Object::Reference(page),
                "XYZ".into(),
                Object::Null,
                top.into(),
                Object::Null,
            ]),
        ))
    };

    // ── Pages ────────────────────────────────────────────────────────────
    let margin = config.margin_pt;
    let small = config.body_font_size * 0.9;
    let toc_dest = dest(TOC_ANCHOR).map(|(_, o)| o);
    let mut links = 0usize;

    for (index, page) in layout.pages.iter().enumerate() {
        let mut ops = Vec::with_capacity(page.items.len() * 4);
        let mut annots: Vec<Object> = Vec::new();
        let mut text = TextRun::default();

        for item in &page.items {
            match item {
                Item::Text {
                    x,
                    y,
                    size,
                    style,
                    text: t,
                } => text.show(&mut ops, *style, *size, *x, *y, t),
                Item::TocNumber {
                    right,
                    y,
                    size,
                    style,
                    anchor,
                } => match layout.anchors.get(anchor) {
                    Some(d) => {
                        let n = (d.page + 1).to_string();
                        let w = fonts::text_width(&n, *style, *size);
                        text.show(&mut ops, *style, *size, right - w, *y, &n);
                    }
                    None => debug!("TOC anchor '{anchor}' has no destination"),
                },
                Item::Link { rect, anchor } => match dest(anchor) {
                    Some((_, d)) => {
                        annots.push(link_annotation(&mut doc, *rect, d));
                        links += 1;
                    }
                    None => debug!("Link anchor '{anchor}' has no destination"),
                },
                Item::Line {
                    x0,
                    y0,
                    x1,
                    y1,
                    width: w,
                } => {
                    text.end(&mut ops);
                    ops.push(Operation::new("w", vec![(*w).into()]));
                    ops.push(Operation::new("m", vec![(*x0).into(), (*y0).into()]));
                    ops.push(Operation::new("l", vec![(*x1).into(), (*y1).into()]));
                    ops.push(Operation::new("S", vec![]));
                }
                Item::Rect { x, y, w, h } => {
                    text.end(&mut ops);
                    ops.push(Operation::new("w", vec![0.5f32.into()]));
                    ops.push(Operation::new(
                        "re",
                        vec![(*x).into(), (*y).into(), (*w).into(), (*h).into()],
                    ));
                    ops.push(Operation::new("S", vec![]));
                }
                Item::Image { index, x, y, w, h } => {
                    text.end(&mut ops);
                    ops.push(Operation::new("q", vec![]));
                    ops.push(Operation::new(
                        "cm",
                        vec![
                            (*w).into(),
                            Object::Integer(0),
                            Object::Integer(0),
                            (*h).into(),
                            (*x).into(),
                            (*y).into(),
                        ],
                    ));
                    ops.push(Operation::new("Do", vec![Object::Name(image_name(*index).into_bytes())]));
                    ops.push(Operation::new("Q", vec![]));
                }
            }
        }

        if page.kind == PageKind::Content {
            let top_y = height - margin * 0.8;
            let bottom_y = margin * 0.6;
            if config.back_to_toc_links {
                if let Some(d) = &toc_dest {
                    let w = fonts::text_width(BACK_TO_TOC, FontStyle::Regular, small);
                    for y in [top_y, bottom_y] {
                        text.color(&mut ops, LINK_RGB);
                        text.show(&mut ops, FontStyle::Regular, small, margin, y, BACK_TO_TOC);
                        text.color(&mut ops, [0.0; 3]);
                        let rect = [margin, y - 2.0, margin + w + 2.0, y + small];
                        annots.push(link_annotation(&mut doc, rect, d.clone()));
                        links += 1;
                    }
                }
            }
            if config.page_numbers {
                let n = (index + 1).to_string();
                let w = fonts::text_width(&n, FontStyle::Regular, small);
                text.show(&mut ops, FontStyle::Regular, small, width - margin - w, bottom_y, &n);
            }
        }
        text.end(&mut ops);

        let encoded = Content { operations: ops }.encode()?;
        let stream = if config.compress_streams {
            let packed = deflate(&encoded).map_err(|e| Journal2PdfError::Render {
                detail: format!("content stream compression failed: {e}"),
            })?;
            Stream::new(dictionary! { "Filter" => "FlateDecode" }, packed)
        } else {
            Stream::new(Dictionary::new(), encoded)
        };
        let content_id = doc.add_object(stream);

        let mut page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), width.into(), height.into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        };
        if !annots.is_empty() {
            page_dict.set("Annots", annots);
        }
        doc.objects.insert(page_ids[index], Object::Dictionary(page_dict));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|&id| Object::Reference(id)).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
        }),
    );

    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if let Some(outline_id) = outline(&mut doc, layout, &dest) {
        catalog.set("Outlines", outline_id);
        catalog.set("PageMode", "UseOutlines");
    }
    let catalog_id = doc.add_object(catalog);
    let info_id = doc.add_object(dictionary! {
        "Title" => text_string(title),
        "Producer" => text_string(concat!("journal2pdf ", env!("CARGO_PKG_VERSION"))),
        "Creator" => text_string("journal2pdf"),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).map_err(|e| Journal2PdfError::Render {
        detail: format!("PDF serialisation failed: {e}"),
    })?;
    info!(
        "Rendered PDF: {} page(s), {} link(s), {} bytes",
        layout.pages.len(),
        links,
        out.len()
    );
    Ok(out)
}

fn image_name(index: usize) -> String {
    format!("Im{index}")
}

fn link_annotation(doc: &mut Document, rect: [f32; 4], dest: Object) -> Object {
    let id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Link",
        "Rect" => rect.iter().map(|&v| Object::from(v)).collect::<Vec<_>>(),
        "Border" => vec![Object::Integer(0), Object::Integer(0), Object::Integer(0)],
        "Dest" => dest,
    });
    Object::Reference(id)
}

/// PDF text string: literal for ASCII, UTF-16BE with BOM otherwise.
fn text_string(s: &str) -> Object {
    if s.is_ascii() {
        return Object::String(s.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in s.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Tracks the open `BT` block so font changes and colour switches emit the
/// minimum number of operators.
#[derive(Default)]
struct TextRun {
    open: bool,
    font: Option<(FontStyle, u32)>,
}

impl TextRun {
    fn begin(&mut self, ops: &mut Vec<Operation>) {
        if !self.open {
            ops.push(Operation::new("BT", vec![]));
            self.open = true;
            self.font = None;
        }
    }

    fn end(&mut self, ops: &mut Vec<Operation>) {
        if self.open {
            ops.push(Operation::new("ET", vec![]));
            self.open = false;
        }
    }

    fn color(&mut self, ops: &mut Vec<Operation>, rgb: [f32; 3]) {
        ops.push(Operation::new(
            "rg",
            vec![rgb[0].into(), rgb[1].into(), rgb[2].into()],
        ));
    }

    fn show(&mut self, ops: &mut Vec<Operation>, style: FontStyle, size: f32, x: f32, y: f32, text: &str) {
        if text.is_empty() {
            return;
        }
        self.begin(ops);
        let key = (style, size.to_bits());
        if self.font != Some(key) {
            ops.push(Operation::new(
                "Tf",
                vec![style.resource_name().into(), size.into()],
            ));
            self.font = Some(key);
        }
        ops.push(Operation::new(
            "Tm",
            vec![Object::Integer(1), Object::Integer(0), Object::Integer(0), Object::Integer(1), x.into(), y.into()],
        ));
        ops.push(Operation::new(
            "Tj",
            vec![Object::String(fonts::encode(text), StringFormat::Literal)],
        ));
    }
}

/// Build the bookmark tree from the TOC. Returns the `/Outlines` id.
fn outline<F>(doc: &mut Document, layout: &Layout, dest: &F) -> Option<ObjectId>
where
    F: Fn(&str) -> Option<(Destination, Object)>,
{
    let entries: Vec<_> = layout
        .toc
        .iter()
        .filter_map(|e| dest(&e.anchor).map(|(_, d)| (e, d)))
        .collect();
    if entries.is_empty() {
        return None;
    }

    let root_id = doc.new_object_id();
    let ids: Vec<ObjectId> = entries.iter().map(|_| doc.new_object_id()).collect();

    // parent[i] = index of the nearest shallower preceding entry
    let mut parent: Vec<Option<usize>> = Vec::with_capacity(entries.len());
    let mut stack: Vec<usize> = Vec::new();
    for (i, (e, _)) in entries.iter().enumerate() {
        while stack.last().is_some_and(|&s| entries[s].0.depth >= e.depth) {
            stack.pop();
        }
        parent.push(stack.last().copied());
        stack.push(i);
    }
    let children = |p: Option<usize>| -> Vec<usize> {
        (0..entries.len()).filter(|&i| parent[i] == p).collect()
    };
    let descendants = |i: usize| -> i64 {
        let mut n = 0;
        let mut j = i + 1;
        while j < entries.len() && entries[j].0.depth > entries[i].0.depth {
            n += 1;
            j += 1;
        }
        n
    };

    for (i, (entry, d)) in entries.iter().enumerate() {
        let siblings = children(parent[i]);
        let pos = siblings.iter().position(|&s| s == i).unwrap_or(0);
        let mut item = dictionary! {
            "Title" => text_string(&entry.label),
            "Parent" => parent[i].map(|p| ids[p]).unwrap_or(root_id),
            "Dest" => d.clone(),
        };
        if pos > 0 {
            item.set("Prev", ids[siblings[pos - 1]]);
        }
        if let Some(&next) = siblings.get(pos + 1) {
            item.set("Next", ids[next]);
        }
        let kids = children(Some(i));
        if let (Some(&first), Some(&last)) = (kids.first(), kids.last()) {
            item.set("First", ids[first]);
            item.set("Last", ids[last]);
            item.set("Count", -descendants(i));
        }
        doc.objects.insert(ids[i], Object::Dictionary(item));
    }

    let top = children(None);
    let (first, last) = (*top.first()?, *top.last()?);
    doc.objects.insert(
        root_id,
        Object::Dictionary(dictionary! {
            "Type" => "Outlines",
            "First" => ids[first],
            "Last" => ids[last],
            "Count" => top.len() as i64,
        }),
    );
    Some(root_id)
}
