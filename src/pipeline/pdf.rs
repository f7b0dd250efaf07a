//! PDF structure access via lopdf: page geometry, text-page generation and
//! raster image embedding.
//!
//! All functions here are synchronous and CPU-bound; async callers run them
//! inside `spawn_blocking`.

use crate::config::PageLayout;
use crate::document::{Page, SignatureImage};
use crate::pipeline::composite::PlacementBox;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use tracing::debug;

/// Page-tree inheritance is shallow in practice; this only guards against cycles.
const MAX_TREE_DEPTH: usize = 32;

/// US Letter, used when no `MediaBox` is found anywhere up the page tree.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Errors from this module, kept as text; callers attach stage context.
pub type PdfResult<T> = Result<T, String>;

fn text<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}

/// A loaded PDF with its pages in document order.
pub struct PdfDocument {
    doc: Document,
    pages: Vec<(ObjectId, Page)>,
}

impl PdfDocument {
    /// Parse a PDF and read the geometry of every page.
    pub fn load(bytes: &[u8]) -> PdfResult<Self> {
        if bytes.is_empty() {
            return Err("document is empty".to_string());
        }
        let doc = Document::load_mem(bytes).map_err(text)?;
        let pages = doc
            .get_pages()
            .into_values()
            .enumerate()
            .map(|(index, id)| {
                let [llx, lly, urx, ury] = media_box(&doc, id);
                let page = Page {
                    index,
                    origin_x: llx.min(urx),
                    origin_y: lly.min(ury),
                    width: (urx - llx).abs(),
                    height: (ury - lly).abs(),
                };
                (id, page)
            })
            .collect();
        Ok(Self { doc, pages })
    }

    pub fn pages(&self) -> Vec<Page> {
        self.pages.iter().map(|(_, p)| *p).collect()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Draw `sig` into `rect` on page `index`, leaving existing content intact.
    pub fn draw_image(
        &mut self,
        index: usize,
        sig: &SignatureImage,
        rect: &PlacementBox,
    ) -> PdfResult<()> {
        let page_id = self
            .pages
            .get(index)
            .map(|(id, _)| *id)
            .ok_or_else(|| format!("page index {index} out of range"))?;

        let image_id = self.add_image_xobject(sig)?;
        let name = self.register_xobject(page_id, image_id)?;

        let ops = format!(
            "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
            fmt_num(rect.width),
            fmt_num(rect.height),
            fmt_num(rect.x),
            fmt_num(rect.y),
            name
        );
        self.append_isolated_content(page_id, ops.into_bytes())?;
        debug!(
            "Embedded /{} on page {} at ({}, {}) {}x{}",
            name,
            index + 1,
            rect.x,
            rect.y,
            rect.width,
            rect.height
        );
        Ok(())
    }

    /// Serialise the whole document.
    pub fn to_bytes(&mut self) -> PdfResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.doc.save_to(&mut buf).map_err(text)?;
        Ok(buf)
    }

    /// RGB image XObject with an 8-bit alpha soft mask, both Flate-compressed.
    fn add_image_xobject(&mut self, sig: &SignatureImage) -> PdfResult<ObjectId> {
        let pixels = (sig.width as usize) * (sig.height as usize);
        if sig.rgba.len() != pixels * 4 {
            return Err("pixel buffer does not match image dimensions".to_string());
        }
        let mut rgb = Vec::with_capacity(pixels * 3);
        let mut alpha = Vec::with_capacity(pixels);
        for px in sig.rgba.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }

        let smask_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => sig.width as i64,
                "Height" => sig.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        ));

        Ok(self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => sig.width as i64,
                "Height" => sig.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
                "SMask" => Object::Reference(smask_id),
            },
            deflate(&rgb)?,
        )))
    }

    /// Add `image_id` to the page's XObject resources under a fresh name.
    ///
    /// Resources may be inline, referenced, or inherited from the page tree;
    /// inherited ones are copied onto the page first so siblings are untouched.
    fn register_xobject(&mut self, page_id: ObjectId, image_id: ObjectId) -> PdfResult<String> {
        let resources = match self.dict(page_id)?.get(b"Resources") {
            Ok(Object::Reference(id)) => Slot::Object(*id),
            Ok(Object::Dictionary(_)) => Slot::Inline,
            _ => Slot::Missing,
        };
        let resources = match resources {
            Slot::Missing => {
                let inherited = inherited_dict(&self.doc, page_id, b"Resources").unwrap_or_default();
                self.dict_mut(page_id)?
                    .set("Resources", Object::Dictionary(inherited));
                Slot::Inline
            }
            other => other,
        };

        let xobjects = match self.resources_mut(page_id, resources)?.get(b"XObject") {
            Ok(Object::Reference(id)) => Slot::Object(*id),
            Ok(Object::Dictionary(_)) => Slot::Inline,
            _ => Slot::Missing,
        };
        if xobjects == Slot::Missing {
            self.resources_mut(page_id, resources)?
                .set("XObject", Object::Dictionary(Dictionary::new()));
        }

        let table = match xobjects {
            Slot::Object(id) => self.dict_mut(id)?,
            Slot::Inline | Slot::Missing => self
                .resources_mut(page_id, resources)?
                .get_mut(b"XObject")
                .and_then(Object::as_dict_mut)
                .map_err(text)?,
        };

        let mut n = 0usize;
        let name = loop {
            let candidate = format!("DocSig{n}");
            if !table.has(candidate.as_bytes()) {
                break candidate;
            }
            n += 1;
        };
        table.set(name.clone(), Object::Reference(image_id));
        Ok(name)
    }

    /// Append `ops` as a new content stream, wrapping the existing content in
    /// `q … Q` so any unbalanced transform it leaves cannot move the new drawing.
    fn append_isolated_content(&mut self, page_id: ObjectId, ops: Vec<u8>) -> PdfResult<()> {
        let existing: Vec<Object> = match self.dict(page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut contents = Vec::with_capacity(existing.len() + 2);
        let mut tail = ops;
        if !existing.is_empty() {
            let open = self
                .doc
                .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
            contents.push(Object::Reference(open));
            contents.extend(existing);
            let mut closed = b"\nQ\n".to_vec();
            closed.append(&mut tail);
            tail = closed;
        }
        let added = self.doc.add_object(Stream::new(Dictionary::new(), tail));
        contents.push(Object::Reference(added));

        self.dict_mut(page_id)?
            .set("Contents", Object::Array(contents));
        Ok(())
    }

    fn dict(&self, id: ObjectId) -> PdfResult<&Dictionary> {
        self.doc
            .get_object(id)
            .and_then(Object::as_dict)
            .map_err(text)
    }

    fn dict_mut(&mut self, id: ObjectId) -> PdfResult<&mut Dictionary> {
        self.doc
            .get_object_mut(id)
            .and_then(Object::as_dict_mut)
            .map_err(text)
    }

    fn resources_mut(&mut self, page_id: ObjectId, slot: Slot) -> PdfResult<&mut Dictionary> {
        match slot {
            Slot::Object(id) => self.dict_mut(id),
            Slot::Inline | Slot::Missing => self
                .dict_mut(page_id)?
                .get_mut(b"Resources")
                .and_then(Object::as_dict_mut)
                .map_err(text),
        }
    }
}

/// Where a dictionary-valued entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Inline,
    Object(ObjectId),
    Missing,
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

/// Look `key` up on the node and then its ancestors, as the page tree allows.
fn inherited<'a>(doc: &'a Document, node: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = doc.get_object(node).ok()?.as_dict().ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(resolve(doc, value));
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

fn inherited_dict(doc: &Document, node: ObjectId, key: &[u8]) -> Option<Dictionary> {
    inherited(doc, node, key)?.as_dict().ok().cloned()
}

fn media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let values: Option<Vec<f32>> = inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| obj.as_array().ok())
        .map(|items| {
            items
                .iter()
                .filter_map(|o| resolve(doc, o).as_float().ok())
                .collect()
        });
    match values.as_deref() {
        Some([a, b, c, d]) => [*a, *b, *c, *d],
        _ => DEFAULT_MEDIA_BOX,
    }
}

fn deflate(data: &[u8]) -> PdfResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(text)?;
    encoder.finish().map_err(text)
}

/// Content-stream number: integral values without a fraction, others with
/// at most three decimals.
fn fmt_num(v: f32) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        let s = format!("{v:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

// ── Text pages ───────────────────────────────────────────────────────────

/// Write pre-wrapped lines as a Helvetica PDF, one inner `Vec` per page.
///
/// `producer` is recorded in the Info dictionary so readers can tell how the
/// file was made.
pub fn build_text_pdf(pages: &[Vec<String>], layout: &PageLayout, producer: &str) -> PdfResult<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let first_baseline = layout.height - layout.margin - layout.font_size;
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len().max(1));
    let blank = [Vec::new()];
    let pages = if pages.is_empty() { &blank[..] } else { pages };

    for lines in pages {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), layout.font_size.into()]),
            Operation::new("TL", vec![layout.line_height.into()]),
            Operation::new("Td", vec![layout.margin.into(), first_baseline.into()]),
        ];
        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                operations.push(Operation::new("T*", vec![]));
            }
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(win_ansi(line), StringFormat::Literal)],
            ));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode().map_err(text)?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), layout.width.into(), layout.height.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let info_id = doc.add_object(dictionary! {
        "Producer" => Object::string_literal(producer),
    });
    doc.trailer.set("Info", info_id);

    doc.compress();
    let mut buf = Vec::new();
    doc.save_to(&mut buf).map_err(text)?;
    Ok(buf)
}

/// Encode text for a WinAnsi simple font. Characters outside the encoding
/// become `?`.
pub fn win_ansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{A0}'..='\u{FF}' => c as u32 as u8,
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn text_pdf_has_requested_pages() {
        let layout = PageLayout::default();
        let bytes = build_text_pdf(&[lines(3), lines(2)], &layout, "test").unwrap();
        let pdf = PdfDocument::load(&bytes).unwrap();
        assert_eq!(pdf.page_count(), 2);
        let page = pdf.pages()[1];
        assert_eq!(page.index, 1);
        assert_eq!((page.width, page.height), (612.0, 792.0));
    }

    #[test]
    fn empty_text_pdf_still_has_a_page() {
        let bytes = build_text_pdf(&[], &PageLayout::default(), "test").unwrap();
        assert_eq!(PdfDocument::load(&bytes).unwrap().page_count(), 1);
    }

    #[test]
    fn garbage_does_not_load() {
        assert!(PdfDocument::load(b"").is_err());
        assert!(PdfDocument::load(b"definitely not a pdf").is_err());
    }

    #[test]
    fn embed_registers_unique_names() {
        let bytes = build_text_pdf(&[lines(1)], &PageLayout::default(), "test").unwrap();
        let mut pdf = PdfDocument::load(&bytes).unwrap();
        let sig = SignatureImage {
            width: 2,
            height: 1,
            rgba: vec![0, 0, 0, 255, 255, 255, 255, 0],
        };
        let rect = PlacementBox {
            x: 392.0,
            y: 50.0,
            width: 150.0,
            height: 75.0,
        };
        let first = {
            let page_id = pdf.pages[0].0;
            let image_id = pdf.add_image_xobject(&sig).unwrap();
            pdf.register_xobject(page_id, image_id).unwrap()
        };
        let second = {
            let page_id = pdf.pages[0].0;
            let image_id = pdf.add_image_xobject(&sig).unwrap();
            pdf.register_xobject(page_id, image_id).unwrap()
        };
        assert_ne!(first, second);
        pdf.draw_image(0, &sig, &rect).unwrap();
        assert!(pdf.draw_image(5, &sig, &rect).is_err());
    }

    #[test]
    fn mismatched_pixels_rejected() {
        let bytes = build_text_pdf(&[lines(1)], &PageLayout::default(), "test").unwrap();
        let mut pdf = PdfDocument::load(&bytes).unwrap();
        let sig = SignatureImage {
            width: 10,
            height: 10,
            rgba: vec![0; 4],
        };
        let rect = PlacementBox {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        };
        assert!(pdf.draw_image(0, &sig, &rect).is_err());
    }

    #[test]
    fn win_ansi_maps_latin1_and_replaces_rest() {
        assert_eq!(win_ansi("Aé€"), vec![b'A', 0xE9, 0x80]);
        assert_eq!(win_ansi("שלום"), b"????".to_vec());
    }

    #[test]
    fn numbers_formatted_compactly() {
        assert_eq!(fmt_num(392.0), "392");
        assert_eq!(fmt_num(12.5), "12.5");
        assert_eq!(fmt_num(0.125), "0.125");
    }
}
