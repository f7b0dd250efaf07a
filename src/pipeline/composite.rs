//! Signature compositing: place one raster signature on a converted document.
//!
//! The work is split by capability rather than by file format. A
//! [`SignatureCanvas`] knows how to find the target location and how to embed
//! a raster image there; [`composite_onto`] drives any canvas through the same
//! steps. PDFs and DOCX packages are the two canvases provided.

use crate::config::SignaturePlacement;
use crate::document::{ArtifactKind, Page, PageRef, SignatureImage, SignedDocument, SourceFormat};
use crate::error::CompositingError;
use crate::identity::ArtifactId;
use crate::pipeline::docx::DocxCanvas;
use crate::pipeline::encode::{decode_signature, SignatureLimits};
use crate::pipeline::pdf::PdfDocument;
use serde::Serialize;
use tracing::{debug, info};

/// Final rectangle of the signature on a page, in page units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlacementBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Anchor the signature box to the bottom-right of `page`.
///
/// The box keeps its configured size. On pages narrower than `right_offset`
/// the left edge is clamped to the page's left edge, and on pages too short for
/// `bottom_offset + box_height` the box is pulled down until it fits.
pub fn place(page: &Page, placement: &SignaturePlacement) -> PlacementBox {
    let x = page.origin_x + (page.width - placement.right_offset).max(0.0);
    let headroom = (page.height - placement.box_height).max(0.0);
    let y = page.origin_y + placement.bottom_offset.min(headroom);
    PlacementBox {
        x,
        y,
        width: placement.box_width,
        height: placement.box_height,
    }
}

/// Something a signature can be drawn onto.
pub trait SignatureCanvas: Sized {
    /// Where in the document the signature goes.
    type Target;

    /// Resolve `page` against this document.
    fn resolve_target(&self, page: PageRef) -> Result<Self::Target, CompositingError>;

    /// Embed `sig` at `target`. Existing content must stay as it was.
    fn embed_image(
        &mut self,
        target: &Self::Target,
        sig: &SignatureImage,
        placement: &SignaturePlacement,
    ) -> Result<(), CompositingError>;

    /// Serialise the modified document.
    fn finish(self) -> Result<Vec<u8>, CompositingError>;
}

/// Resolve, embed, serialise.
pub fn composite_onto<C: SignatureCanvas>(
    mut canvas: C,
    sig: &SignatureImage,
    page: PageRef,
    placement: &SignaturePlacement,
) -> Result<Vec<u8>, CompositingError> {
    let target = canvas.resolve_target(page)?;
    canvas.embed_image(&target, sig, placement)?;
    canvas.finish()
}

// ── PDF ──────────────────────────────────────────────────────────────────

impl SignatureCanvas for PdfDocument {
    type Target = Page;

    fn resolve_target(&self, page: PageRef) -> Result<Page, CompositingError> {
        let pages = self.pages();
        page.resolve(pages.len())
            .map(|i| pages[i])
            .ok_or(CompositingError::PageNotFound {
                page: match page {
                    PageRef::Last => pages.len(),
                    PageRef::Index(i) => i + 1,
                },
                total: pages.len(),
            })
    }

    fn embed_image(
        &mut self,
        target: &Page,
        sig: &SignatureImage,
        placement: &SignaturePlacement,
    ) -> Result<(), CompositingError> {
        let rect = place(target, placement);
        self.draw_image(target.index, sig, &rect)
            .map_err(|detail| CompositingError::UnreadableDocument { detail })
    }

    fn finish(mut self) -> Result<Vec<u8>, CompositingError> {
        self.to_bytes()
            .map_err(|detail| CompositingError::Serialization { detail })
    }
}

// ── DOCX ─────────────────────────────────────────────────────────────────

/// Editable documents have no fixed pagination; the only resolvable target
/// is the end of the body, which is where the last page ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndOfBody;

impl SignatureCanvas for DocxCanvas {
    type Target = EndOfBody;

    fn resolve_target(&self, page: PageRef) -> Result<EndOfBody, CompositingError> {
        match page {
            PageRef::Last => Ok(EndOfBody),
            PageRef::Index(i) => Err(CompositingError::PageNotFound {
                page: i + 1,
                total: 0,
            }),
        }
    }

    fn embed_image(
        &mut self,
        _target: &EndOfBody,
        sig: &SignatureImage,
        placement: &SignaturePlacement,
    ) -> Result<(), CompositingError> {
        self.append_signature(sig, placement)
    }

    fn finish(self) -> Result<Vec<u8>, CompositingError> {
        self.into_bytes()
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Composite a decoded signature onto the stored artifact `id`.
///
/// Fails with [`CompositingError::AlreadySigned`] when `id` is itself a signed
/// artifact, so a document never carries two pipeline signatures. Any other
/// identity that is not a converted artifact (an upload in particular) fails
/// with [`CompositingError::UnreadableDocument`].
pub fn composite(
    id: &ArtifactId,
    bytes: &[u8],
    sig: &SignatureImage,
    page: PageRef,
    placement: &SignaturePlacement,
) -> Result<SignedDocument, CompositingError> {
    if id.is_signed() {
        return Err(CompositingError::AlreadySigned { id: id.to_string() });
    }
    let (_, kind) = id
        .converted_from()
        .ok_or_else(|| CompositingError::UnreadableDocument {
            detail: format!("'{id}' is not a converted document"),
        })?;

    let signed = match kind {
        ArtifactKind::Pdf => {
            let pdf = PdfDocument::load(bytes)
                .map_err(|detail| CompositingError::UnreadableDocument { detail })?;
            if pdf.page_count() == 0 {
                return Err(CompositingError::PageNotFound { page: 1, total: 0 });
            }
            composite_onto(pdf, sig, page, placement)?
        }
        ArtifactKind::Editable(SourceFormat::Docx) => {
            composite_onto(DocxCanvas::load(bytes)?, sig, page, placement)?
        }
        ArtifactKind::Editable(SourceFormat::Doc) => {
            return Err(CompositingError::UnreadableDocument {
                detail: "legacy .doc files cannot be signed in place".to_string(),
            })
        }
    };

    let signed_id = id.signed();
    info!(
        "Composited signature onto {} -> {} ({} bytes)",
        id,
        signed_id,
        signed.len()
    );
    Ok(SignedDocument {
        id: signed_id,
        kind,
        bytes: signed,
    })
}

/// Decode `payload` and composite it onto the last page of `id`.
pub fn composite_payload(
    id: &ArtifactId,
    bytes: &[u8],
    payload: &str,
    limits: &SignatureLimits,
    placement: &SignaturePlacement,
) -> Result<SignedDocument, CompositingError> {
    if id.is_signed() {
        return Err(CompositingError::AlreadySigned { id: id.to_string() });
    }
    let sig = decode_signature(payload, limits)?;
    debug!("Signature for {} is {}x{}", id, sig.width, sig.height);
    composite(id, bytes, &sig, PageRef::Last, placement)
}
