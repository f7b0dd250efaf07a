//! Document types flowing through the pipeline.

use crate::identity::{ArtifactId, DocumentId};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Source ───────────────────────────────────────────────────────────────

/// Word-processor formats accepted at upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Legacy binary Word document (OLE compound file).
    Doc,
    /// Office Open XML word-processing package.
    Docx,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 2] = [SourceFormat::Doc, SourceFormat::Docx];

    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Doc => "doc",
            SourceFormat::Docx => "docx",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            SourceFormat::Doc => "application/msword",
            SourceFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.');
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    pub fn from_media_type(media_type: &str) -> Option<Self> {
        let essence = media_type.split(';').next().unwrap_or("").trim();
        Self::ALL
            .into_iter()
            .find(|f| f.media_type().eq_ignore_ascii_case(essence))
    }

    /// Leading bytes every valid file of this format starts with.
    pub fn magic(self) -> &'static [u8] {
        match self {
            SourceFormat::Doc => &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1],
            SourceFormat::Docx => b"PK\x03\x04",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// An uploaded document. Immutable once received.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: DocumentId,
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

// ── Converted ────────────────────────────────────────────────────────────

/// How faithfully a converter reproduced the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fidelity", content = "note", rename_all = "lowercase")]
pub enum Fidelity {
    /// Layout, fonts and images rendered by an office engine, or the original
    /// editable file kept as-is.
    Full,
    /// Only text survived; the note says what was dropped.
    Reduced(String),
}

/// One page of a fixed-layout document, in PDF points.
///
/// `origin_x`/`origin_y` are the lower-left corner of the page's media box,
/// which is not always `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 0-indexed position in the document.
    pub index: usize,
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: f32,
    pub height: f32,
}

/// A page-oriented (PDF) conversion result.
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    pub bytes: Vec<u8>,
    /// Never empty.
    pub pages: Vec<Page>,
    pub fidelity: Fidelity,
}

impl ConvertedDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// A conversion that stayed in the original editable format.
#[derive(Debug, Clone)]
pub struct EditableDocument {
    pub format: SourceFormat,
    pub bytes: Vec<u8>,
}

/// Output of a [`crate::converter::FormatConverter`].
#[derive(Debug, Clone)]
pub enum ConversionResult {
    PageOriented(ConvertedDocument),
    NativeEditable(EditableDocument),
}

impl ConversionResult {
    pub fn bytes(&self) -> &[u8] {
        match self {
            ConversionResult::PageOriented(doc) => &doc.bytes,
            ConversionResult::NativeEditable(doc) => &doc.bytes,
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        match self {
            ConversionResult::PageOriented(_) => ArtifactKind::Pdf,
            ConversionResult::NativeEditable(doc) => ArtifactKind::Editable(doc.format),
        }
    }

    pub fn fidelity(&self) -> Fidelity {
        match self {
            ConversionResult::PageOriented(doc) => doc.fidelity.clone(),
            ConversionResult::NativeEditable(_) => Fidelity::Full,
        }
    }

    /// Number of pages, when the result is page-oriented.
    pub fn page_count(&self) -> Option<usize> {
        match self {
            ConversionResult::PageOriented(doc) => Some(doc.page_count()),
            ConversionResult::NativeEditable(_) => None,
        }
    }

    /// Identity this result is persisted under.
    pub fn artifact_id(&self, source: &DocumentId) -> ArtifactId {
        match self {
            ConversionResult::PageOriented(_) => ArtifactId::converted_pdf(source),
            ConversionResult::NativeEditable(doc) => {
                ArtifactId::converted_editable(source, doc.format)
            }
        }
    }
}

/// Shape of a stored converted or signed artifact. Recovered from a converted
/// identity by [`ArtifactId::converted_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Pdf,
    Editable(SourceFormat),
}

impl ArtifactKind {
    pub fn media_type(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "application/pdf",
            ArtifactKind::Editable(format) => format.media_type(),
        }
    }
}

// ── Signature ────────────────────────────────────────────────────────────

/// Decoded raster signature. Transient; never persisted on its own.
#[derive(Debug, Clone)]
pub struct SignatureImage {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

/// Which page receives the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PageRef {
    /// The final page. The pipeline always signs here.
    #[default]
    Last,
    /// A specific 0-indexed page.
    Index(usize),
}

impl PageRef {
    /// Resolve against a document with `total` pages.
    pub fn resolve(self, total: usize) -> Option<usize> {
        match self {
            PageRef::Last => total.checked_sub(1),
            PageRef::Index(i) if i < total => Some(i),
            PageRef::Index(_) => None,
        }
    }
}

/// A converted document with exactly one signature composited onto it.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    pub id: ArtifactId,
    pub kind: ArtifactKind,
    pub bytes: Vec<u8>,
}
