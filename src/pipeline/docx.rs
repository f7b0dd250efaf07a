//! DOCX access via docx-rs: plain-text extraction for reflow, and appending a
//! signature picture for in-place signing.

use crate::config::SignaturePlacement;
use crate::document::SignatureImage;
use crate::error::CompositingError;
use crate::pipeline::encode::signature_png;
use docx_rs::{
    read_docx, AlignmentType, Docx, DocumentChild, Paragraph, ParagraphChild, Pic, Run, RunChild,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Cursor;
use tracing::debug;

/// English Metric Units per PDF point.
const EMU_PER_POINT: f32 = 12_700.0;

static RE_INLINE_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{A0}]+").expect("static regex"));

/// Extract body paragraphs as plain text, one string per paragraph.
///
/// Only top-level paragraphs are read; tables, headers, footers, text boxes
/// and images are dropped. Tabs become spaces and line breaks inside a
/// paragraph become `\n`.
pub fn extract_paragraphs(bytes: &[u8]) -> Result<Vec<String>, String> {
    let docx = read_docx(bytes).map_err(|e| e.to_string())?;
    let mut paragraphs = Vec::new();
    let mut skipped = 0usize;

    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(p) => paragraphs.push(paragraph_text(p)),
            _ => skipped += 1,
        }
    }

    debug!(
        "Extracted {} paragraphs ({} non-paragraph blocks skipped)",
        paragraphs.len(),
        skipped
    );
    Ok(paragraphs)
}

fn paragraph_text(p: &Paragraph) -> String {
    let mut raw = String::new();
    for child in &p.children {
        if let ParagraphChild::Run(run) = child {
            for rc in &run.children {
                match rc {
                    RunChild::Text(t) => raw.push_str(&t.text),
                    RunChild::Tab(_) => raw.push(' '),
                    RunChild::Break(_) => raw.push('\n'),
                    _ => {}
                }
            }
        }
    }
    raw.split('\n')
        .map(|line| RE_INLINE_SPACE.replace_all(line, " ").trim().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Check that `bytes` parse as a DOCX package.
pub fn validate(bytes: &[u8]) -> Result<(), String> {
    read_docx(bytes).map(|_| ()).map_err(|e| e.to_string())
}

/// An editable document a signature can be appended to.
pub struct DocxCanvas {
    docx: Option<Docx>,
}

impl DocxCanvas {
    pub fn load(bytes: &[u8]) -> Result<Self, CompositingError> {
        let docx = read_docx(bytes).map_err(|e| CompositingError::UnreadableDocument {
            detail: e.to_string(),
        })?;
        Ok(Self { docx: Some(docx) })
    }

    /// Append a right-aligned paragraph holding the signature picture.
    pub fn append_signature(
        &mut self,
        sig: &SignatureImage,
        placement: &SignaturePlacement,
    ) -> Result<(), CompositingError> {
        let png = signature_png(sig)?;
        let pic = Pic::new(&png).size(
            to_emu(placement.box_width),
            to_emu(placement.box_height),
        );
        let paragraph = Paragraph::new()
            .align(AlignmentType::Right)
            .add_run(Run::new().add_image(pic));

        let docx = self.docx.take().ok_or_else(|| CompositingError::Serialization {
            detail: "document already consumed".to_string(),
        })?;
        self.docx = Some(docx.add_paragraph(paragraph));
        Ok(())
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, CompositingError> {
        let docx = self.docx.take().ok_or_else(|| CompositingError::Serialization {
            detail: "document already consumed".to_string(),
        })?;
        let mut cursor = Cursor::new(Vec::new());
        docx.build()
            .pack(&mut cursor)
            .map_err(|e| CompositingError::Serialization {
                detail: e.to_string(),
            })?;
        Ok(cursor.into_inner())
    }
}

fn to_emu(points: f32) -> u32 {
    (points * EMU_PER_POINT).round().max(0.0) as u32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use docx_rs::{BreakType, Table, TableCell, TableRow};

    /// Build a DOCX with one paragraph per entry.
    pub(crate) fn docx_with(paragraphs: &[&str]) -> Vec<u8> {
        let mut docx = Docx::new();
        for text in paragraphs {
            docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(*text)));
        }
        let mut cursor = Cursor::new(Vec::new());
        docx.build().pack(&mut cursor).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn extracts_paragraph_text() {
        let bytes = docx_with(&["Hello  world", "", "Second paragraph"]);
        let paragraphs = extract_paragraphs(&bytes).unwrap();
        assert_eq!(paragraphs, vec!["Hello world", "", "Second paragraph"]);
    }

    #[test]
    fn tabs_and_breaks_normalised() {
        let p = Paragraph::new().add_run(
            Run::new()
                .add_text("Name:")
                .add_tab()
                .add_text("Jo")
                .add_break(BreakType::TextWrapping)
                .add_text("Line two"),
        );
        let mut cursor = Cursor::new(Vec::new());
        Docx::new().add_paragraph(p).build().pack(&mut cursor).unwrap();
        let paragraphs = extract_paragraphs(&cursor.into_inner()).unwrap();
        assert_eq!(paragraphs, vec!["Name: Jo\nLine two"]);
    }

    #[test]
    fn tables_are_skipped() {
        let table = Table::new(vec![TableRow::new(vec![TableCell::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("cell")))])]);
        let mut cursor = Cursor::new(Vec::new());
        Docx::new()
            .add_paragraph(Paragraph::new().add_run(Run::new().add_text("body")))
            .add_table(table)
            .build()
            .pack(&mut cursor)
            .unwrap();
        assert_eq!(extract_paragraphs(&cursor.into_inner()).unwrap(), vec!["body"]);
    }

    #[test]
    fn non_docx_fails() {
        assert!(extract_paragraphs(b"PK\x03\x04 not really a zip").is_err());
        assert!(validate(b"hello").is_err());
    }

    #[test]
    fn appended_signature_survives_reload() {
        let bytes = docx_with(&["Agreement"]);
        let mut canvas = DocxCanvas::load(&bytes).unwrap();
        let sig = SignatureImage {
            width: 4,
            height: 2,
            rgba: vec![0; 4 * 2 * 4],
        };
        canvas
            .append_signature(&sig, &SignaturePlacement::default())
            .unwrap();
        let signed = canvas.into_bytes().unwrap();

        let reread = read_docx(&signed).unwrap();
        assert_eq!(reread.document.children.len(), 2);
        assert_eq!(extract_paragraphs(&signed).unwrap()[0], "Agreement");
    }

    #[test]
    fn points_to_emu() {
        assert_eq!(to_emu(150.0), 1_905_000);
        assert_eq!(to_emu(75.0), 952_500);
    }
}
