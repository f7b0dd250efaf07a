//! Text-reflow converter: extract the text of a DOCX and re-typeset it as a
//! plain PDF.
//!
//! Needs no external engine, at the cost of fidelity: tables, images,
//! fonts, headers and footers are lost. The result is marked
//! [`Fidelity::Reduced`] and the PDF's Producer says so.

use crate::config::PageLayout;
use crate::converter::FormatConverter;
use crate::document::{ConversionResult, ConvertedDocument, Fidelity, SourceDocument, SourceFormat};
use crate::error::ConversionError;
use crate::pipeline::{docx, pdf};
use futures::future::BoxFuture;
use tracing::info;

/// Average Helvetica advance width as a fraction of the font size.
const AVG_GLYPH_EM: f32 = 0.5;

const PRODUCER: &str = "docsign text-reflow (reduced fidelity: text only)";

const FIDELITY_NOTE: &str = "text only; layout, tables and images were not preserved";

pub struct TextReflowConverter {
    layout: PageLayout,
}

impl TextReflowConverter {
    pub fn new(layout: PageLayout) -> Self {
        Self { layout }
    }

    async fn run(&self, source: &SourceDocument) -> Result<ConversionResult, ConversionError> {
        if source.format != SourceFormat::Docx {
            return Err(ConversionError::UnsupportedFormat {
                format: source.format.to_string(),
                strategy: self.name().to_string(),
            });
        }

        let bytes = source.bytes.clone();
        let layout = self.layout;
        let (bytes, pages) = tokio::task::spawn_blocking(move || reflow_blocking(&bytes, &layout))
            .await
            .map_err(|e| ConversionError::Task(format!("Reflow task panicked: {e}")))??;

        info!(
            "Reflowed {} into {} page(s) ({} bytes)",
            source.id,
            pages.len(),
            bytes.len()
        );
        Ok(ConversionResult::PageOriented(ConvertedDocument {
            bytes,
            pages,
            fidelity: self.fidelity(),
        }))
    }
}

impl FormatConverter for TextReflowConverter {
    fn name(&self) -> &'static str {
        "text-reflow"
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Reduced(FIDELITY_NOTE.to_string())
    }

    fn convert<'a>(
        &'a self,
        source: &'a SourceDocument,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        Box::pin(self.run(source))
    }
}

fn reflow_blocking(
    bytes: &[u8],
    layout: &PageLayout,
) -> Result<(Vec<u8>, Vec<crate::document::Page>), ConversionError> {
    let paragraphs =
        docx::extract_paragraphs(bytes).map_err(|detail| ConversionError::InvalidInput { detail })?;
    let pages = paginate(&paragraphs, layout);
    let pdf_bytes = pdf::build_text_pdf(&pages, layout, PRODUCER)
        .map_err(|detail| ConversionError::InvalidOutput { detail })?;
    let inspected = pdf::PdfDocument::load(&pdf_bytes)
        .map_err(|detail| ConversionError::InvalidOutput { detail })?
        .pages();
    Ok((pdf_bytes, inspected))
}

/// Characters per line for `layout`, never less than one.
fn chars_per_line(layout: &PageLayout) -> usize {
    ((layout.text_width() / (layout.font_size * AVG_GLYPH_EM)).floor() as usize).max(1)
}

/// Lines per page for `layout`, never less than one.
fn lines_per_page(layout: &PageLayout) -> usize {
    ((layout.text_height() / layout.line_height).floor() as usize).max(1)
}

/// Greedy word wrap. Words longer than `width` are split hard.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split(' ').filter(|w| !w.is_empty()) {
        let mut chars: Vec<char> = word.chars().collect();
        while chars.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = chars.split_off(width);
            lines.push(chars.into_iter().collect());
            chars = rest;
        }
        let len = chars.len();
        if current_len > 0 && current_len + 1 + len > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.extend(chars);
        current_len += len;
    }

    if current_len > 0 || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Wrap every paragraph and cut the lines into pages.
///
/// Empty paragraphs keep their blank line. A document without text still
/// yields one blank page.
pub fn paginate(paragraphs: &[String], layout: &PageLayout) -> Vec<Vec<String>> {
    let width = chars_per_line(layout);
    let per_page = lines_per_page(layout);

    let lines: Vec<String> = paragraphs
        .iter()
        .flat_map(|p| p.split('\n').map(|line| wrap(line, width)).collect::<Vec<_>>())
        .flatten()
        .collect();

    if lines.iter().all(|l| l.is_empty()) {
        return vec![Vec::new()];
    }
    lines.chunks(per_page).map(<[String]>::to_vec).collect()
}
