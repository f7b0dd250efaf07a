//! Native round-trip converter: keep the DOCX as it is and sign it in place.

use crate::converter::FormatConverter;
use crate::document::{ConversionResult, EditableDocument, Fidelity, SourceDocument, SourceFormat};
use crate::error::ConversionError;
use crate::pipeline::docx;
use futures::future::BoxFuture;
use tracing::info;

pub struct RoundTripConverter;

impl RoundTripConverter {
    async fn run(&self, source: &SourceDocument) -> Result<ConversionResult, ConversionError> {
        if source.format != SourceFormat::Docx {
            return Err(ConversionError::UnsupportedFormat {
                format: source.format.to_string(),
                strategy: self.name().to_string(),
            });
        }

        let bytes = source.bytes.clone();
        let bytes = tokio::task::spawn_blocking(move || docx::validate(&bytes).map(|()| bytes))
            .await
            .map_err(|e| ConversionError::Task(format!("DOCX validation panicked: {e}")))?
            .map_err(|detail| ConversionError::InvalidInput { detail })?;

        info!("Keeping {} as editable DOCX ({} bytes)", source.id, bytes.len());
        Ok(ConversionResult::NativeEditable(EditableDocument {
            format: SourceFormat::Docx,
            bytes,
        }))
    }
}

impl FormatConverter for RoundTripConverter {
    fn name(&self) -> &'static str {
        "native-round-trip"
    }

    fn fidelity(&self) -> Fidelity {
        Fidelity::Full
    }

    fn convert<'a>(
        &'a self,
        source: &'a SourceDocument,
    ) -> BoxFuture<'a, Result<ConversionResult, ConversionError>> {
        Box::pin(self.run(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ArtifactId, DocumentId};
    use crate::pipeline::docx::tests::docx_with;

    #[tokio::test]
    async fn keeps_docx_bytes() {
        let bytes = docx_with(&["Keep me"]);
        let source = SourceDocument {
            id: DocumentId::generate(SourceFormat::Docx),
            format: SourceFormat::Docx,
            bytes: bytes.clone(),
        };
        let result = RoundTripConverter.convert(&source).await.unwrap();
        assert_eq!(result.bytes(), &bytes[..]);
        assert_eq!(result.page_count(), None);
        assert_eq!(
            result.artifact_id(&source.id),
            ArtifactId::parse(format!("{}.signable.docx", source.id)).unwrap()
        );
    }

    #[tokio::test]
    async fn rejects_doc_and_garbage() {
        let doc = SourceDocument {
            id: DocumentId::generate(SourceFormat::Doc),
            format: SourceFormat::Doc,
            bytes: SourceFormat::Doc.magic().to_vec(),
        };
        assert!(matches!(
            RoundTripConverter.convert(&doc).await,
            Err(ConversionError::UnsupportedFormat { .. })
        ));

        let junk = SourceDocument {
            id: DocumentId::generate(SourceFormat::Docx),
            format: SourceFormat::Docx,
            bytes: b"PK\x03\x04junk".to_vec(),
        };
        assert!(matches!(
            RoundTripConverter.convert(&junk).await,
            Err(ConversionError::InvalidInput { .. })
        ));
    }
}
