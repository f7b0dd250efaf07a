//! Pipeline orchestrator: upload, convert, present, sign, persist, deliver.
//!
//! A [`Pipeline`] is built once from a [`PipelineConfig`] and shared by all
//! requests. It holds no per-request state; every request carries its own
//! [`PipelineState`] and the only shared resource is the artifact store.
//!
//! Presentation and signing are separate calls. [`Pipeline::sign`] never
//! trusts anything from the presentation step except the artifact identity,
//! which it validates and re-resolves from storage.

use crate::config::PipelineConfig;
use crate::converter::{check_result, resolve_converter, FormatConverter};
use crate::document::{ArtifactKind, Fidelity, SignedDocument, SourceDocument};
use crate::error::{CompositingError, DeliveryError, PersistenceError, PipelineError};
use crate::identity::{ArtifactId, DocumentId};
use crate::pipeline::composite::composite_payload;
use crate::pipeline::deliver::DeliveryMessage;
use crate::pipeline::input::validate_upload;
use crate::progress::{NoopObserver, PipelineObserver};
use crate::state::{PipelineState, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What the signing UI needs to show a converted document.
#[derive(Debug, Clone, Serialize)]
pub struct Presentation {
    /// Identity to send back with the signature.
    pub artifact_id: ArtifactId,
    /// Where the static file collaborator serves the artifact.
    pub url: String,
    pub kind: ArtifactKind,
    /// Known right after conversion; `None` when re-resolved.
    pub page_count: Option<usize>,
    pub fidelity: Option<Fidelity>,
    pub state: PipelineState,
}

/// A signing request as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningSubmission {
    /// Identity of the converted artifact being signed.
    #[serde(alias = "pdfFile")]
    pub document_identity: String,
    /// `data:image/png;base64,...` (JPEG is also accepted).
    #[serde(alias = "signature")]
    pub signature_payload: String,
}

/// Outcome of the delivery step.
#[derive(Debug)]
pub enum DeliveryStatus {
    Delivered,
    /// No delivery agent is configured.
    Skipped,
    /// The signed document is persisted but the agent failed.
    Failed(DeliveryError),
}

/// Result of a successful signing request.
///
/// Delivery failure still counts as success: the signed document exists and
/// is retrievable, and `delivery` says what went wrong.
#[derive(Debug)]
pub struct SigningOutcome {
    pub signed_id: ArtifactId,
    pub url: String,
    pub kind: ArtifactKind,
    pub state: PipelineState,
    pub delivery: DeliveryStatus,
}

impl SigningOutcome {
    pub fn delivered(&self) -> bool {
        matches!(self.delivery, DeliveryStatus::Delivered)
    }

    /// Serialisable summary for API responses and `--json` output.
    pub fn report(&self) -> SigningReport {
        let (delivery, delivery_error) = match &self.delivery {
            DeliveryStatus::Delivered => ("delivered", None),
            DeliveryStatus::Skipped => ("skipped", None),
            DeliveryStatus::Failed(e) => ("failed", Some(e.to_string())),
        };
        SigningReport {
            success: true,
            signed_id: self.signed_id.clone(),
            url: self.url.clone(),
            state: self.state.clone(),
            delivery: delivery.to_string(),
            delivery_error,
        }
    }
}

/// JSON form of [`SigningOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct SigningReport {
    pub success: bool,
    pub signed_id: ArtifactId,
    pub url: String,
    pub state: PipelineState,
    pub delivery: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
}

/// Everything [`Pipeline::run`] produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub document_id: DocumentId,
    pub presentation: Presentation,
    pub signing: SigningOutcome,
}

/// The document signing pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    store: crate::store::ArtifactStore,
    converter: Arc<dyn FormatConverter>,
    observer: Arc<dyn PipelineObserver>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let store = crate::store::ArtifactStore::new(
            config.storage_dir.clone(),
            config.public_base_url.clone(),
        );
        let converter = resolve_converter(&config);
        let observer = config
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver));
        info!(
            "Pipeline ready: converter={}, store={}",
            converter.name(),
            store.root().display()
        );
        Self {
            config,
            store,
            converter,
            observer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &crate::store::ArtifactStore {
        &self.store
    }

    pub fn converter_name(&self) -> &'static str {
        self.converter.name()
    }

    /// Accept an upload and persist it under a fresh identity.
    ///
    /// Nothing is written when the upload is rejected.
    pub async fn upload(
        &self,
        file_name: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> Result<DocumentId, PipelineError> {
        self.observer.on_stage_start(file_name, Stage::Upload);
        let format = validate_upload(file_name, media_type, &bytes, self.config.max_upload_bytes)
            .map_err(|e| {
                warn!("{}", e);
                e
            })?;
        let source = self.store.put_source(format, bytes).await?;
        info!(
            "Received '{}' as {} ({} bytes)",
            file_name,
            source.id,
            source.bytes.len()
        );
        Ok(source.id)
    }

    /// Convert an uploaded document and present the result for signing.
    pub async fn convert(&self, document: &DocumentId) -> Result<Presentation, PipelineError> {
        let start = Instant::now();
        let mut t = Tracker::new(document.as_str(), PipelineState::Received, self.observer.as_ref());

        // ── Step 1: Re-read the source ───────────────────────────────────
        t.stage(Stage::Convert);
        let bytes = self
            .store
            .get(document.artifact())
            .await
            .map_err(|e| t.fail(e))?;
        let source = SourceDocument {
            id: document.clone(),
            format: document.format(),
            bytes,
        };

        // ── Step 2: Convert ──────────────────────────────────────────────
        let result = self
            .converter
            .convert(&source)
            .await
            .and_then(check_result)
            .map_err(|e| t.fail(e))?;

        // ── Step 3: Persist the converted artifact ───────────────────────
        let artifact_id = result.artifact_id(document);
        self.store
            .put(&artifact_id, result.bytes())
            .await
            .map_err(|e| t.fail(e))?;
        t.advance(PipelineState::Converted);

        if let Fidelity::Reduced(ref note) = result.fidelity() {
            warn!("{} converted with reduced fidelity: {}", document, note);
        }

        // ── Step 4: Present ──────────────────────────────────────────────
        t.stage(Stage::Present);
        t.advance(PipelineState::PresentedForSigning);
        info!(
            "Converted {} -> {} with {} in {}ms",
            document,
            artifact_id,
            self.converter.name(),
            start.elapsed().as_millis()
        );

        Ok(Presentation {
            url: self.store.url_of(&artifact_id),
            kind: result.kind(),
            page_count: result.page_count(),
            fidelity: Some(result.fidelity()),
            artifact_id,
            state: t.state.clone(),
        })
    }

    /// Re-resolve a converted artifact for presentation.
    ///
    /// Only converted artifacts resolve; uploads and signed artifacts are
    /// refused.
    pub async fn present(&self, artifact: &str) -> Result<Presentation, PipelineError> {
        let (id, kind) = self.resolve_signable(artifact)?;
        if !self.store.exists(&id).await {
            return Err(PersistenceError::NotFound { id: id.to_string() }.into());
        }
        Ok(Presentation {
            url: self.store.url_of(&id),
            artifact_id: id,
            kind,
            page_count: None,
            fidelity: None,
            state: PipelineState::PresentedForSigning,
        })
    }

    /// Composite a signature onto a presented document, persist the result
    /// and hand it to the delivery agent.
    pub async fn sign(&self, submission: &SigningSubmission) -> Result<SigningOutcome, PipelineError> {
        let mut t = Tracker::new(
            &submission.document_identity,
            PipelineState::PresentedForSigning,
            self.observer.as_ref(),
        );

        // ── Step 1: Re-resolve the converted artifact ────────────────────
        let (id, kind) = self
            .resolve_signable(&submission.document_identity)
            .map_err(|e| t.fail(e))?;
        let bytes = self.store.get(&id).await.map_err(|e| t.fail(e))?;

        // ── Step 2: Decode and composite ─────────────────────────────────
        t.stage(Stage::Compose);
        let payload = submission.signature_payload.clone();
        let placement = self.config.placement;
        let limits = self.config.signature_limits();
        let source_id = id.clone();
        let signed: SignedDocument = tokio::task::spawn_blocking(move || {
            composite_payload(&source_id, &bytes, &payload, &limits, &placement)
        })
        .await
        .map_err(|e| t.fail(CompositingError::Task(e.to_string())))?
        .map_err(|e| t.fail(e))?;
        t.advance(PipelineState::Composited);

        // ── Step 3: Persist ──────────────────────────────────────────────
        t.stage(Stage::Persist);
        self.store
            .put(&signed.id, &signed.bytes)
            .await
            .map_err(|e| t.fail(e))?;
        t.advance(PipelineState::Persisted);

        // ── Step 4: Deliver ──────────────────────────────────────────────
        let delivery = self.deliver(&signed, &mut t).await;

        Ok(SigningOutcome {
            url: self.store.url_of(&signed.id),
            signed_id: signed.id,
            kind,
            state: t.state.clone(),
            delivery,
        })
    }

    /// Upload, convert and sign in one call.
    pub async fn run(
        &self,
        file_name: &str,
        media_type: &str,
        bytes: Vec<u8>,
        signature_payload: String,
    ) -> Result<RunOutcome, PipelineError> {
        let document_id = self.upload(file_name, media_type, bytes).await?;
        let presentation = self.convert(&document_id).await?;
        let signing = self
            .sign(&SigningSubmission {
                document_identity: presentation.artifact_id.to_string(),
                signature_payload,
            })
            .await?;
        Ok(RunOutcome {
            document_id,
            presentation,
            signing,
        })
    }

    /// Validate an untrusted identity and check it names a converted
    /// artifact: `<document>.pdf` or `<document>.signable.<ext>`.
    fn resolve_signable(&self, raw: &str) -> Result<(ArtifactId, ArtifactKind), PipelineError> {
        let id = ArtifactId::parse(raw)?;
        if id.is_signed() {
            return Err(CompositingError::AlreadySigned { id: id.to_string() }.into());
        }
        let (_, kind) = id
            .converted_from()
            .ok_or_else(|| CompositingError::UnreadableDocument {
                detail: format!("'{id}' is not a converted document"),
            })?;
        Ok((id, kind))
    }

    async fn deliver(&self, signed: &SignedDocument, t: &mut Tracker<'_>) -> DeliveryStatus {
        let Some(agent) = self.config.delivery_agent.as_ref() else {
            debug!("No delivery agent configured; {} not sent", signed.id);
            return DeliveryStatus::Skipped;
        };

        t.stage(Stage::Deliver);
        let message = DeliveryMessage::for_signed(signed, &self.config.delivery);
        match agent.deliver(&message).await {
            Ok(()) => {
                t.advance(PipelineState::Delivered);
                DeliveryStatus::Delivered
            }
            Err(e) => {
                warn!(
                    "Delivery of {} via {} failed: {}",
                    signed.id,
                    agent.name(),
                    e
                );
                self.observer
                    .on_delivery_failed(signed.id.as_str(), &e.to_string());
                DeliveryStatus::Failed(e)
            }
        }
    }
}

/// Per-request state, reported to the observer on every change.
struct Tracker<'a> {
    subject: String,
    state: PipelineState,
    observer: &'a dyn PipelineObserver,
}

impl<'a> Tracker<'a> {
    fn new(subject: &str, state: PipelineState, observer: &'a dyn PipelineObserver) -> Self {
        Self {
            subject: subject.to_string(),
            state,
            observer,
        }
    }

    fn stage(&self, stage: Stage) {
        debug!("{}: {} stage", self.subject, stage);
        self.observer.on_stage_start(&self.subject, stage);
    }

    fn advance(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_advance_to(&next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!("{}: {} -> {}", self.subject, self.state, next);
        self.observer.on_transition(&self.subject, &self.state, &next);
        self.state = next;
    }

    /// Move to `Failed(stage, reason)` and hand the error back.
    ///
    /// The stage comes from the error itself, so the observer and the
    /// caller's [`PipelineError::to_failure`] always agree.
    fn fail(&mut self, err: impl Into<PipelineError>) -> PipelineError {
        let err = err.into();
        let stage = err.stage();
        warn!("{}: {} failed: {}", self.subject, stage, err);
        self.advance(PipelineState::Failed {
            stage,
            reason: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConverterStrategy;
    use crate::pipeline::docx::tests::docx_with;
    use std::sync::Mutex;

    const DOCX_MIME: &str =
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    fn pipeline(dir: &std::path::Path) -> Pipeline {
        Pipeline::new(
            PipelineConfig::builder()
                .storage_dir(dir)
                .strategy(ConverterStrategy::TextReflow)
                .build()
                .unwrap(),
        )
    }

    #[derive(Default)]
    struct LastFailure(Mutex<Option<Stage>>);

    impl PipelineObserver for LastFailure {
        fn on_transition(&self, _subject: &str, _from: &PipelineState, to: &PipelineState) {
            if let PipelineState::Failed { stage, .. } = to {
                *self.0.lock().unwrap() = Some(*stage);
            }
        }
    }

    fn signature() -> String {
        let mut png = Vec::new();
        image::DynamicImage::new_rgba8(4, 2)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        crate::pipeline::encode::encode_payload(&png).unwrap()
    }

    #[tokio::test]
    async fn rejected_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let err = p
            .upload("evil.exe", "application/octet-stream", b"MZ".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Stage::Upload);
        assert!(!dir.path().exists() || std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn convert_presents_reflowed_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let id = p
            .upload("a.docx", DOCX_MIME, docx_with(&["Hello"]))
            .await
            .unwrap();
        let pres = p.convert(&id).await.unwrap();
        assert_eq!(pres.kind, ArtifactKind::Pdf);
        assert_eq!(pres.page_count, Some(1));
        assert_eq!(pres.state, PipelineState::PresentedForSigning);
        assert_eq!(pres.url, format!("/uploads/{}.pdf", id));

        let again = p.present(pres.artifact_id.as_str()).await.unwrap();
        assert_eq!(again.artifact_id, pres.artifact_id);
    }

    #[tokio::test]
    async fn signing_rejects_traversal_and_signed_ids() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        for bad in ["../etc/passwd", "signed_x.docx.pdf", "x.txt"] {
            let err = p
                .sign(&SigningSubmission {
                    document_identity: bad.to_string(),
                    signature_payload: "data:image/png;base64,".to_string(),
                })
                .await
                .unwrap_err();
            assert!(
                matches!(
                    err,
                    PipelineError::Persistence(PersistenceError::InvalidIdentity { .. })
                        | PipelineError::Compositing(_)
                ),
                "{bad}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn upload_identity_is_not_signable() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path());
        let id = p
            .upload("a.docx", DOCX_MIME, docx_with(&["Terms"]))
            .await
            .unwrap();

        let err = p
            .sign(&SigningSubmission {
                document_identity: id.to_string(),
                signature_payload: signature(),
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, PipelineError::Compositing(CompositingError::UnreadableDocument { .. })),
            "{err:?}"
        );
        assert!(!p.store().exists(&id.artifact().signed()).await);
        assert!(p.present(id.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn observed_failure_stage_matches_error() {
        let dir = tempfile::tempdir().unwrap();
        let observer = Arc::new(LastFailure::default());
        let p = Pipeline::new(
            PipelineConfig::builder()
                .storage_dir(dir.path())
                .strategy(ConverterStrategy::TextReflow)
                .observer(observer.clone())
                .build()
                .unwrap(),
        );

        let never_converted = ArtifactId::converted_pdf(&DocumentId::generate(
            crate::document::SourceFormat::Docx,
        ));
        let err = p
            .sign(&SigningSubmission {
                document_identity: never_converted.to_string(),
                signature_payload: signature(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(PersistenceError::NotFound { .. })));
        assert_eq!(err.to_failure().stage, Stage::Persist);
        assert_eq!(*observer.0.lock().unwrap(), Some(Stage::Persist));

        let err = p
            .sign(&SigningSubmission {
                document_identity: "../etc/passwd".to_string(),
                signature_payload: signature(),
            })
            .await
            .unwrap_err();
        assert_eq!(*observer.0.lock().unwrap(), Some(err.stage()));
    }

    #[test]
    fn submission_accepts_legacy_field_names() {
        let s: SigningSubmission =
            serde_json::from_str(r#"{"pdfFile":"a.docx.pdf","signature":"data:image/png;base64,AA=="}"#)
                .unwrap();
        assert_eq!(s.document_identity, "a.docx.pdf");
    }
}
