//! # docsign
//!
//! Turn uploaded Word documents into signable documents and composite a
//! hand-drawn signature onto them.
//!
//! ## Pipeline Overview
//!
//! ```text
//! DOC / DOCX upload
//!  │
//!  ├─ 1. Upload     allow-list check, persist as <uuid>.<ext>
//!  ├─ 2. Convert    native engine (LibreOffice) │ text reflow │ native round-trip
//!  ├─ 3. Present    converted artifact served from the store
//!  ├─ 4. Composite  signature image on the last page, bottom-right
//!  ├─ 5. Persist    signed_<artifact> written atomically
//!  └─ 6. Deliver    signed document mailed to a fixed recipient
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docsign::{ConverterStrategy, Pipeline, PipelineConfig, SigningSubmission};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .storage_dir("uploads")
//!         .strategy(ConverterStrategy::NativeEngine)
//!         .build()?;
//!     let pipeline = Pipeline::new(config);
//!
//!     let bytes = std::fs::read("contract.docx")?;
//!     let id = pipeline
//!         .upload("contract.docx", docsign::SourceFormat::Docx.media_type(), bytes)
//!         .await?;
//!     let presented = pipeline.convert(&id).await?;
//!     println!("review at {}", presented.url);
//!
//!     let outcome = pipeline
//!         .sign(&SigningSubmission {
//!             document_identity: presented.artifact_id.to_string(),
//!             signature_payload: "data:image/png;base64,...".to_string(),
//!         })
//!         .await?;
//!     println!("signed copy at {}", outcome.url);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docsign` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docsign = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Converter
//!
//! | Strategy | Needs | Output | Fidelity |
//! |----------|-------|--------|----------|
//! | `native-engine` | `soffice` on `PATH` | PDF | full |
//! | `text-reflow` | nothing | PDF | text only |
//! | `native-round-trip` | nothing | DOCX | full, DOCX only |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod converter;
pub mod document;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod state;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ConverterStrategy, DeliveryConfig, EngineCommand, PageLayout, PipelineConfig,
    PipelineConfigBuilder, SignaturePlacement,
};
pub use converter::{resolve_converter, FormatConverter};
pub use document::{
    ArtifactKind, ConversionResult, ConvertedDocument, EditableDocument, Fidelity, Page, PageRef,
    SignatureImage, SignedDocument, SourceDocument, SourceFormat,
};
pub use error::{
    CompositingError, ConversionError, DeliveryError, PersistenceError, PipelineError,
    StageFailure, UploadRejected,
};
pub use identity::{ArtifactId, DocumentId};
pub use orchestrator::{
    DeliveryStatus, Pipeline, Presentation, RunOutcome, SigningOutcome, SigningReport,
    SigningSubmission,
};
pub use pipeline::deliver::{DeliveryAgent, DeliveryMessage, HttpRelayDelivery, OutboxDelivery};
pub use pipeline::encode::SignatureLimits;
pub use progress::{NoopObserver, Observer, PipelineObserver};
pub use state::{PipelineState, Stage};
pub use store::ArtifactStore;
