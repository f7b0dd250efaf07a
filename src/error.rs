//! Error types for the docsign library.
//!
//! Each pipeline stage owns one error enum so a failure always names the
//! stage it came from:
//!
//! * [`UploadRejected`]: the submitted file is not an allowed word-processor
//!   document.
//! * [`ConversionError`]: the format converter could not produce a usable
//!   document (engine failure, empty output, zero pages).
//! * [`CompositingError`]: the signature could not be placed (bad image
//!   payload, missing page, serialisation failure).
//! * [`PersistenceError`]: the artifact store could not read or write.
//! * [`DeliveryError`]: the mail collaborator failed.
//!
//! [`PipelineError`] is what the orchestrator returns. `DeliveryError` is
//! not part of it: a failed delivery is reported inside
//! [`crate::orchestrator::SigningOutcome`] and never invalidates an artifact
//! that was already persisted.

use crate::state::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The upload did not pass the word-processor allow-list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Upload '{file_name}' rejected: {reason}")]
pub struct UploadRejected {
    pub file_name: String,
    pub reason: String,
}

/// The format converter failed. No converted artifact is ever exposed when
/// this is returned.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The chosen strategy cannot handle this source format.
    #[error("Format '{format}' is not supported by the {strategy} converter")]
    UnsupportedFormat { format: String, strategy: String },

    /// The source bytes could not be decoded as the declared format.
    #[error("Source document is structurally invalid: {detail}")]
    InvalidInput { detail: String },

    /// The external rendering engine binary could not be started.
    #[error("Conversion engine '{program}' is unavailable: {detail}\nInstall LibreOffice or set --engine to its path.")]
    EngineUnavailable { program: String, detail: String },

    /// The engine ran but exited with a non-zero status.
    #[error("Conversion engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },

    /// The engine did not finish in time and was killed.
    #[error("Conversion engine timed out after {secs}s")]
    EngineTimeout { secs: u64 },

    /// The engine reported success but wrote nothing.
    #[error("Conversion produced no output")]
    EmptyOutput,

    /// The produced document could not be parsed back.
    #[error("Conversion produced an unreadable document: {detail}")]
    InvalidOutput { detail: String },

    /// The produced document has no pages.
    #[error("Conversion produced a document with zero pages")]
    ZeroPages,

    /// Scratch-space I/O failed while preparing or collecting the conversion.
    #[error("Conversion I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking conversion task panicked or was cancelled.
    #[error("Conversion task failed: {0}")]
    Task(String),
}

/// The signature could not be composited onto the document.
#[derive(Debug, Error)]
pub enum CompositingError {
    /// The signature payload is missing its media-type prefix or does not decode.
    #[error("Invalid signature image: {detail}")]
    InvalidImage { detail: String },

    /// The requested page is not in the document.
    #[error("Target page {page} does not exist (document has {total} pages)")]
    PageNotFound { page: usize, total: usize },

    /// The converted document could not be loaded for compositing.
    #[error("Converted document is unreadable: {detail}")]
    UnreadableDocument { detail: String },

    /// The signed document could not be written out.
    #[error("Failed to serialise signed document: {detail}")]
    Serialization { detail: String },

    /// The identity already refers to a signed artifact.
    #[error("'{id}' is already a signed document")]
    AlreadySigned { id: String },

    /// The blocking compositing task panicked or was cancelled.
    #[error("Compositing task failed: {0}")]
    Task(String),
}

/// The artifact store failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The identity contains characters that could escape the storage root.
    #[error("Invalid artifact identity '{id}'")]
    InvalidIdentity { id: String },

    /// Nothing is stored under this identity.
    #[error("Artifact '{id}' not found")]
    NotFound { id: String },

    /// Reading an artifact failed.
    #[error("Failed to read artifact '{id}': {source}")]
    Read {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing an artifact failed; nothing is visible at the final path.
    #[error("Failed to write artifact '{id}' to '{path}': {source}")]
    Write {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The delivery collaborator failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Credentials were refused (401/403).
    #[error("Delivery authentication failed: {detail}")]
    Auth { detail: String },

    /// The relay could not be reached.
    #[error("Delivery transport error: {detail}")]
    Transport { detail: String },

    /// The relay answered with a non-success status.
    #[error("Delivery rejected with HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },

    /// Writing to the local outbox failed.
    #[error("Delivery I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// All fatal errors returned by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Upload(#[from] UploadRejected),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Compositing(#[from] CompositingError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// The stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Upload(_) => Stage::Upload,
            PipelineError::Conversion(_) => Stage::Convert,
            PipelineError::Compositing(_) => Stage::Compose,
            PipelineError::Persistence(_) => Stage::Persist,
            PipelineError::InvalidConfig(_) => Stage::Setup,
        }
    }

    /// Structured, user-facing form of this error.
    pub fn to_failure(&self) -> StageFailure {
        StageFailure {
            stage: self.stage(),
            reason: self.to_string(),
        }
    }
}

/// A stage failure as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}
