//! Artifact identities.
//!
//! Every name that reaches the filesystem is either generated here
//! ([`DocumentId::generate`]) or derived from a generated one, and every name
//! that arrives from a request goes through [`ArtifactId::parse`] first. The
//! accepted alphabet has no path separators, so an identity can never address
//! anything outside the storage root.
//!
//! Identities are also structural: a [`DocumentId`] is exactly
//! `<uuid>.<doc|docx>`, and only `<DocumentId>.pdf` and
//! `<DocumentId>.signable.<ext>` count as converted artifacts
//! ([`ArtifactId::converted_from`]).

use crate::document::{ArtifactKind, SourceFormat};
use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const SIGNED_PREFIX: &str = "signed_";
const MAX_ID_LEN: usize = 200;
const PDF_SUFFIX: &str = ".pdf";
const EDITABLE_INFIX: &str = ".signable.";

/// Name of any artifact in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Validate an untrusted identity.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, PersistenceError> {
        let raw = raw.as_ref();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && !raw.starts_with('.')
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(PersistenceError::InvalidIdentity { id: raw.to_string() })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity of the page-oriented (PDF) conversion of `doc`.
    pub fn converted_pdf(doc: &DocumentId) -> Self {
        Self(format!("{}{PDF_SUFFIX}", doc.as_str()))
    }

    /// Identity of the native-editable conversion of `doc`.
    pub fn converted_editable(doc: &DocumentId, format: SourceFormat) -> Self {
        Self(format!("{}{EDITABLE_INFIX}{}", doc.as_str(), format.extension()))
    }

    /// The source document and artifact kind, when this names a converted
    /// artifact.
    ///
    /// Uploads, signed artifacts and anything else return `None`. An editable
    /// conversion must keep its source's format.
    pub fn converted_from(&self) -> Option<(DocumentId, ArtifactKind)> {
        if let Some((stem, ext)) = self.0.split_once(EDITABLE_INFIX) {
            let doc = DocumentId::parse(stem).ok()?;
            let format = doc.format();
            return (ext == format.extension()).then_some((doc, ArtifactKind::Editable(format)));
        }
        let stem = self.0.strip_suffix(PDF_SUFFIX)?;
        DocumentId::parse(stem)
            .ok()
            .map(|doc| (doc, ArtifactKind::Pdf))
    }

    /// Identity of the signed artifact derived from this converted one.
    ///
    /// Deterministic: signing the same converted artifact twice yields the
    /// same identity and the later write replaces the earlier one.
    pub fn signed(&self) -> Self {
        Self(format!("{SIGNED_PREFIX}{}", self.0))
    }

    pub fn is_signed(&self) -> bool {
        self.0.starts_with(SIGNED_PREFIX)
    }

    /// Lower-cased text after the last `.`, if any.
    pub fn extension(&self) -> Option<String> {
        self.0
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = PersistenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// Identity of an uploaded source document: a fresh UUID v4 plus the
/// extension of its format. Never derived from user input or content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(ArtifactId);

impl DocumentId {
    pub fn generate(format: SourceFormat) -> Self {
        Self(ArtifactId(format!(
            "{}.{}",
            Uuid::new_v4().hyphenated(),
            format.extension()
        )))
    }

    /// Re-validate a document identity carried across a request boundary.
    ///
    /// Only the exact shape [`generate`](Self::generate) produces is
    /// accepted; derived names such as `<id>.pdf` are rejected.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, PersistenceError> {
        let id = ArtifactId::parse(raw)?;
        let well_formed = id.0.split_once('.').is_some_and(|(stem, ext)| {
            Uuid::try_parse(stem).is_ok_and(|u| u.hyphenated().to_string() == stem)
                && SourceFormat::ALL.iter().any(|f| f.extension() == ext)
        });
        if well_formed {
            Ok(Self(id))
        } else {
            Err(PersistenceError::InvalidIdentity { id: id.0 })
        }
    }

    pub fn format(&self) -> SourceFormat {
        match self.0.extension().as_deref() {
            Some("doc") => SourceFormat::Doc,
            _ => SourceFormat::Docx,
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn artifact(&self) -> &ArtifactId {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for DocumentId {
    type Error = PersistenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        String::from(id.0)
    }
}
