//! Flat identity-to-bytes artifact store on the local filesystem.
//!
//! Every artifact lives directly under the storage root at
//! `<root>/<identity>`. Writes go to a hidden, uniquely named temp file in the
//! same directory and are renamed into place, so a reader either sees the
//! complete previous artifact or the complete new one, never a truncated file.
//! Two concurrent writers to one identity both succeed; the last rename wins.

use crate::document::{SourceDocument, SourceFormat};
use crate::error::PersistenceError;
use crate::identity::{ArtifactId, DocumentId};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Filesystem-backed artifact store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    base_url: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    /// Create the storage root if it does not exist.
    pub async fn ensure_root(&self) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PersistenceError::Write {
                id: String::new(),
                path: self.root.clone(),
                source: e,
            })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the static file collaborator serves `id` from.
    pub fn path_of(&self, id: &ArtifactId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Public URL of `id`.
    pub fn url_of(&self, id: &ArtifactId) -> String {
        format!("{}/{}", self.base_url, id)
    }

    /// Persist a freshly uploaded document under a new [`DocumentId`].
    pub async fn put_source(
        &self,
        format: SourceFormat,
        bytes: Vec<u8>,
    ) -> Result<SourceDocument, PersistenceError> {
        let id = DocumentId::generate(format);
        self.put(id.artifact(), &bytes).await?;
        Ok(SourceDocument { id, format, bytes })
    }

    /// Write `bytes` under `id`, replacing any previous artifact atomically.
    pub async fn put(&self, id: &ArtifactId, bytes: &[u8]) -> Result<(), PersistenceError> {
        let path = self.path_of(id);
        let write_err = |source| PersistenceError::Write {
            id: id.to_string(),
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_err)?;

        let tmp_path = self.root.join(format!(".{}.{}.tmp", id, Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(write_err(e));
        }

        debug!("Stored {} ({} bytes)", id, bytes.len());
        Ok(())
    }

    /// Read the artifact stored under `id`.
    pub async fn get(&self, id: &ArtifactId) -> Result<Vec<u8>, PersistenceError> {
        match tokio::fs::read(self.path_of(id)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PersistenceError::NotFound { id: id.to_string() })
            }
            Err(e) => Err(PersistenceError::Read {
                id: id.to_string(),
                source: e,
            }),
        }
    }

    pub async fn exists(&self, id: &ArtifactId) -> bool {
        tokio::fs::metadata(self.path_of(id))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}
