//! Where story path documents come from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use story_model::ParsedDocument;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentSourceError {
    #[error("no document at {}", .0.display())]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fetches and parses story path documents.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load_document(&self, path: &Path) -> Result<ParsedDocument, DocumentSourceError>;
}

/// Documents held in memory, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocumentSource {
    documents: HashMap<PathBuf, ParsedDocument>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, document: ParsedDocument) -> Self {
        self.insert(path, document);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, document: ParsedDocument) {
        self.documents.insert(path.into(), document);
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn load_document(&self, path: &Path) -> Result<ParsedDocument, DocumentSourceError> {
        self.documents
            .get(path)
            .cloned()
            .ok_or_else(|| DocumentSourceError::NotFound(path.to_path_buf()))
    }
}

/// JSON documents on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsDocumentSource;

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn load_document(&self, path: &Path) -> Result<ParsedDocument, DocumentSourceError> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocumentSourceError::NotFound(path.to_path_buf()))
            }
            Err(err) => return Err(err.into()),
        };
        let document = ParsedDocument::from_json(&contents)?;
        tracing::debug!("read story path {} from {}", document.id, path.display());
        Ok(document.with_location(path))
    }
}
