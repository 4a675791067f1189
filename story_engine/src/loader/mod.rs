//! Cross-document loading.
//!
//! A dependency is looked up by its declared id in the requesting story
//! path, its file is resolved relative to that story path's location, then
//! fetched through a [`DocumentSource`] and built into a [`StoryPath`].
//! Fetching is the only suspending step; building and linking are
//! synchronous, so a dropped load never leaves a half-linked graph.

mod source;

pub use source::*;

use std::path::PathBuf;

use story_model::ParsedDocument;

use crate::error::{EngineError, Result};
use crate::story_path::{LinkedDocuments, StoryPath};

/// A resolved request to load one declared dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequest {
    /// Story path that declared the dependency.
    pub from: String,
    pub dependency_id: String,
    pub path: PathBuf,
}

impl DependencyRequest {
    pub fn new(from: &StoryPath, dependency_id: &str) -> Result<Self> {
        let dependency = from.dependency(dependency_id).ok_or_else(|| {
            EngineError::DependencyNotFound {
                story_path: from.id().to_string(),
                dependency: dependency_id.to_string(),
            }
        })?;
        Ok(Self {
            from: from.id().to_string(),
            dependency_id: dependency_id.to_string(),
            path: from.dependency_path(dependency),
        })
    }
}

/// Fetch the document a request names.
pub async fn fetch(source: &dyn DocumentSource, request: &DependencyRequest) -> Result<ParsedDocument> {
    tracing::debug!(
        "loading dependency {} of {} from {}",
        request.dependency_id,
        request.from,
        request.path.display()
    );
    let document = source
        .load_document(&request.path)
        .await
        .map_err(|err| EngineError::DocumentLoad {
            path: request.path.clone(),
            reason: err.to_string(),
        })?;
    if document.id != request.dependency_id {
        tracing::warn!(
            "dependency {} of {} loaded a story path with id {}",
            request.dependency_id,
            request.from,
            document.id
        );
    }
    Ok(document.with_location(request.path.clone()))
}

/// Load and build a dependency of `from`.
///
/// The new graph is evaluated against `linked`; linking it back into the
/// requesting graph is up to the caller.
pub async fn load_dependency(
    from: &StoryPath,
    dependency_id: &str,
    source: &dyn DocumentSource,
    linked: &dyn LinkedDocuments,
) -> Result<StoryPath> {
    let request = DependencyRequest::new(from, dependency_id)?;
    let document = fetch(source, &request).await?;
    StoryPath::build(document, linked)
}
