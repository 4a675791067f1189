//! Error taxonomy of the engine.

use std::path::PathBuf;

use story_model::{CardId, ConditionParseError, ModelError, ValidationError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A field write was rejected; nothing changed.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Circular visibility conditions; the document was not built.
    #[error("cyclic dependency between cards: {}", join_ids(.cards))]
    CyclicDependency { cards: Vec<CardId> },

    #[error("story path {story_path} declares no dependency `{dependency}`")]
    DependencyNotFound {
        story_path: String,
        dependency: String,
    },

    #[error("failed to load document {}: {reason}", .path.display())]
    DocumentLoad { path: PathBuf, reason: String },

    #[error("story path {story_path} has no card `{card}`")]
    UnknownCard { story_path: String, card: CardId },

    /// A card reference that is neither `card` nor `path::card`.
    #[error("`{reference}` does not name a card")]
    InvalidCardReference { reference: String },

    #[error("story path {story_path} already has a card `{card}`")]
    DuplicateCard { story_path: String, card: CardId },

    #[error(transparent)]
    ConditionParse(#[from] ConditionParseError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ModelError> for EngineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Validation(err) => EngineError::Validation(err),
            ModelError::ConditionParse(err) => EngineError::ConditionParse(err),
        }
    }
}

fn join_ids(cards: &[CardId]) -> String {
    cards
        .iter()
        .map(CardId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
