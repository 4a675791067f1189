//! Error types for the story model.

use thiserror::Error;

use crate::cards::{CardId, FieldKind};

/// A field write that does not match the field's declared kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("card {card}: field `{field}` expects a {expected} value, got {found}")]
pub struct ValidationError {
    pub card: CardId,
    pub field: String,
    pub expected: FieldKind,
    pub found: FieldKind,
}

/// A declared condition that does not follow the condition grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid condition `{input}`: {reason}")]
pub struct ConditionParseError {
    pub input: String,
    pub reason: String,
}

impl ConditionParseError {
    pub(crate) fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while turning declarations into model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    ConditionParse(#[from] ConditionParseError),
}
