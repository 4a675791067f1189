//! Field values and field schemas.

use serde::{Deserialize, Serialize};

use super::MediaReference;

/// The declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    List,
    Media,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FieldKind::Text => "text",
            FieldKind::List => "list",
            FieldKind::Media => "media",
        };
        f.write_str(name)
    }
}

/// One entry of a card kind's field schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Placeholders in this field are resolved on read.
    pub references: bool,
    /// Copied by `Card::copy_fields_from`; user data is not.
    pub content: bool,
}

impl FieldSpec {
    /// Authored content that may embed placeholders.
    pub const fn content(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            references: !matches!(kind, FieldKind::Media),
            content: true,
        }
    }

    /// User or runtime data, read verbatim.
    pub const fn data(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            references: false,
            content: false,
        }
    }

    pub const fn without_references(mut self) -> Self {
        self.references = false;
        self
    }
}

/// A field value: text, a list of strings, or a media reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Media(MediaReference),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::List(_) => FieldKind::List,
            FieldValue::Media(_) => FieldKind::Media,
        }
    }

    /// Blank text, a list of blank entries, or media without a path.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|item| item.trim().is_empty()),
            FieldValue::Media(media) => media.path.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Display form used when the value is embedded in other text.
    pub fn render(&self, list_separator: &str) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::List(items) => items.join(list_separator),
            FieldValue::Media(media) => media.path.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items)
    }
}

impl From<MediaReference> for FieldValue {
    fn from(media: MediaReference) -> Self {
        FieldValue::Media(media)
    }
}
