//! Card definitions for story paths.

mod card;
mod field;
mod media;

pub use card::*;
pub use field::*;
pub use media::*;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a card, unique within one story path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CardId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to one built story path graph.
///
/// Cards keep this as a lookup-only back reference to the graph that owns
/// them. It carries no ownership and is cleared when the graph is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of card kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    /// Opening card of a path: headline, level, time and example media.
    Intro,
    /// Free text rendered as markdown.
    Markdown,
    /// Shooting instructions as a bullet list.
    ClipInstructions,
    /// Captures a video, photo or audio clip.
    Clip,
    /// Offers options; the selected one lands in `choice`.
    Choice,
    /// Free text entered by the user.
    Input,
    /// Headless: never presented, drives actions such as loading a path.
    Logic,
}

const INTRO_FIELDS: &[FieldSpec] = &[
    FieldSpec::content("headline", FieldKind::Text),
    FieldSpec::content("level", FieldKind::Text),
    FieldSpec::content("time", FieldKind::Text),
    FieldSpec::data("example_media_path", FieldKind::Text),
];

const MARKDOWN_FIELDS: &[FieldSpec] = &[FieldSpec::content("text", FieldKind::Text)];

const CLIP_INSTRUCTION_FIELDS: &[FieldSpec] = &[
    FieldSpec::content("header", FieldKind::Text),
    FieldSpec::data("media_path", FieldKind::Text),
    FieldSpec::content("bullet_list", FieldKind::List),
];

const CLIP_FIELDS: &[FieldSpec] = &[
    FieldSpec::content("clip_type", FieldKind::Text).without_references(),
    FieldSpec::data("media", FieldKind::Media),
];

const CHOICE_FIELDS: &[FieldSpec] = &[
    FieldSpec::content("prompt", FieldKind::Text),
    FieldSpec::content("options", FieldKind::List).without_references(),
    FieldSpec::data("choice", FieldKind::Text),
];

const INPUT_FIELDS: &[FieldSpec] = &[
    FieldSpec::content("prompt", FieldKind::Text),
    FieldSpec::data("value", FieldKind::Text),
];

const LOGIC_FIELDS: &[FieldSpec] = &[
    FieldSpec::data("action", FieldKind::Text),
    FieldSpec::data("target", FieldKind::Text),
];

impl CardKind {
    /// Declared fields for this kind.
    pub fn schema(&self) -> &'static [FieldSpec] {
        match self {
            CardKind::Intro => INTRO_FIELDS,
            CardKind::Markdown => MARKDOWN_FIELDS,
            CardKind::ClipInstructions => CLIP_INSTRUCTION_FIELDS,
            CardKind::Clip => CLIP_FIELDS,
            CardKind::Choice => CHOICE_FIELDS,
            CardKind::Input => INPUT_FIELDS,
            CardKind::Logic => LOGIC_FIELDS,
        }
    }

    pub fn field_spec(&self, name: &str) -> Option<&'static FieldSpec> {
        self.schema().iter().find(|spec| spec.name == name)
    }

    /// Headless cards take part in evaluation but are never presented.
    pub fn is_headless(&self) -> bool {
        matches!(self, CardKind::Logic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CardKind::Intro => "intro",
            CardKind::Markdown => "markdown",
            CardKind::ClipInstructions => "clip_instructions",
            CardKind::Clip => "clip",
            CardKind::Choice => "choice",
            CardKind::Input => "input",
            CardKind::Logic => "logic",
        }
    }
}

impl std::fmt::Display for CardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
