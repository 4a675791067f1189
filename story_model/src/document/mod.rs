//! Parsed story path documents.
//!
//! The engine never sees the on-disk format beyond this structure: a story
//! path id, its declared dependencies on other story paths, and its cards
//! with raw field data and condition declarations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cards::{CardKind, FieldValue};

/// A dependency on another story path document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Id used as the `path` segment of references into that document.
    pub dependency_id: String,
    /// File location relative to the declaring document.
    pub dependency_file: String,
}

impl DependencySpec {
    /// The dependency file, relative to the directory of `location`.
    pub fn path_from(&self, location: Option<&Path>) -> PathBuf {
        match location.and_then(Path::parent) {
            Some(dir) => dir.join(&self.dependency_file),
            None => PathBuf::from(&self.dependency_file),
        }
    }
}

/// A declared condition as written in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    Expression(String),
    All { all: Vec<String> },
    Any { any: Vec<String> },
}

impl From<&str> for ConditionSpec {
    fn from(expression: &str) -> Self {
        ConditionSpec::Expression(expression.to_string())
    }
}

/// A card as declared in a document, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSpec {
    #[serde(rename = "type")]
    pub kind: CardKind,
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub references: Vec<ConditionSpec>,
}

impl CardSpec {
    pub fn new(kind: CardKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            title: String::new(),
            fields: BTreeMap::new(),
            references: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_reference(mut self, condition: impl Into<ConditionSpec>) -> Self {
        self.references.push(condition.into());
        self
    }
}

/// One story path document, already deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub cards: Vec<CardSpec>,
    /// Where the document was loaded from; dependency files resolve against it.
    #[serde(skip)]
    pub location: Option<PathBuf>,
}

impl ParsedDocument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            dependencies: Vec::new(),
            cards: Vec::new(),
            location: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_card(mut self, card: CardSpec) -> Self {
        self.cards.push(card);
        self
    }

    pub fn with_dependency(
        mut self,
        dependency_id: impl Into<String>,
        dependency_file: impl Into<String>,
    ) -> Self {
        self.dependencies.push(DependencySpec {
            dependency_id: dependency_id.into(),
            dependency_file: dependency_file.into(),
        });
        self
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn dependency(&self, dependency_id: &str) -> Option<&DependencySpec> {
        self.dependencies
            .iter()
            .find(|d| d.dependency_id == dependency_id)
    }

    /// Path of a dependency file, relative to this document's location.
    pub fn dependency_path(&self, dependency: &DependencySpec) -> PathBuf {
        dependency.path_from(self.location.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "id": "learning_guide",
        "title": "Learning Guide",
        "dependencies": [
            {"dependency_id": "event_path", "dependency_file": "event_path.json"}
        ],
        "cards": [
            {"type": "intro", "id": "intro", "title": "Welcome",
             "fields": {"headline": "Make a video", "level": "beginner"}},
            {"type": "choice", "id": "format",
             "fields": {"prompt": "Pick one", "options": ["video", "audio"]}},
            {"type": "markdown", "id": "video_tips",
             "fields": {"text": "You picked format::choice"},
             "references": ["format::choice == \"video\"", {"any": ["intro::level", "intro::time"]}]}
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let doc = ParsedDocument::from_json(DOCUMENT).unwrap();
        assert_eq!(doc.id, "learning_guide");
        assert_eq!(doc.cards.len(), 3);
        assert_eq!(doc.cards[1].kind, CardKind::Choice);
        assert_eq!(
            doc.cards[1].fields.get("options"),
            Some(&FieldValue::List(vec!["video".into(), "audio".into()]))
        );
        assert_eq!(doc.cards[2].references.len(), 2);
        assert!(matches!(doc.cards[2].references[1], ConditionSpec::Any { .. }));
        assert!(doc.location.is_none());
    }

    #[test]
    fn test_dependency_path_is_relative_to_location() {
        let doc = ParsedDocument::from_json(DOCUMENT)
            .unwrap()
            .with_location("/stories/default/learning_guide.json");
        let dependency = doc.dependency("event_path").unwrap();
        assert_eq!(
            doc.dependency_path(dependency),
            PathBuf::from("/stories/default/event_path.json")
        );
        assert!(doc.dependency("missing").is_none());
    }

    #[test]
    fn test_dependency_without_location() {
        let dependency = DependencySpec {
            dependency_id: "event_path".into(),
            dependency_file: "paths/event_path.json".into(),
        };
        assert_eq!(dependency.path_from(None), PathBuf::from("paths/event_path.json"));
        assert_eq!(
            dependency.path_from(Some(Path::new("guide.json"))),
            PathBuf::from("paths/event_path.json")
        );
    }

    #[test]
    fn test_builder() {
        let doc = ParsedDocument::new("p")
            .with_title("Path")
            .with_dependency("q", "q.json")
            .with_card(
                CardSpec::new(CardKind::Markdown, "m")
                    .with_field("text", "hi")
                    .with_reference("a::b"),
            );
        assert_eq!(doc.dependencies.len(), 1);
        assert_eq!(doc.cards[0].references, vec![ConditionSpec::from("a::b")]);
    }
}
