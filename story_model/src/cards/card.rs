//! The card - the atomic unit of a story path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CardId, CardKind, FieldKind, FieldValue, GraphId};
use crate::conditions::{DependencyCondition, EvaluationError, FieldLookup, Satisfaction, Visibility};
use crate::document::CardSpec;
use crate::error::{ModelError, ValidationError};

/// Result of evaluating a card's conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub visibility: Visibility,
    /// Set when a condition could not be evaluated; the card is then pending.
    pub error: Option<EvaluationError>,
}

/// A card with typed fields and declared visibility conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    id: CardId,
    kind: CardKind,
    title: String,
    fields: BTreeMap<String, FieldValue>,
    conditions: Vec<DependencyCondition>,

    #[serde(skip)]
    visibility: Visibility,
    #[serde(skip)]
    dirty: bool,
    #[serde(skip)]
    owner: Option<GraphId>,
}

impl Card {
    /// Create an empty card of the given kind.
    pub fn new(id: impl Into<CardId>, kind: CardKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            fields: BTreeMap::new(),
            conditions: Vec::new(),
            visibility: Visibility::Pending,
            dirty: false,
            owner: None,
        }
    }

    /// Build a card from its declaration, validating every field and condition.
    pub fn from_spec(spec: &CardSpec) -> Result<Self, ModelError> {
        let mut card = Card::new(spec.id.clone(), spec.kind).with_title(spec.title.clone());
        for (name, value) in &spec.fields {
            card.validate(name, value)?;
            card.fields.insert(name.clone(), value.clone());
        }
        for declared in &spec.references {
            card.conditions.push(DependencyCondition::from_spec(declared)?);
        }
        Ok(card)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_condition(mut self, condition: DependencyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn id(&self) -> &CardId {
        &self.id
    }

    pub fn kind(&self) -> CardKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn conditions(&self) -> &[DependencyCondition] {
        &self.conditions
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Visible and not headless.
    pub fn is_presented(&self) -> bool {
        self.visibility == Visibility::Visible && !self.kind.is_headless()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The graph this card belongs to, while that graph is alive.
    pub fn owner(&self) -> Option<GraphId> {
        self.owner
    }

    /// Stored value, without placeholder resolution.
    pub fn raw_field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Whether placeholders in this field resolve on read.
    pub fn is_reference_bearing(&self, name: &str) -> bool {
        self.kind.field_spec(name).is_some_and(|spec| spec.references)
    }

    /// Check a value against the field's declared kind.
    ///
    /// Fields outside the kind's schema accept any value.
    pub fn validate(&self, name: &str, value: &FieldValue) -> Result<(), ValidationError> {
        match self.kind.field_spec(name) {
            Some(spec) if spec.kind != value.kind() => Err(ValidationError {
                card: self.id.clone(),
                field: name.to_string(),
                expected: spec.kind,
                found: value.kind(),
            }),
            _ => Ok(()),
        }
    }

    /// Expected kind of a field, if the schema declares it.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.kind.field_spec(name).map(|spec| spec.kind)
    }

    /// Write a field and mark the card dirty.
    ///
    /// Returns whether the stored value changed. A rejected write leaves the
    /// card untouched.
    pub fn set_field(
        &mut self,
        name: impl Into<String>,
        value: FieldValue,
    ) -> Result<bool, ValidationError> {
        let name = name.into();
        self.validate(&name, &value)?;
        self.dirty = true;
        let previous = self.fields.insert(name, value.clone());
        Ok(previous.as_ref() != Some(&value))
    }

    pub fn remove_field(&mut self, name: &str) -> Option<FieldValue> {
        let removed = self.fields.remove(name);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Evaluate every condition against current field values.
    ///
    /// Pure: the card is not modified, so calling this repeatedly with no
    /// intervening writes returns the same result.
    pub fn evaluate_visibility(&self, lookup: &dyn FieldLookup) -> Evaluation {
        let mut pending = false;
        let mut hidden = false;
        for condition in &self.conditions {
            match condition.evaluate(lookup) {
                Ok(Satisfaction::Satisfied) => {}
                Ok(Satisfaction::Unsatisfied) => hidden = true,
                Ok(Satisfaction::Pending) => pending = true,
                Err(error) => {
                    return Evaluation {
                        visibility: Visibility::Pending,
                        error: Some(error),
                    }
                }
            }
        }
        let visibility = if pending {
            Visibility::Pending
        } else if hidden {
            Visibility::Hidden
        } else {
            Visibility::Visible
        };
        Evaluation {
            visibility,
            error: None,
        }
    }

    /// Copy title and content fields from a newer version of the same card.
    ///
    /// Identity, conditions, user data and graph linkage are kept. Returns
    /// whether anything changed; a card with another id or kind is refused.
    pub fn copy_fields_from(&mut self, other: &Card) -> bool {
        if self.id != other.id {
            tracing::error!(
                "can't copy fields from card {} to card {} (card ids must match)",
                other.id,
                self.id
            );
            return false;
        }
        if self.kind != other.kind {
            tracing::error!(
                "card {} is a {} card, can't copy fields from a {} card",
                self.id,
                self.kind,
                other.kind
            );
            return false;
        }

        let mut changed = self.title != other.title;
        self.title = other.title.clone();

        for spec in self.kind.schema().iter().filter(|spec| spec.content) {
            let incoming = other.fields.get(spec.name);
            if self.fields.get(spec.name) == incoming {
                continue;
            }
            changed = true;
            match incoming {
                Some(value) => {
                    self.fields.insert(spec.name.to_string(), value.clone());
                }
                None => {
                    self.fields.remove(spec.name);
                }
            }
        }
        changed
    }

    /// Engine-managed: store the outcome of an evaluation.
    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.visibility = visibility;
    }

    /// Engine-managed: link the card to its owning graph.
    pub fn attach(&mut self, owner: GraphId) {
        self.owner = Some(owner);
    }

    /// Engine-managed: drop the owner handle on teardown.
    pub fn detach(&mut self) {
        self.owner = None;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{MediaReference, Medium};
    use crate::conditions::{CardLookup, FieldRef, Predicate};

    struct NoCards;

    impl FieldLookup for NoCards {
        fn lookup(&self, _target: &FieldRef) -> CardLookup<'_> {
            CardLookup::Absent
        }
    }

    struct OneCard(Card);

    impl FieldLookup for OneCard {
        fn lookup(&self, target: &FieldRef) -> CardLookup<'_> {
            if &target.card == self.0.id() {
                CardLookup::Present {
                    visibility: Visibility::Visible,
                    value: self.0.raw_field(&target.field),
                }
            } else {
                CardLookup::Absent
            }
        }
    }

    fn intro() -> Card {
        Card::from_spec(
            &CardSpec::new(CardKind::Intro, "intro")
                .with_title("Welcome")
                .with_field("headline", "Make a film")
                .with_field("example_media_path", "example.jpg"),
        )
        .unwrap()
    }

    #[test]
    fn test_new_card_is_pending_and_clean() {
        let card = Card::new("a", CardKind::Markdown);
        assert_eq!(card.visibility(), Visibility::Pending);
        assert!(!card.is_dirty());
        assert!(card.owner().is_none());
    }

    #[test]
    fn test_from_spec_rejects_wrong_kind() {
        let spec = CardSpec::new(CardKind::ClipInstructions, "c").with_field("bullet_list", "oops");
        let err = Card::from_spec(&spec).unwrap_err();
        match err {
            ModelError::Validation(v) => {
                assert_eq!(v.field, "bullet_list");
                assert_eq!(v.expected, FieldKind::List);
                assert_eq!(v.found, FieldKind::Text);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_set_field_marks_dirty() {
        let mut card = Card::new("input", CardKind::Input);
        assert!(card.set_field("value", FieldValue::from("hello")).unwrap());
        assert!(card.is_dirty());
        assert!(!card.set_field("value", FieldValue::from("hello")).unwrap());
    }

    #[test]
    fn test_set_field_validation_leaves_card_untouched() {
        let mut card = Card::new("clip", CardKind::Clip);
        let err = card.set_field("media", FieldValue::from("not media")).unwrap_err();
        assert_eq!(err.expected, FieldKind::Media);
        assert!(card.raw_field("media").is_none());
        assert!(!card.is_dirty());

        let media = MediaReference::new("/clips/1.mp4", Medium::Video);
        assert!(card.set_field("media", FieldValue::from(media)).unwrap());
    }

    #[test]
    fn test_unknown_fields_accept_any_value() {
        let mut card = Card::new("m", CardKind::Markdown);
        assert!(card
            .set_field("notes", FieldValue::List(vec!["a".into()]))
            .is_ok());
    }

    #[test]
    fn test_no_conditions_means_visible() {
        let card = Card::new("a", CardKind::Markdown);
        let evaluation = card.evaluate_visibility(&NoCards);
        assert_eq!(evaluation.visibility, Visibility::Visible);
        assert!(evaluation.error.is_none());
    }

    #[test]
    fn test_evaluate_visibility_is_idempotent() {
        let mut source = Card::new("a", CardKind::Input);
        source.set_field("value", FieldValue::from("yes")).unwrap();
        let lookup = OneCard(source);

        let card = Card::new("b", CardKind::Markdown).with_condition(DependencyCondition::single(
            Predicate::equals(FieldRef::local("a", "value"), "yes"),
        ));
        let first = card.evaluate_visibility(&lookup);
        let second = card.evaluate_visibility(&lookup);
        assert_eq!(first, second);
        assert_eq!(first.visibility, Visibility::Visible);
    }

    #[test]
    fn test_pending_wins_over_hidden() {
        let mut source = Card::new("a", CardKind::Input);
        source.set_field("value", FieldValue::from("no")).unwrap();
        let lookup = OneCard(source);

        let card = Card::new("b", CardKind::Markdown)
            .with_condition(DependencyCondition::single(Predicate::equals(
                FieldRef::local("a", "value"),
                "yes",
            )))
            .with_condition(DependencyCondition::single(Predicate::non_empty(
                FieldRef::local("elsewhere", "value"),
            )));
        assert_eq!(card.evaluate_visibility(&lookup).visibility, Visibility::Pending);
    }

    #[test]
    fn test_copy_fields_from_copies_content_only() {
        let mut card = intro();
        let fresh = Card::from_spec(
            &CardSpec::new(CardKind::Intro, "intro")
                .with_title("Welcome back")
                .with_field("headline", "Make a better film")
                .with_field("level", "advanced")
                .with_field("example_media_path", "other.jpg"),
        )
        .unwrap();

        assert!(card.copy_fields_from(&fresh));
        assert_eq!(card.title(), "Welcome back");
        assert_eq!(card.raw_field("headline"), Some(&FieldValue::from("Make a better film")));
        assert_eq!(card.raw_field("level"), Some(&FieldValue::from("advanced")));
        assert_eq!(
            card.raw_field("example_media_path"),
            Some(&FieldValue::from("example.jpg"))
        );
    }

    #[test]
    fn test_copy_fields_from_mismatched_id_is_noop() {
        let mut card = intro();
        let owner = GraphId::new();
        card.attach(owner);
        let other = Card::from_spec(
            &CardSpec::new(CardKind::Intro, "someone_else").with_field("headline", "Changed"),
        )
        .unwrap();

        assert!(!card.copy_fields_from(&other));
        assert_eq!(card.title(), "Welcome");
        assert_eq!(card.raw_field("headline"), Some(&FieldValue::from("Make a film")));
        assert_eq!(card.owner(), Some(owner));
    }

    #[test]
    fn test_copy_fields_from_other_kind_is_noop() {
        let mut card = Card::new("x", CardKind::Markdown);
        let other = Card::new("x", CardKind::Input).with_title("Other");
        assert!(!card.copy_fields_from(&other));
        assert_eq!(card.title(), "");
    }
}
