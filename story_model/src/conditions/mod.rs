//! Dependency conditions - predicates over other cards' field values.
//!
//! A card declares an ordered list of [`DependencyCondition`]s, all of which
//! must hold for the card to be visible. Each condition combines one or more
//! [`Predicate`]s with a [`Combine`] rule. Evaluation runs against raw field
//! values through the [`FieldLookup`] seam, never against resolved display
//! text.

mod parse;

pub use parse::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cards::{CardId, FieldValue};
use crate::document::ConditionSpec;
use crate::error::ConditionParseError;

/// Derived visibility of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
    /// A referenced card has not been created or loaded yet.
    #[default]
    Pending,
}

/// Three-valued outcome of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Satisfaction {
    Satisfied,
    Unsatisfied,
    Pending,
}

impl From<bool> for Satisfaction {
    fn from(holds: bool) -> Self {
        if holds {
            Satisfaction::Satisfied
        } else {
            Satisfaction::Unsatisfied
        }
    }
}

/// Address of a field: `[story_path::]card::field`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    /// `None` means the document doing the lookup.
    pub story_path: Option<String>,
    pub card: CardId,
    pub field: String,
}

impl FieldRef {
    pub fn local(card: impl Into<CardId>, field: impl Into<String>) -> Self {
        Self {
            story_path: None,
            card: card.into(),
            field: field.into(),
        }
    }

    pub fn in_path(
        story_path: impl Into<String>,
        card: impl Into<CardId>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            story_path: Some(story_path.into()),
            card: card.into(),
            field: field.into(),
        }
    }

    /// Parse `card::field` or `path::card::field`.
    pub fn parse(input: &str) -> Result<Self, ConditionParseError> {
        let segments: Vec<&str> = input.split("::").collect();
        if let Some(bad) = segments.iter().find(|s| !is_segment(s)) {
            return Err(ConditionParseError::new(
                input,
                format!("`{bad}` is not a valid reference segment"),
            ));
        }
        Self::from_segments(&segments).ok_or_else(|| {
            ConditionParseError::new(input, "a reference needs two or three segments")
        })
    }

    pub fn from_segments(segments: &[&str]) -> Option<Self> {
        match segments {
            [card, field] => Some(Self::local(*card, *field)),
            [path, card, field] => Some(Self::in_path(*path, *card, *field)),
            _ => None,
        }
    }

    /// The story path this reference points into, seen from `own_path`.
    pub fn story_path_or<'a>(&'a self, own_path: &'a str) -> &'a str {
        self.story_path.as_deref().unwrap_or(own_path)
    }

    /// Drop the path segment when it names `own_path`.
    pub fn normalized(&self, own_path: &str) -> Self {
        match &self.story_path {
            Some(path) if path == own_path => Self::local(self.card.clone(), self.field.clone()),
            _ => self.clone(),
        }
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.story_path {
            Some(path) => write!(f, "{}::{}::{}", path, self.card, self.field),
            None => write!(f, "{}::{}", self.card, self.field),
        }
    }
}

/// Comparison applied to a referenced field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    NonEmpty,
    Empty,
    Contains,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::NonEmpty => "is set",
            Operator::Empty => "is empty",
            Operator::Contains => "contains",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::GreaterOrEqual
                | Operator::LessThan
                | Operator::LessOrEqual
        )
    }

    pub fn takes_operand(&self) -> bool {
        !matches!(self, Operator::NonEmpty | Operator::Empty)
    }
}

/// A field value could not be compared.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot evaluate {target}: {reason}")]
pub struct EvaluationError {
    pub target: FieldRef,
    pub reason: String,
}

/// What a [`FieldLookup`] knows about a referenced card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CardLookup<'a> {
    /// The card's document is not loaded, or the card does not exist.
    Absent,
    Present {
        visibility: Visibility,
        value: Option<&'a FieldValue>,
    },
}

/// Raw field access for condition evaluation.
pub trait FieldLookup {
    fn lookup(&self, target: &FieldRef) -> CardLookup<'_>;
}

/// One comparison against one referenced field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub target: FieldRef,
    pub operator: Operator,
    pub operand: Option<String>,
}

impl Predicate {
    pub fn new(target: FieldRef, operator: Operator, operand: Option<String>) -> Self {
        Self {
            target,
            operator,
            operand,
        }
    }

    pub fn equals(target: FieldRef, operand: impl Into<String>) -> Self {
        Self::new(target, Operator::Equals, Some(operand.into()))
    }

    pub fn non_empty(target: FieldRef) -> Self {
        Self::new(target, Operator::NonEmpty, None)
    }

    pub fn evaluate(&self, lookup: &dyn FieldLookup) -> Result<Satisfaction, EvaluationError> {
        let value = match lookup.lookup(&self.target) {
            CardLookup::Absent => return Ok(Satisfaction::Pending),
            CardLookup::Present {
                visibility: Visibility::Pending,
                ..
            } => return Ok(Satisfaction::Pending),
            // A card on a branch not taken satisfies nothing.
            CardLookup::Present {
                visibility: Visibility::Hidden,
                ..
            } => return Ok(Satisfaction::Unsatisfied),
            CardLookup::Present { value, .. } => value,
        };
        let operand = self.operand.as_deref().unwrap_or_default();

        let holds = match self.operator {
            Operator::NonEmpty => value.is_some_and(|v| !v.is_empty()),
            Operator::Empty => value.map_or(true, FieldValue::is_empty),
            Operator::Equals => value.is_some_and(|v| value_equals(v, operand)),
            Operator::NotEquals => !value.is_some_and(|v| value_equals(v, operand)),
            Operator::Contains => value.is_some_and(|v| value_contains(v, operand)),
            op => self.compare_numeric(op, value, operand)?,
        };
        Ok(Satisfaction::from(holds))
    }

    fn compare_numeric(
        &self,
        op: Operator,
        value: Option<&FieldValue>,
        operand: &str,
    ) -> Result<bool, EvaluationError> {
        let text = match value {
            None => return Ok(false),
            Some(v) if v.is_empty() => return Ok(false),
            Some(FieldValue::Text(text)) => text.trim(),
            Some(FieldValue::List(items)) if items.len() == 1 => items[0].trim(),
            Some(other) => {
                return Err(self.error(format!("a {} value is not a number", other.kind())))
            }
        };
        let lhs: f64 = text
            .parse()
            .map_err(|_| self.error(format!("`{text}` is not a number")))?;
        let rhs: f64 = operand
            .trim()
            .parse()
            .map_err(|_| self.error(format!("operand `{operand}` is not a number")))?;

        Ok(match op {
            Operator::GreaterThan => lhs > rhs,
            Operator::GreaterOrEqual => lhs >= rhs,
            Operator::LessThan => lhs < rhs,
            _ => lhs <= rhs,
        })
    }

    fn error(&self, reason: String) -> EvaluationError {
        EvaluationError {
            target: self.target.clone(),
            reason,
        }
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.operand {
            Some(operand) => write!(f, "{} {} {:?}", self.target, self.operator.symbol(), operand),
            None => write!(f, "{} {}", self.target, self.operator.symbol()),
        }
    }
}

fn value_equals(value: &FieldValue, operand: &str) -> bool {
    match value {
        FieldValue::Text(text) => text == operand,
        FieldValue::List(items) => items.len() == 1 && items[0] == operand,
        FieldValue::Media(media) => media.path == operand,
    }
}

fn value_contains(value: &FieldValue, operand: &str) -> bool {
    match value {
        FieldValue::Text(text) => text.contains(operand),
        FieldValue::List(items) => items.iter().any(|item| item == operand),
        FieldValue::Media(media) => media.path.contains(operand),
    }
}

/// How the predicates of one condition combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combine {
    #[default]
    All,
    Any,
}

impl Combine {
    pub fn fold(self, results: impl IntoIterator<Item = Satisfaction>) -> Satisfaction {
        let mut pending = false;
        let mut unsatisfied = false;
        let mut satisfied = false;
        for result in results {
            match result {
                Satisfaction::Satisfied => satisfied = true,
                Satisfaction::Unsatisfied => unsatisfied = true,
                Satisfaction::Pending => pending = true,
            }
        }
        match self {
            Combine::All if pending => Satisfaction::Pending,
            Combine::All => Satisfaction::from(!unsatisfied),
            Combine::Any if satisfied => Satisfaction::Satisfied,
            Combine::Any if pending => Satisfaction::Pending,
            Combine::Any => Satisfaction::Unsatisfied,
        }
    }
}

/// A declared visibility condition of a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCondition {
    pub predicates: Vec<Predicate>,
    pub combine: Combine,
}

impl DependencyCondition {
    pub fn new(predicates: Vec<Predicate>, combine: Combine) -> Self {
        Self {
            predicates,
            combine,
        }
    }

    pub fn single(predicate: Predicate) -> Self {
        Self::new(vec![predicate], Combine::All)
    }

    /// Parse a declared condition from a document.
    pub fn from_spec(spec: &ConditionSpec) -> Result<Self, ConditionParseError> {
        let (sources, combine) = match spec {
            ConditionSpec::Expression(source) => (std::slice::from_ref(source), Combine::All),
            ConditionSpec::All { all } => (all.as_slice(), Combine::All),
            ConditionSpec::Any { any } => (any.as_slice(), Combine::Any),
        };
        if sources.is_empty() {
            return Err(ConditionParseError::new(
                format!("{spec:?}"),
                "a combined condition needs at least one predicate",
            ));
        }
        let predicates = sources
            .iter()
            .map(|source| parse_predicate(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(predicates, combine))
    }

    /// Every field this condition reads.
    pub fn targets(&self) -> impl Iterator<Item = &FieldRef> {
        self.predicates.iter().map(|p| &p.target)
    }

    pub fn evaluate(&self, lookup: &dyn FieldLookup) -> Result<Satisfaction, EvaluationError> {
        let results = self
            .predicates
            .iter()
            .map(|p| p.evaluate(lookup))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.combine.fold(results))
    }

    /// Like [`evaluate`](Self::evaluate), with evaluation errors reported as pending.
    pub fn is_satisfied(&self, lookup: &dyn FieldLookup) -> Satisfaction {
        self.evaluate(lookup).unwrap_or_else(|err| {
            tracing::warn!("{err}");
            Satisfaction::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Fields {
        cards: HashMap<CardId, (Visibility, HashMap<String, FieldValue>)>,
    }

    impl Fields {
        fn with(mut self, card: &str, field: &str, value: &str) -> Self {
            self.cards
                .entry(CardId::from(card))
                .or_insert_with(|| (Visibility::Visible, HashMap::new()))
                .1
                .insert(field.to_string(), FieldValue::from(value));
            self
        }

        fn with_visibility(mut self, card: &str, visibility: Visibility) -> Self {
            self.cards
                .entry(CardId::from(card))
                .or_insert_with(|| (visibility, HashMap::new()))
                .0 = visibility;
            self
        }
    }

    impl FieldLookup for Fields {
        fn lookup(&self, target: &FieldRef) -> CardLookup<'_> {
            match self.cards.get(&target.card) {
                None => CardLookup::Absent,
                Some((visibility, fields)) => CardLookup::Present {
                    visibility: *visibility,
                    value: fields.get(&target.field),
                },
            }
        }
    }

    #[test]
    fn test_equals() {
        let fields = Fields::default().with("a", "done", "true");
        let p = Predicate::equals(FieldRef::local("a", "done"), "true");
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Satisfied);

        let p = Predicate::equals(FieldRef::local("a", "done"), "false");
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Unsatisfied);
    }

    #[test]
    fn test_absent_card_is_pending_never_false() {
        let fields = Fields::default();
        let p = Predicate::equals(FieldRef::local("ghost", "done"), "true");
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Pending);
    }

    #[test]
    fn test_pending_card_propagates() {
        let fields = Fields::default()
            .with("a", "done", "true")
            .with_visibility("a", Visibility::Pending);
        let p = Predicate::non_empty(FieldRef::local("a", "done"));
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Pending);
    }

    #[test]
    fn test_hidden_card_satisfies_nothing() {
        let fields = Fields::default()
            .with("a", "done", "true")
            .with_visibility("a", Visibility::Hidden);
        let p = Predicate::equals(FieldRef::local("a", "done"), "true");
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Unsatisfied);
        let p = Predicate::new(FieldRef::local("a", "done"), Operator::Empty, None);
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Unsatisfied);
    }

    #[test]
    fn test_missing_field_is_empty() {
        let fields = Fields::default().with("a", "other", "x");
        let set = Predicate::non_empty(FieldRef::local("a", "done"));
        assert_eq!(set.evaluate(&fields).unwrap(), Satisfaction::Unsatisfied);
        let empty = Predicate::new(FieldRef::local("a", "done"), Operator::Empty, None);
        assert_eq!(empty.evaluate(&fields).unwrap(), Satisfaction::Satisfied);
    }

    #[test]
    fn test_numeric_comparison() {
        let fields = Fields::default().with("age", "value", " 42 ");
        let p = Predicate::new(
            FieldRef::local("age", "value"),
            Operator::GreaterOrEqual,
            Some("18".into()),
        );
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Satisfied);
    }

    #[test]
    fn test_numeric_comparison_on_text_is_an_error() {
        let fields = Fields::default().with("age", "value", "old");
        let p = Predicate::new(
            FieldRef::local("age", "value"),
            Operator::LessThan,
            Some("18".into()),
        );
        let err = p.evaluate(&fields).unwrap_err();
        assert!(err.reason.contains("old"));

        let condition = DependencyCondition::single(p);
        assert_eq!(condition.is_satisfied(&fields), Satisfaction::Pending);
    }

    #[test]
    fn test_contains_on_list() {
        let mut fields = Fields::default().with("pick", "choice", "unused");
        fields.cards.get_mut(&CardId::from("pick")).unwrap().1.insert(
            "options".into(),
            FieldValue::List(vec!["interview".into(), "broll".into()]),
        );
        let p = Predicate::new(
            FieldRef::local("pick", "options"),
            Operator::Contains,
            Some("broll".into()),
        );
        assert_eq!(p.evaluate(&fields).unwrap(), Satisfaction::Satisfied);
    }

    #[test]
    fn test_combine_rules() {
        use Satisfaction::*;
        assert_eq!(Combine::All.fold([Satisfied, Satisfied]), Satisfied);
        assert_eq!(Combine::All.fold([Satisfied, Unsatisfied]), Unsatisfied);
        assert_eq!(Combine::All.fold([Unsatisfied, Pending]), Pending);
        assert_eq!(Combine::Any.fold([Unsatisfied, Satisfied, Pending]), Satisfied);
        assert_eq!(Combine::Any.fold([Unsatisfied, Pending]), Pending);
        assert_eq!(Combine::Any.fold([Unsatisfied]), Unsatisfied);
    }

    #[test]
    fn test_from_spec_any() {
        let spec = ConditionSpec::Any {
            any: vec!["a::done == \"yes\"".into(), "b::done".into()],
        };
        let condition = DependencyCondition::from_spec(&spec).unwrap();
        assert_eq!(condition.combine, Combine::Any);
        assert_eq!(condition.predicates.len(), 2);

        let fields = Fields::default().with("a", "done", "no").with("b", "done", "x");
        assert_eq!(condition.is_satisfied(&fields), Satisfaction::Satisfied);
    }

    #[test]
    fn test_field_ref_display_and_normalize() {
        let r = FieldRef::parse("intro::a::done").unwrap();
        assert_eq!(r.to_string(), "intro::a::done");
        assert_eq!(r.normalized("intro"), FieldRef::local("a", "done"));
        assert_eq!(r.normalized("other"), r);
        assert!(FieldRef::parse("a").is_err());
        assert!(FieldRef::parse("a::b c").is_err());
    }
}
