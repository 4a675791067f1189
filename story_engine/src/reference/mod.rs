//! Field references embedded in display text.
//!
//! A placeholder is two or three segments joined by `::`, e.g.
//! `name::value` or `intro::name::value`. Reading a reference-bearing field
//! replaces each placeholder with the current value of the field it names.
//! `\::` writes a literal `::` and `\\` a literal backslash. Resolution is a
//! single pass: text coming out of a placeholder is not scanned again.

use story_model::{is_segment_char, FieldRef, FieldValue};

use crate::config::{EngineConfig, UnresolvedPolicy};
use crate::story_path::Scope;

/// A piece of scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    Literal(String),
    Placeholder { raw: &'a str, target: FieldRef },
}

/// Split text into literal runs and placeholders.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];
        if let Some(escaped) = rest.strip_prefix('\\') {
            if escaped.starts_with("::") {
                literal.push_str("::");
                i += 3;
                continue;
            }
            if escaped.starts_with('\\') {
                literal.push('\\');
                i += 2;
                continue;
            }
        }

        let Some(c) = rest.chars().next() else {
            break;
        };
        if !is_segment_char(c) {
            literal.push(c);
            i += c.len_utf8();
            continue;
        }

        let len = token_len(rest);
        let raw = &rest[..len];
        let segments: Vec<&str> = raw.split("::").collect();
        match FieldRef::from_segments(&segments) {
            Some(target) => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Placeholder { raw, target });
            }
            None => literal.push_str(raw),
        }
        i += len;
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    tokens
}

/// Every field a text shows through placeholders.
pub fn placeholders(text: &str) -> impl Iterator<Item = FieldRef> + '_ {
    tokenize(text).into_iter().filter_map(|token| match token {
        Token::Placeholder { target, .. } => Some(target),
        Token::Literal(_) => None,
    })
}

fn segment_len(text: &str) -> usize {
    text.find(|c: char| !is_segment_char(c)).unwrap_or(text.len())
}

/// Length of `segment ("::" segment)*` at the start of `text`.
fn token_len(text: &str) -> usize {
    let mut len = segment_len(text);
    while let Some(next) = text[len..].strip_prefix("::") {
        let segment = segment_len(next);
        if segment == 0 {
            break;
        }
        len += 2 + segment;
    }
    len
}

/// Why a placeholder kept its degraded form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The named story path is not loaded.
    DocumentNotLoaded,
    MissingCard,
    MissingField,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            UnresolvedReason::DocumentNotLoaded => "story path not loaded",
            UnresolvedReason::MissingCard => "no such card",
            UnresolvedReason::MissingField => "no such field",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub placeholder: String,
    pub reason: UnresolvedReason,
}

/// Resolved text plus the placeholders that could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    pub unresolved: Vec<UnresolvedReference>,
}

/// Resolves placeholders against one graph and what it links to.
pub struct Resolver<'a> {
    scope: Scope<'a>,
    config: &'a EngineConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(scope: Scope<'a>, config: &'a EngineConfig) -> Self {
        Self { scope, config }
    }

    pub fn resolve(&self, text: &str) -> String {
        self.resolve_detailed(text).text
    }

    /// Resolve text, reporting each placeholder that degraded.
    ///
    /// Never fails: a missing card or field leaves the placeholder as
    /// written, and a story path that is not loaded follows the configured
    /// [`UnresolvedPolicy`].
    pub fn resolve_detailed(&self, text: &str) -> Resolution {
        let mut resolution = Resolution::default();
        for token in tokenize(text) {
            match token {
                Token::Literal(literal) => resolution.text.push_str(&literal),
                Token::Placeholder { raw, target } => match self.lookup(&target) {
                    Ok(value) => resolution.text.push_str(&value),
                    Err(reason) => {
                        tracing::warn!("unresolved reference {raw}: {reason}");
                        let degraded = match (reason, self.config.unresolved_policy) {
                            (UnresolvedReason::DocumentNotLoaded, UnresolvedPolicy::Empty) => "",
                            _ => raw,
                        };
                        resolution.text.push_str(degraded);
                        resolution.unresolved.push(UnresolvedReference {
                            placeholder: raw.to_string(),
                            reason,
                        });
                    }
                },
            }
        }
        resolution
    }

    /// Resolve a stored value; media references pass through.
    pub fn resolve_value(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Text(text) => FieldValue::Text(self.resolve(text)),
            FieldValue::List(items) => {
                FieldValue::List(items.iter().map(|item| self.resolve(item)).collect())
            }
            FieldValue::Media(media) => FieldValue::Media(media.clone()),
        }
    }

    fn lookup(&self, target: &FieldRef) -> Result<String, UnresolvedReason> {
        let graph = self
            .scope
            .document(target.story_path.as_deref())
            .ok_or(UnresolvedReason::DocumentNotLoaded)?;
        let card = graph
            .card(&target.card)
            .ok_or(UnresolvedReason::MissingCard)?;
        let value = card
            .raw_field(&target.field)
            .ok_or(UnresolvedReason::MissingField)?;
        Ok(value.render(&self.config.list_separator))
    }
}
