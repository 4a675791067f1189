//! The condition grammar.
//!
//! ```text
//! condition := reference [operator [literal]]
//! reference := segment "::" segment ["::" segment]
//! operator  := "==" | "!=" | ">=" | "<=" | ">" | "<" | "contains" | "is set" | "is empty"
//! literal   := quoted-string | bare-word
//! ```
//!
//! A bare reference means `is set`. The four-segment form
//! `path::card::field::value` is shorthand for `path::card::field == value`.

use super::{FieldRef, Operator, Predicate};
use crate::error::ConditionParseError;

/// Characters allowed inside one reference segment.
pub fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

pub fn is_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(is_segment_char)
}

/// Parse one declared predicate.
pub fn parse_predicate(input: &str) -> Result<Predicate, ConditionParseError> {
    let trimmed = input.trim();
    let reference_len = trimmed
        .find(|c: char| !(is_segment_char(c) || c == ':'))
        .unwrap_or(trimmed.len());
    let (reference, rest) = trimmed.split_at(reference_len);
    let rest = rest.trim();

    let segments: Vec<&str> = reference.split("::").collect();
    if let Some(bad) = segments.iter().find(|s| !is_segment(s)) {
        return Err(ConditionParseError::new(
            input,
            format!("`{bad}` is not a valid reference segment"),
        ));
    }

    if rest.is_empty() {
        if let [path, card, field, value] = segments.as_slice() {
            return Ok(Predicate::equals(
                FieldRef::in_path(*path, *card, *field),
                *value,
            ));
        }
    }

    let target = FieldRef::from_segments(&segments).ok_or_else(|| {
        ConditionParseError::new(input, "a reference needs two or three segments")
    })?;

    if rest.is_empty() {
        return Ok(Predicate::non_empty(target));
    }

    let (operator, operand) = split_operator(rest)
        .ok_or_else(|| ConditionParseError::new(input, format!("unknown operator in `{rest}`")))?;

    if !operator.takes_operand() {
        if !operand.is_empty() {
            return Err(ConditionParseError::new(
                input,
                format!("`{}` takes no operand", operator.symbol()),
            ));
        }
        return Ok(Predicate::new(target, operator, None));
    }

    let literal = parse_literal(operand).map_err(|reason| ConditionParseError::new(input, reason))?;
    if operator.is_numeric() && literal.trim().parse::<f64>().is_err() {
        return Err(ConditionParseError::new(
            input,
            format!("`{}` needs a numeric operand", operator.symbol()),
        ));
    }
    Ok(Predicate::new(target, operator, Some(literal)))
}

fn split_operator(rest: &str) -> Option<(Operator, &str)> {
    const SYMBOLS: &[(&str, Operator)] = &[
        (">=", Operator::GreaterOrEqual),
        ("<=", Operator::LessOrEqual),
        ("==", Operator::Equals),
        ("!=", Operator::NotEquals),
        (">", Operator::GreaterThan),
        ("<", Operator::LessThan),
    ];
    for (symbol, operator) in SYMBOLS {
        if let Some(operand) = rest.strip_prefix(*symbol) {
            return Some((*operator, operand.trim()));
        }
    }

    if let Some(operand) = rest.strip_prefix("contains") {
        if operand.starts_with(char::is_whitespace) {
            return Some((Operator::Contains, operand.trim()));
        }
    }

    let words: Vec<&str> = rest.split_whitespace().collect();
    match words.as_slice() {
        ["is", "set", ..] => Some((Operator::NonEmpty, rest_after_words(rest, 2))),
        ["is", "empty", ..] => Some((Operator::Empty, rest_after_words(rest, 2))),
        _ => None,
    }
}

fn rest_after_words(text: &str, count: usize) -> &str {
    let mut remaining = text.trim_start();
    for _ in 0..count {
        let end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());
        remaining = remaining[end..].trim_start();
    }
    remaining
}

fn parse_literal(operand: &str) -> Result<String, String> {
    if operand.is_empty() {
        return Err("missing operand".to_string());
    }
    let Some(body) = operand.strip_prefix('"') else {
        return Ok(operand.to_string());
    };

    let mut literal = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => literal.push(escaped),
                None => return Err("dangling escape in quoted operand".to_string()),
            },
            '"' => {
                if !chars.as_str().trim().is_empty() {
                    return Err("unexpected text after quoted operand".to_string());
                }
                return Ok(literal);
            }
            other => literal.push(other),
        }
    }
    Err("unterminated quoted operand".to_string())
}
