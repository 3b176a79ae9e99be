//! Evaluator for the restricted formula grammar: literals, references,
//! `list(ref)`, `join(list(ref))` and `if(cond, then, else)`.
//!
//! Rules are tried in order and the first match wins. Anything else is
//! `None`.

use crate::resolver::{self, MAX_FORMULA_DEPTH};
use crate::schema::Schema;
use crate::value::{display_string, is_truthy, number_value, split_top_level_commas, to_array};
use crate::vault::Note;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const REF_PATTERN: &str = r"(?:file|note|formula)\.[\p{L}\p{N}_\-.]+|[\p{L}\p{N}_\-]+";

fn number_regex() -> &'static Regex {
    static NUMBER_REGEX: OnceLock<Regex> = OnceLock::new();
    NUMBER_REGEX
        .get_or_init(|| Regex::new(r"^[+-]?\d+(?:\.\d+)?$").expect("number regex must compile"))
}

fn quoted_regex() -> &'static Regex {
    static QUOTED_REGEX: OnceLock<Regex> = OnceLock::new();
    QUOTED_REGEX.get_or_init(|| {
        Regex::new(r#"(?s)^(?:"(.*)"|'(.*)')$"#).expect("quoted regex must compile")
    })
}

fn join_list_regex() -> &'static Regex {
    static JOIN_REGEX: OnceLock<Regex> = OnceLock::new();
    JOIN_REGEX.get_or_init(|| {
        Regex::new(&format!(r"^join\(\s*list\(\s*({})\s*\)\s*\)$", REF_PATTERN))
            .expect("join regex must compile")
    })
}

fn list_regex() -> &'static Regex {
    static LIST_REGEX: OnceLock<Regex> = OnceLock::new();
    LIST_REGEX.get_or_init(|| {
        Regex::new(&format!(r"^list\(\s*({})\s*\)$", REF_PATTERN)).expect("list regex must compile")
    })
}

fn if_regex() -> &'static Regex {
    static IF_REGEX: OnceLock<Regex> = OnceLock::new();
    IF_REGEX.get_or_init(|| Regex::new(r"(?s)^if\s*\((.*)\)$").expect("if regex must compile"))
}

pub fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if !number_regex().is_match(text) {
        return None;
    }
    if !text.contains('.') {
        if let Ok(i) = text.trim_start_matches('+').parse::<i64>() {
            return Some(Value::from(i));
        }
    }
    text.parse::<f64>().ok().map(number_value)
}

/// Evaluates `expression` against `note`. Never fails; unknown syntax is `None`.
pub fn evaluate(note: &Note, expression: &str, schema: Option<&Schema>) -> Option<Value> {
    evaluate_at_depth(note, expression, schema, 0)
}

pub(crate) fn evaluate_at_depth(
    note: &Note,
    expression: &str,
    schema: Option<&Schema>,
    depth: usize,
) -> Option<Value> {
    if depth > MAX_FORMULA_DEPTH {
        return None;
    }
    let expr = expression.trim();
    if expr.is_empty() {
        return None;
    }

    if expr == "null" {
        return Some(Value::Null);
    }

    if let Some(number) = parse_number(expr) {
        return Some(number);
    }

    if let Some(caps) = quoted_regex().captures(expr) {
        let inner = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or("");
        return Some(Value::String(inner.to_string()));
    }

    if resolver::is_reference(expr) {
        return resolver::resolve_at_depth(note, expr, schema, depth);
    }

    if let Some(caps) = join_list_regex().captures(expr) {
        let reference = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let items = to_array(resolver::resolve_at_depth(note, reference, schema, depth));
        let joined = items
            .iter()
            .map(|item| display_string(Some(item)))
            .collect::<Vec<_>>()
            .join(", ");
        return Some(Value::String(joined));
    }

    if let Some(caps) = list_regex().captures(expr) {
        let reference = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let items = to_array(resolver::resolve_at_depth(note, reference, schema, depth));
        return Some(Value::Array(items));
    }

    if let Some(caps) = if_regex().captures(expr) {
        let inner = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        return evaluate_if(note, inner, schema, depth);
    }

    None
}

fn evaluate_if(note: &Note, args: &str, schema: Option<&Schema>, depth: usize) -> Option<Value> {
    let parts = split_top_level_commas(args);
    if parts.len() < 2 {
        return None;
    }
    let condition = evaluate_at_depth(note, &parts[0], schema, depth + 1);
    if is_truthy(condition.as_ref()) {
        evaluate_at_depth(note, &parts[1], schema, depth + 1)
    } else if parts.len() > 2 {
        let otherwise = parts[2..].join(",");
        evaluate_at_depth(note, &otherwise, schema, depth + 1)
    } else {
        None
    }
}
