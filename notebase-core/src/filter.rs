//! Boolean filter evaluation over notes.
//!
//! Statements are tried in a fixed order: `or` split, `and` split, negation,
//! built-in predicates, binary comparison, bare reference truthiness. Text
//! that matches none of them passes with a warning so an unknown filter
//! never hides rows.

use crate::formula::parse_number;
use crate::resolver::{self, is_reference};
use crate::schema::Schema;
use crate::value::{
    as_finite_number, compare_loose, display_string, is_quoted, is_truthy,
    split_top_level_commas, strip_quotes, to_array,
};
use crate::vault::{normalize_link, strip_tag, Note};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::OnceLock;

pub const UNSUPPORTED_SHAPE_WARNING: &str = "Filter non supporté (shape inconnu).";

pub fn unrecognized_warning(text: &str) -> String {
    format!("Filter non reconnu: {}", text)
}

/// Filter tree decoded once from loosely-typed spec or request data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Statement(String),
    Unsupported(Value),
}

impl FilterNode {
    /// `None` for null, a node for anything else.
    pub fn from_value(value: &Value) -> Option<FilterNode> {
        if value.is_null() {
            None
        } else {
            Some(FilterNode::from(value.clone()))
        }
    }

    /// AND of the present filters; `None` when none are present.
    pub fn combine<I>(filters: I) -> Option<FilterNode>
    where
        I: IntoIterator<Item = Option<FilterNode>>,
    {
        let children: Vec<FilterNode> = filters.into_iter().flatten().collect();
        if children.is_empty() {
            None
        } else {
            Some(FilterNode::And(children))
        }
    }
}

fn children_of(value: Value) -> Option<Vec<FilterNode>> {
    match value {
        Value::Array(items) => Some(items.into_iter().map(FilterNode::from).collect()),
        _ => None,
    }
}

impl From<Value> for FilterNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FilterNode::And(Vec::new()),
            Value::String(statement) => FilterNode::Statement(statement),
            Value::Object(map) if map.len() == 1 => {
                let Some((key, inner)) = map.iter().next().map(|(k, v)| (k.clone(), v.clone()))
                else {
                    return FilterNode::Unsupported(Value::Object(map));
                };
                match key.as_str() {
                    "and" => children_of(inner)
                        .map(FilterNode::And)
                        .unwrap_or(FilterNode::Unsupported(Value::Object(map))),
                    "or" => children_of(inner)
                        .map(FilterNode::Or)
                        .unwrap_or(FilterNode::Unsupported(Value::Object(map))),
                    // A list under `not` means "none of these".
                    "not" => match inner {
                        Value::Array(_) => children_of(inner)
                            .map(|items| FilterNode::Not(Box::new(FilterNode::Or(items))))
                            .unwrap_or(FilterNode::Unsupported(Value::Object(map))),
                        Value::Object(_) | Value::String(_) => {
                            FilterNode::Not(Box::new(FilterNode::from(inner)))
                        }
                        _ => FilterNode::Unsupported(Value::Object(map)),
                    },
                    _ => FilterNode::Unsupported(Value::Object(map)),
                }
            }
            other => FilterNode::Unsupported(other),
        }
    }
}

impl From<FilterNode> for Value {
    fn from(node: FilterNode) -> Self {
        let wrap = |key: &str, value: Value| {
            let mut map = Map::new();
            map.insert(key.to_string(), value);
            Value::Object(map)
        };
        match node {
            FilterNode::And(items) => wrap(
                "and",
                Value::Array(items.into_iter().map(Value::from).collect()),
            ),
            FilterNode::Or(items) => wrap(
                "or",
                Value::Array(items.into_iter().map(Value::from).collect()),
            ),
            FilterNode::Not(inner) => wrap("not", Value::from(*inner)),
            FilterNode::Statement(text) => Value::String(text),
            FilterNode::Unsupported(raw) => raw,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub ok: bool,
    pub warnings: Vec<String>,
}

impl FilterOutcome {
    fn pass() -> Self {
        Self {
            ok: true,
            warnings: Vec::new(),
        }
    }

    fn of(ok: bool) -> Self {
        Self {
            ok,
            warnings: Vec::new(),
        }
    }
}

/// Evaluates a structured filter tree. `None` always passes.
pub fn evaluate_filter(note: &Note, node: Option<&FilterNode>, schema: Option<&Schema>) -> FilterOutcome {
    let Some(node) = node else {
        return FilterOutcome::pass();
    };
    match node {
        FilterNode::And(children) => {
            let mut warnings = Vec::new();
            for child in children {
                let outcome = evaluate_filter(note, Some(child), schema);
                warnings.extend(outcome.warnings);
                if !outcome.ok {
                    return FilterOutcome { ok: false, warnings };
                }
            }
            FilterOutcome { ok: true, warnings }
        }
        FilterNode::Or(children) => {
            let mut warnings = Vec::new();
            for child in children {
                let outcome = evaluate_filter(note, Some(child), schema);
                warnings.extend(outcome.warnings);
                if outcome.ok {
                    return FilterOutcome { ok: true, warnings };
                }
            }
            FilterOutcome { ok: false, warnings }
        }
        FilterNode::Not(inner) => {
            let outcome = evaluate_filter(note, Some(inner), schema);
            FilterOutcome {
                ok: !outcome.ok,
                warnings: outcome.warnings,
            }
        }
        FilterNode::Statement(text) => evaluate_statement(note, text, schema),
        FilterNode::Unsupported(_) => FilterOutcome {
            ok: true,
            warnings: vec![UNSUPPORTED_SHAPE_WARNING.to_string()],
        },
    }
}

/// Evaluates one statement of the filter language.
pub fn evaluate_statement(note: &Note, statement: &str, schema: Option<&Schema>) -> FilterOutcome {
    let text = statement.trim();
    if text.is_empty() {
        return FilterOutcome::pass();
    }

    let alternatives = split_logical(text, "||", "or");
    if alternatives.len() > 1 {
        let mut warnings = Vec::new();
        for part in &alternatives {
            let outcome = evaluate_statement(note, part, schema);
            warnings.extend(outcome.warnings);
            if outcome.ok {
                return FilterOutcome { ok: true, warnings };
            }
        }
        return FilterOutcome { ok: false, warnings };
    }

    let conjuncts = split_logical(text, "&&", "and");
    if conjuncts.len() > 1 {
        let mut warnings = Vec::new();
        for part in &conjuncts {
            let outcome = evaluate_statement(note, part, schema);
            warnings.extend(outcome.warnings);
            if !outcome.ok {
                return FilterOutcome { ok: false, warnings };
            }
        }
        return FilterOutcome { ok: true, warnings };
    }

    if let Some(rest) = strip_negation(text) {
        let outcome = evaluate_statement(note, rest, schema);
        return FilterOutcome {
            ok: !outcome.ok,
            warnings: outcome.warnings,
        };
    }

    if let Some(ok) = evaluate_builtin(note, text, schema) {
        return FilterOutcome::of(ok);
    }

    if let Some(caps) = comparison_regex().captures(text) {
        let left = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let op = caps.get(2).map(|m| m.as_str()).unwrap_or("==");
        let right = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
        let left_value = resolver::resolve(note, left, schema);
        let right_value = parse_operand(right);
        return FilterOutcome::of(compare(left_value.as_ref(), op, &right_value));
    }

    if is_reference(text) {
        let value = resolver::resolve(note, text, schema);
        return FilterOutcome::of(is_truthy(value.as_ref()));
    }

    FilterOutcome {
        ok: true,
        warnings: vec![unrecognized_warning(text)],
    }
}

fn strip_negation(text: &str) -> Option<&str> {
    if let Some(rest) = text.strip_prefix('!') {
        return Some(rest.trim_start());
    }
    let (head, tail) = text.split_at_checked(3)?;
    if head.eq_ignore_ascii_case("not") && tail.starts_with(char::is_whitespace) {
        return Some(tail.trim_start());
    }
    None
}

/// Splits at `symbol` or at whitespace-delimited `word`, outside quotes only.
/// Parentheses are not tracked.
fn split_logical(text: &str, symbol: &str, word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut i = 0;
    while i < text.len() {
        let Some(ch) = text[i..].chars().next() else {
            break;
        };
        if let Some(q) = quote {
            if ch == q {
                quote = None;
            }
            i += ch.len_utf8();
            continue;
        }
        if ch == '"' || ch == '\'' {
            quote = Some(ch);
            i += 1;
            continue;
        }
        if text[i..].starts_with(symbol) {
            parts.push(text[start..i].trim().to_string());
            i += symbol.len();
            start = i;
            continue;
        }
        if ch.is_whitespace() {
            if let Some(len) = word_operator_len(&text[i..], word) {
                parts.push(text[start..i].trim().to_string());
                i += len;
                start = i;
                continue;
            }
        }
        i += ch.len_utf8();
    }
    parts.push(text[start..].trim().to_string());
    parts
}

/// Length of `\s+word\s+` at the start of `rest`, if present.
fn word_operator_len(rest: &str, word: &str) -> Option<usize> {
    let after_ws = rest.trim_start();
    let ws_len = rest.len() - after_ws.len();
    let (candidate, tail) = after_ws.split_at_checked(word.len())?;
    if !candidate.eq_ignore_ascii_case(word) {
        return None;
    }
    let tail_trimmed = tail.trim_start();
    let gap = tail.len() - tail_trimmed.len();
    if gap == 0 || tail_trimmed.is_empty() {
        return None;
    }
    Some(ws_len + word.len() + gap)
}

fn comparison_regex() -> &'static Regex {
    static COMPARISON_REGEX: OnceLock<Regex> = OnceLock::new();
    COMPARISON_REGEX.get_or_init(|| {
        Regex::new(r"(?s)^(.+?)\s*(==|!=|>=|<=|=|>|<)\s*(.+)$")
            .expect("comparison regex must compile")
    })
}

fn parse_operand(text: &str) -> Value {
    if is_quoted(text) {
        return Value::String(strip_quotes(text).to_string());
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    parse_number(text).unwrap_or_else(|| Value::String(text.to_string()))
}

fn loose_equal(left: Option<&Value>, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (as_finite_number(left), as_finite_number(Some(right))) {
        return l == r;
    }
    display_string(left) == display_string(Some(right))
}

fn compare(left: Option<&Value>, op: &str, right: &Value) -> bool {
    match op {
        "==" | "=" => loose_equal(left, right),
        "!=" => !loose_equal(left, right),
        ">" => compare_loose(left, Some(right)) == Ordering::Greater,
        ">=" => compare_loose(left, Some(right)) != Ordering::Less,
        "<" => compare_loose(left, Some(right)) == Ordering::Less,
        "<=" => compare_loose(left, Some(right)) != Ordering::Greater,
        _ => false,
    }
}

const REF_PATTERN: &str = r"(?:file|note|formula)\.[\p{L}\p{N}_\-.]+|[\p{L}\p{N}_\-]+";

struct Builtins {
    has_tag: Regex,
    in_folder: Regex,
    has_link: Regex,
    list_literal_contains: Regex,
    path_or_folder_op: Regex,
    tags_contains: Regex,
    list_contains_link: Regex,
    prop_contains_link: Regex,
    file_field_op: Regex,
}

fn builtins() -> &'static Builtins {
    static BUILTINS: OnceLock<Builtins> = OnceLock::new();
    BUILTINS.get_or_init(|| {
        let compile = |pattern: &str| Regex::new(pattern).expect("builtin regex must compile");
        Builtins {
            has_tag: compile(r"(?s)^file\.hasTag\((.*)\)$"),
            in_folder: compile(r"(?s)^file\.inFolder\((.*)\)$"),
            has_link: compile(r"(?s)^file\.hasLink\((.*)\)$"),
            list_literal_contains: compile(r"(?s)^\[(.*)\]\.contains\((.*)\)$"),
            path_or_folder_op: compile(r"(?s)^file\.(path|folder)\.(startsWith|contains)\((.*)\)$"),
            tags_contains: compile(r"(?s)^file\.tags\.contains\((.*)\)$"),
            list_contains_link: compile(&format!(
                r"(?s)^list\(\s*({})\s*\)\.contains\(\s*link\((.*)\)\s*\)$",
                REF_PATTERN
            )),
            prop_contains_link: compile(&format!(
                r"(?s)^({})\.contains\(\s*link\((.*)\)\s*\)$",
                REF_PATTERN
            )),
            file_field_op: compile(
                r"(?s)^file\.(path|name|folder|ext)\.(contains|startsWith)\((.*)\)$",
            ),
        }
    })
}

fn literal_arg(text: &str) -> String {
    strip_quotes(text.trim()).to_string()
}

fn link_arg(text: &str) -> String {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix("link(")
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(trimmed);
    let target = match split_top_level_commas(inner).into_iter().next() {
        Some(first) => first,
        None => inner.to_string(),
    };
    normalize_link(&target)
}

fn string_op(haystack: &str, op: &str, needle: &str) -> bool {
    match op {
        "startsWith" => haystack.starts_with(needle),
        _ => haystack.contains(needle),
    }
}

fn capture<'t>(caps: &regex::Captures<'t>, index: usize) -> &'t str {
    caps.get(index).map(|m| m.as_str()).unwrap_or("")
}

fn note_has_tag(note: &Note, tag: &str) -> bool {
    let wanted = strip_tag(tag);
    note.tags.iter().any(|t| strip_tag(t) == wanted)
}

fn collection_contains_link(
    note: &Note,
    reference: &str,
    target: &str,
    schema: Option<&Schema>,
) -> bool {
    let wanted = link_arg(target);
    to_array(resolver::resolve(note, reference, schema))
        .iter()
        .any(|item| normalize_link(&display_string(Some(item))) == wanted)
}

/// Returns `Some(result)` when `text` is one of the built-in predicates.
fn evaluate_builtin(note: &Note, text: &str, schema: Option<&Schema>) -> Option<bool> {
    let b = builtins();

    if let Some(caps) = b.has_tag.captures(text) {
        let args = split_top_level_commas(capture(&caps, 1));
        return Some(args.iter().any(|arg| note_has_tag(note, &literal_arg(arg))));
    }

    if let Some(caps) = b.in_folder.captures(text) {
        let folder = literal_arg(capture(&caps, 1));
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            return Some(true);
        }
        return Some(note.path.starts_with(&format!("{}/", folder)));
    }

    if let Some(caps) = b.has_link.captures(text) {
        let wanted = link_arg(capture(&caps, 1));
        return Some(note.links.iter().any(|link| normalize_link(link) == wanted));
    }

    if let Some(caps) = b.list_literal_contains.captures(text) {
        let items: Vec<String> = split_top_level_commas(capture(&caps, 1))
            .iter()
            .map(|item| literal_arg(item))
            .filter(|item| !item.is_empty())
            .collect();
        let needle_text = capture(&caps, 2).trim();
        let resolved = if is_reference(needle_text) {
            resolver::resolve(note, needle_text, schema)
        } else {
            None
        };
        let needles: Vec<String> = match resolved {
            None | Some(Value::Null) => vec![literal_arg(needle_text)],
            Some(Value::Array(values)) => values
                .iter()
                .map(|v| display_string(Some(v)))
                .collect(),
            Some(value) => vec![display_string(Some(&value))],
        };
        return Some(needles.iter().any(|needle| items.contains(needle)));
    }

    if let Some(caps) = b.path_or_folder_op.captures(text) {
        let haystack = if capture(&caps, 1) == "path" {
            &note.path
        } else {
            &note.folder
        };
        return Some(string_op(haystack, capture(&caps, 2), &literal_arg(capture(&caps, 3))));
    }

    if let Some(caps) = b.tags_contains.captures(text) {
        return Some(note_has_tag(note, &literal_arg(capture(&caps, 1))));
    }

    if let Some(caps) = b.list_contains_link.captures(text) {
        return Some(collection_contains_link(
            note,
            capture(&caps, 1),
            capture(&caps, 2),
            schema,
        ));
    }

    if let Some(caps) = b.prop_contains_link.captures(text) {
        return Some(collection_contains_link(
            note,
            capture(&caps, 1),
            capture(&caps, 2),
            schema,
        ));
    }

    if let Some(caps) = b.file_field_op.captures(text) {
        let field = capture(&caps, 1);
        let haystack = display_string(resolver::file_field(note, field).as_ref());
        return Some(string_op(&haystack, capture(&caps, 2), &literal_arg(capture(&caps, 3))));
    }

    None
}
