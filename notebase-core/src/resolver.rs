//! Maps dotted references (`file.*`, `note.*`, `formula.*`, bare keys) to
//! values on a note. Missing data is `None`, never an error.

use crate::formula;
use crate::schema::Schema;
use crate::value::number_value;
use crate::vault::Note;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Nested `formula.*` hops allowed before giving up with `None`.
pub const MAX_FORMULA_DEPTH: usize = 16;

pub const FILE_FIELDS: &[&str] = &["path", "name", "ext", "size", "ctime", "mtime", "folder"];

fn reference_regex() -> &'static Regex {
    static REFERENCE_REGEX: OnceLock<Regex> = OnceLock::new();
    REFERENCE_REGEX.get_or_init(|| {
        Regex::new(r"^(?:(?:file|note|formula)\.[\p{L}\p{N}_\-.]+|[\p{L}\p{N}_\-]+)$")
            .expect("reference regex must compile")
    })
}

/// Whether `text` is a direct reference token.
pub fn is_reference(text: &str) -> bool {
    reference_regex().is_match(text.trim())
}

pub fn resolve(note: &Note, reference: &str, schema: Option<&Schema>) -> Option<Value> {
    resolve_at_depth(note, reference, schema, 0)
}

pub(crate) fn resolve_at_depth(
    note: &Note,
    reference: &str,
    schema: Option<&Schema>,
    depth: usize,
) -> Option<Value> {
    let reference = reference.trim();
    if let Some(field) = reference.strip_prefix("file.") {
        return file_field(note, field);
    }
    if let Some(key) = reference.strip_prefix("note.") {
        return note.frontmatter.get(key).cloned();
    }
    if let Some(key) = reference.strip_prefix("formula.") {
        if depth >= MAX_FORMULA_DEPTH {
            return None;
        }
        let schema = schema?;
        let expression = schema.formula_expression(key)?;
        return formula::evaluate_at_depth(note, expression, Some(schema), depth + 1);
    }
    note.frontmatter.get(reference).cloned()
}

pub fn file_field(note: &Note, field: &str) -> Option<Value> {
    match field {
        "path" => Some(Value::String(note.path.clone())),
        "name" => Some(Value::String(note.name.clone())),
        "ext" => Some(Value::String(note.ext.clone())),
        "folder" => Some(Value::String(note.folder.clone())),
        "size" => Some(number_value(note.size as f64)),
        "ctime" => Some(number_value(note.ctime as f64)),
        "mtime" => Some(number_value(note.mtime as f64)),
        _ => None,
    }
}
