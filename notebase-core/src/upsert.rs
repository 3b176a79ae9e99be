use crate::error::{EngineError, EngineResult, ErrorBody};
use crate::vault::{self, normalize_note_path, NOTE_EXTENSION};
use opendal::Operator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A requested frontmatter mutation on one note.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UpsertOperation {
    pub file: String,
    #[serde(default)]
    pub set: Map<String, Value>,
    #[serde(default)]
    pub unset: Vec<String>,
    #[serde(default, alias = "expectedMtime", skip_serializing_if = "Option::is_none")]
    pub expected_mtime: Option<i64>,
}

pub type UpsertError = ErrorBody;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub file: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<UpsertError>,
}

impl UpsertResult {
    fn failed(file: String, error: &EngineError) -> Self {
        Self {
            file,
            ok: false,
            mtime: None,
            changed: Vec::new(),
            error: Some(error.to_body()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpsertBatchResponse {
    pub ok: bool,
    pub results: Vec<UpsertResult>,
}

fn target_path(file: &str) -> EngineResult<String> {
    let rel = normalize_note_path(file);
    if rel.is_empty() {
        return Err(EngineError::Validation("file must not be empty".to_string()));
    }
    let last = rel.rsplit('/').next().unwrap_or(&rel);
    if last.contains('.') {
        Ok(rel)
    } else {
        Ok(format!("{}.{}", rel, NOTE_EXTENSION))
    }
}

fn validate(operation: &UpsertOperation) -> EngineResult<String> {
    let path = target_path(&operation.file)?;
    if operation.set.keys().any(|k| k.trim().is_empty())
        || operation.unset.iter().any(|k| k.trim().is_empty())
    {
        return Err(EngineError::Validation(
            "frontmatter keys must not be empty".to_string(),
        ));
    }
    let unset: HashSet<&str> = operation.unset.iter().map(|k| k.as_str()).collect();
    if let Some(key) = operation.set.keys().find(|k| unset.contains(k.as_str())) {
        return Err(EngineError::Validation(format!(
            "key '{}' is both set and unset",
            key
        )));
    }
    Ok(path)
}

/// Keys the operation would actually change, in request order.
fn changed_keys(current: &Map<String, Value>, operation: &UpsertOperation) -> Vec<String> {
    let mut changed: Vec<String> = operation
        .set
        .iter()
        .filter(|(key, value)| current.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &operation.unset {
        if current.contains_key(key) && !changed.contains(key) {
            changed.push(key.clone());
        }
    }
    changed
}

/// Applies one frontmatter mutation, honoring `expected_mtime`.
pub async fn upsert_frontmatter(
    op: &Operator,
    vault_path: &str,
    operation: &UpsertOperation,
) -> EngineResult<UpsertResult> {
    let path = validate(operation)?;
    let note = vault::get_note(op, vault_path, &path).await?;

    if let Some(expected) = operation.expected_mtime {
        if expected != note.mtime {
            return Err(EngineError::MtimeConflict {
                path,
                expected,
                actual: note.mtime,
            });
        }
    }

    let changed = changed_keys(&note.frontmatter, operation);
    if changed.is_empty() {
        tracing::debug!(file = %path, "upsert is a no-op");
        return Ok(UpsertResult {
            file: path,
            ok: true,
            mtime: Some(note.mtime),
            changed,
            error: None,
        });
    }

    let ((), updated) = vault::write_frontmatter(op, vault_path, &path, |frontmatter| {
        for (key, value) in &operation.set {
            frontmatter.insert(key.clone(), value.clone());
        }
        for key in &operation.unset {
            frontmatter.remove(key);
        }
    })
    .await?;

    tracing::info!(file = %path, changed = ?changed, mtime = updated.mtime, "frontmatter upserted");
    Ok(UpsertResult {
        file: path,
        ok: true,
        mtime: Some(updated.mtime),
        changed,
        error: None,
    })
}

/// Runs operations in order. Without `continue_on_error` the batch stops at
/// the first failure and later operations are not attempted.
pub async fn upsert_batch(
    op: &Operator,
    vault_path: &str,
    operations: &[UpsertOperation],
    continue_on_error: bool,
) -> UpsertBatchResponse {
    let mut results = Vec::with_capacity(operations.len());
    let mut ok = true;
    for operation in operations {
        match upsert_frontmatter(op, vault_path, operation).await {
            Ok(result) => results.push(result),
            Err(err) => {
                tracing::warn!(file = %operation.file, code = err.code(), error = %err, "upsert failed");
                ok = false;
                results.push(UpsertResult::failed(operation.file.clone(), &err));
                if !continue_on_error {
                    break;
                }
            }
        }
    }
    UpsertBatchResponse { ok, results }
}
