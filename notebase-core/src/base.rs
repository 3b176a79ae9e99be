use crate::error::{EngineError, EngineResult};
use crate::schema::{extract_schema, Schema};
use crate::storage;
use crate::vault::{self, normalize_note_path, BASE_EXTENSION};
use anyhow::Context;
use opendal::Operator;
use serde_json::Value;

/// Canonical identifier of a base: vault-relative, `/`-separated, `.base` suffixed.
pub fn canonical_base_key(base: &str) -> String {
    let path = normalize_note_path(base);
    let suffix = format!(".{}", BASE_EXTENSION);
    if path.to_ascii_lowercase().ends_with(&suffix) {
        path
    } else {
        format!("{}{}", path, suffix)
    }
}

fn decode_spec(raw: &str) -> EngineResult<Value> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(raw)
        .map_err(|e| EngineError::Validation(format!("base config must be valid YAML: {}", e)))?;
    let value = serde_json::to_value(yaml)
        .map_err(|e| EngineError::Validation(format!("base config is not representable: {}", e)))?;
    match value {
        Value::Null => Ok(Value::Object(Default::default())),
        Value::Object(_) => Ok(value),
        _ => Err(EngineError::Validation(
            "base config must be a mapping".to_string(),
        )),
    }
}

fn validate_sections(spec: &Value) -> EngineResult<()> {
    for key in ["properties", "formulas"] {
        match spec.get(key) {
            None | Some(Value::Null) | Some(Value::Object(_)) => {}
            Some(_) => return Err(EngineError::Validation(format!("{} must be a mapping", key))),
        }
    }
    match spec.get("views") {
        None | Some(Value::Null) | Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(EngineError::Validation("views must be a list".to_string())),
    }
}

pub async fn read_base_config(op: &Operator, vault_path: &str, base: &str) -> EngineResult<String> {
    let key = canonical_base_key(base);
    let path = storage::join(vault_path, &key);
    if !op.exists(&path).await.context("failed to check base")? {
        return Err(EngineError::NotFound(format!("base {}", key)));
    }
    let bytes = op.read(&path).await.context("failed to read base")?;
    Ok(String::from_utf8_lossy(&bytes.to_vec()).into_owned())
}

/// Replaces a base file wholesale after checking it decodes.
pub async fn write_base_config(
    op: &Operator,
    vault_path: &str,
    base: &str,
    raw: &str,
) -> EngineResult<String> {
    let key = canonical_base_key(base);
    if key == format!(".{}", BASE_EXTENSION) {
        return Err(EngineError::Validation("base path must not be empty".to_string()));
    }
    let spec = decode_spec(raw)?;
    validate_sections(&spec)?;

    let path = storage::join(vault_path, &key);
    storage::ensure_parent_dirs(op, &path)
        .await
        .map_err(|e| EngineError::Write(e.to_string()))?;
    op.write(&path, raw.as_bytes().to_vec())
        .await
        .map_err(|e| EngineError::Write(e.to_string()))?;
    tracing::info!(base = %key, bytes = raw.len(), "base config written");
    Ok(key)
}

pub async fn load_base_spec(op: &Operator, vault_path: &str, base: &str) -> EngineResult<Value> {
    let raw = read_base_config(op, vault_path, base).await?;
    decode_spec(&raw)
}

pub async fn get_schema(op: &Operator, vault_path: &str, base: &str) -> EngineResult<Schema> {
    let spec = load_base_spec(op, vault_path, base).await?;
    Ok(extract_schema(&canonical_base_key(base), &spec))
}

pub async fn list_bases(op: &Operator, vault_path: &str) -> EngineResult<Vec<String>> {
    Ok(vault::list_paths(op, vault_path, BASE_EXTENSION).await?)
}
