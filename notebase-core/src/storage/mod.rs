use anyhow::{anyhow, Result};
use opendal::services::{Fs, Memory, S3};
use opendal::Operator;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use url::Url;

static MEMORY_OPERATORS: OnceLock<Mutex<HashMap<String, Operator>>> = OnceLock::new();

fn memory_cache() -> &'static Mutex<HashMap<String, Operator>> {
    MEMORY_OPERATORS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Creates an OpenDAL Operator from a URI string.
///
/// Supported schemes:
/// - file:///path/to/vault -> local filesystem
/// - s3://bucket/path -> AWS S3 (credentials from the environment)
/// - memory://name -> in-memory, shared by every caller using the same URI
pub fn operator_from_uri(uri: &str) -> Result<Operator> {
    if uri.starts_with("memory://") {
        let mut cache = memory_cache()
            .lock()
            .map_err(|_| anyhow!("memory operator cache lock poisoned"))?;
        if let Some(op) = cache.get(uri) {
            return Ok(op.clone());
        }
        let op = Operator::new(Memory::default())?.finish();
        cache.insert(uri.to_string(), op.clone());
        return Ok(op);
    }

    let url = Url::parse(uri).map_err(|e| anyhow!("Invalid storage URI: {}", e))?;
    match url.scheme() {
        "file" | "fs" => {
            let root = url.path();
            if root.is_empty() {
                return Err(anyhow!("File URI missing a root path"));
            }
            Ok(Operator::new(Fs::default().root(root))?.finish())
        }
        "s3" => {
            let bucket = url
                .host_str()
                .ok_or_else(|| anyhow!("S3 URI missing bucket"))?;
            let mut builder = S3::default().bucket(bucket).region("auto");
            let root = url.path();
            if !root.is_empty() && root != "/" {
                builder = builder.root(root);
            }
            Ok(Operator::new(builder)?.finish())
        }
        other => Err(anyhow!("Unsupported storage scheme: {}", other)),
    }
}

/// Joins a vault root and a vault-relative path.
pub fn join(vault_path: &str, rel: &str) -> String {
    let root = vault_path.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if root.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", root, rel)
    }
}

/// Strips the vault root from an operator path.
pub fn relative<'a>(vault_path: &str, full: &'a str) -> &'a str {
    let root = vault_path.trim_matches('/');
    let full_trimmed = full.trim_start_matches('/');
    if root.is_empty() {
        return full_trimmed;
    }
    full_trimmed
        .strip_prefix(root)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(full_trimmed)
}

pub async fn ensure_parent_dirs(op: &Operator, path: &str) -> Result<()> {
    let Some((parent, _)) = path.rsplit_once('/') else {
        return Ok(());
    };
    if parent.is_empty() {
        return Ok(());
    }
    let dir = format!("{}/", parent);
    if !op.exists(&dir).await? {
        op.create_dir(&dir).await?;
    }
    Ok(())
}
