use crate::error::{EngineError, EngineResult};
use crate::storage;
use anyhow::Context;
use opendal::Operator;
use serde::{Deserialize, Serialize};

/// Engine-private area inside a vault. Never enumerated as notes.
pub const CONFIG_DIR: &str = ".notebase";

const SETTINGS_FILE: &str = "settings.json";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Serve evaluated queries from snapshots instead of the fallback path.
    pub live_engine: bool,
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_page: usize,
    pub max_warnings: usize,
    pub embedding_provider: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            live_engine: false,
            default_limit: 20,
            max_limit: 500,
            max_page: 1_000_000,
            max_warnings: 200,
            embedding_provider: None,
        }
    }
}

fn settings_path(vault_path: &str) -> String {
    storage::join(vault_path, &format!("{}/{}", CONFIG_DIR, SETTINGS_FILE))
}

pub async fn load_config(op: &Operator, vault_path: &str) -> EngineResult<EngineConfig> {
    let path = settings_path(vault_path);
    if !op
        .exists(&path)
        .await
        .context("failed to check engine settings")?
    {
        return Ok(EngineConfig::default());
    }
    let bytes = op
        .read(&path)
        .await
        .context("failed to read engine settings")?;
    serde_json::from_slice(&bytes.to_vec())
        .map_err(|e| EngineError::Validation(format!("invalid {}: {}", SETTINGS_FILE, e)))
}

pub async fn save_config(
    op: &Operator,
    vault_path: &str,
    config: &EngineConfig,
) -> EngineResult<()> {
    let path = settings_path(vault_path);
    storage::ensure_parent_dirs(op, &path).await?;
    let body = serde_json::to_vec_pretty(config).context("failed to encode engine settings")?;
    op.write(&path, body)
        .await
        .map_err(|e| EngineError::Write(e.to_string()))?;
    Ok(())
}
