use serde::Serialize;

/// Typed failures surfaced at the engine boundary.
///
/// Evaluation never produces these: resolvers fall back to `undefined` and
/// unrecognized filters become warnings. Only planning, persistence and
/// upserts report an `EngineError`.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("mtime conflict on {path}: expected {expected}, actual {actual}")]
    MtimeConflict {
        path: String,
        expected: i64,
        actual: i64,
    },

    #[error("write failed: {0}")]
    Write(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::MtimeConflict { .. } => "mtime_conflict",
            EngineError::Write(_) => "write_error",
            EngineError::Other(_) => "internal_error",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable `{code, message}` pair used in responses.
#[derive(Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
