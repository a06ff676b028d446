//! Engine error taxonomy
//!
//! One enum covers every failure the engine distinguishes; `kind()` is the
//! short machine tag carried on wire responses and summary lines.

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::LlmError;
use knowstore::StoreError;

/// Result alias for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors the engine distinguishes
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Path {path} is outside every configured root")]
    OutOfRoots { path: PathBuf },

    #[error("Name '{name}' matches multiple files")]
    Ambiguous { name: String },

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("Binary or oversized file: {0}")]
    BinaryOrTooLarge(PathBuf),

    #[error("Malformed todo file: {0}")]
    Parse(String),

    #[error("LLM output contained no file sections")]
    EmptyOutput,

    #[error("Smart merge hunk {hunk} best similarity {best:.2} below threshold")]
    LowSimilarity { hunk: usize, best: f64 },

    #[error("Merged file failed validation: {0}")]
    Validation(String),

    #[error("LLM transient failure: {0}")]
    LlmTransient(String),

    #[error("LLM fatal failure: {0}")]
    LlmFatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unknown operation: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Short machine tag used in wire responses and summary `error:` stamps
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::OutOfRoots { .. } => "OutOfRoots",
            EngineError::Ambiguous { .. } => "Ambiguous",
            EngineError::NotFound(_) => "NotFound",
            EngineError::BinaryOrTooLarge(_) => "BinaryOrTooLarge",
            EngineError::Parse(_) => "ParseError",
            EngineError::EmptyOutput => "EmptyOutput",
            EngineError::LowSimilarity { .. } => "LowSimilarity",
            EngineError::Validation(_) => "Validation",
            EngineError::LlmTransient(_) => "LLMTransient",
            EngineError::LlmFatal(_) => "LLMFatal",
            EngineError::Io(_) => "IO",
            EngineError::Unauthorized => "Unauthorized",
            EngineError::Unknown(_) => "Unknown",
        }
    }

    /// Whether the retry loop may attempt this error again
    ///
    /// `LowSimilarity` is only retryable on the first attempt; the engine
    /// enforces that on top of this check.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::LlmTransient(_) | EngineError::Io(_) | EngineError::LowSimilarity { .. }
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OutOfRoots { path } => EngineError::OutOfRoots { path },
            StoreError::Ambiguous { name, .. } => EngineError::Ambiguous { name },
            StoreError::NotFound { path } => EngineError::NotFound(path),
            StoreError::Binary { path } => EngineError::BinaryOrTooLarge(path),
            StoreError::TooLarge { path, .. } => EngineError::BinaryOrTooLarge(path),
            StoreError::Pattern { pattern, message } => EngineError::Parse(format!("{}: {}", pattern, message)),
            StoreError::Io(e) => EngineError::Io(e),
        }
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        if err.is_retryable() {
            EngineError::LlmTransient(err.to_string())
        } else {
            EngineError::LlmFatal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_match_wire_tags() {
        assert_eq!(EngineError::EmptyOutput.kind(), "EmptyOutput");
        assert_eq!(EngineError::Unauthorized.kind(), "Unauthorized");
        assert_eq!(
            EngineError::LowSimilarity { hunk: 0, best: 0.5 }.kind(),
            "LowSimilarity"
        );
        assert_eq!(EngineError::LlmTransient("timeout".into()).kind(), "LLMTransient");
    }

    #[test]
    fn test_retryability() {
        assert!(EngineError::LlmTransient("disconnect".into()).is_retryable());
        assert!(EngineError::LowSimilarity { hunk: 1, best: 0.6 }.is_retryable());
        assert!(!EngineError::EmptyOutput.is_retryable());
        assert!(!EngineError::Validation("unbalanced".into()).is_retryable());
        assert!(
            !EngineError::Ambiguous {
                name: "x.py".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let err: EngineError = StoreError::Binary {
            path: PathBuf::from("a.bin"),
        }
        .into();
        assert_eq!(err.kind(), "BinaryOrTooLarge");

        let err: EngineError = StoreError::OutOfRoots {
            path: PathBuf::from("/etc"),
        }
        .into();
        assert_eq!(err.kind(), "OutOfRoots");
    }
}
