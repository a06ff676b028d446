//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during root-confined file operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Path {path} is outside every configured root")]
    OutOfRoots { path: PathBuf },

    #[error("Name '{name}' matches {} files", candidates.len())]
    Ambiguous { name: String, candidates: Vec<PathBuf> },

    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("File appears to be binary: {path}")]
    Binary { path: PathBuf },

    #[error("File too large: {path} is {size} bytes (cap {cap})")]
    TooLarge { path: PathBuf, size: u64, cap: u64 },

    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Short machine tag for wire responses
    pub fn tag(&self) -> &'static str {
        match self {
            StoreError::OutOfRoots { .. } => "OutOfRoots",
            StoreError::Ambiguous { .. } => "Ambiguous",
            StoreError::NotFound { .. } => "NotFound",
            StoreError::Binary { .. } | StoreError::TooLarge { .. } => "BinaryOrTooLarge",
            StoreError::Pattern { .. } => "ParseError",
            StoreError::Io(_) => "IO",
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        let err = StoreError::OutOfRoots {
            path: PathBuf::from("/etc/passwd"),
        };
        assert_eq!(err.tag(), "OutOfRoots");

        let err = StoreError::Ambiguous {
            name: "x.py".to_string(),
            candidates: vec![PathBuf::from("/a/x.py"), PathBuf::from("/b/x.py")],
        };
        assert_eq!(err.tag(), "Ambiguous");
        assert!(err.to_string().contains("2 files"));

        let err = StoreError::TooLarge {
            path: PathBuf::from("big.bin"),
            size: 10,
            cap: 5,
        };
        assert_eq!(err.tag(), "BinaryOrTooLarge");
    }

    #[test]
    fn test_only_io_is_retryable() {
        assert!(StoreError::Io(std::io::Error::other("disk")).is_retryable());
        assert!(
            !StoreError::NotFound {
                path: PathBuf::from("x")
            }
            .is_retryable()
        );
    }
}
