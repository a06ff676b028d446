//! knowstore - root-confined file access and prompt knowledge assembly
//!
//! Every file operation in the daemon goes through this crate: paths are
//! resolved against an ordered set of root directories and rejected when they
//! escape it, reads are guarded against binary and oversized files, and
//! include specifications expand into a deterministic, budgeted knowledge
//! blob for LLM prompts.

pub mod error;
pub mod include;
pub mod roots;
pub mod store;

pub use error::StoreError;
pub use include::{IncludeResolver, IncludeSpec, KnowledgeBlob, estimate_tokens};
pub use roots::{Resolved, RootSet};
pub use store::{FileStore, SearchMatch};

/// Result alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Files larger than this are refused by [`FileStore::read`]
pub const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// How many leading bytes are sniffed for NUL when detecting binaries
pub const BINARY_SNIFF_BYTES: usize = 8192;

/// Directory basenames skipped by enumeration unless overridden
///
/// `.todod` holds the daemon's own backups and must never feed back into
/// resolution or watching.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    "target",
    "node_modules",
    ".git",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    ".todod",
];
