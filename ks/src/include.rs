//! Include specification parsing and knowledge blob assembly
//!
//! An include spec is the small DSL tasks use to pull file context into a
//! prompt (`all`, `file=...`, `pattern=a|b recursive`, `dir=... pattern=...`).
//! Resolution expands the spec into a deterministic ordered path set, reads
//! each file through the store, and concatenates header-prefixed records into
//! a single token-budgeted blob.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{FileStore, Result, RootSet, StoreError};

/// Estimate tokens from a byte count: 4 bytes per token, rounded up
pub fn estimate_tokens(bytes: usize) -> usize {
    bytes.div_ceil(4)
}

/// A parsed include specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeSpec {
    /// Every file under every root, subject to exclusions
    All,

    /// One file name or glob, non-recursive
    File { pattern: String },

    /// Pipe-separated globs, optionally recursive
    Patterns { globs: Vec<String>, recursive: bool },

    /// A directory scope with an optional glob
    Dir {
        dir: String,
        pattern: Option<String>,
        recursive: bool,
    },
}

impl IncludeSpec {
    /// Parse the text after `include:` into a spec
    ///
    /// Accepted forms: `all`, `file=<name>`, `pattern=<g>[|<g>]...`,
    /// `dir=<path> [pattern=<g>]`, each optionally followed by `recursive`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut kind: Option<IncludeSpec> = None;
        let mut recursive = false;

        for token in text.split_whitespace() {
            match token.split_once('=') {
                Some(("file", value)) => {
                    kind = Some(IncludeSpec::File {
                        pattern: value.to_string(),
                    });
                }
                Some(("pattern", value)) => {
                    let globs: Vec<String> = value.split('|').map(|g| g.trim().to_string()).collect();
                    match kind {
                        Some(IncludeSpec::Dir { dir, .. }) => {
                            kind = Some(IncludeSpec::Dir {
                                dir,
                                pattern: globs.first().cloned(),
                                recursive: false,
                            });
                        }
                        _ => {
                            kind = Some(IncludeSpec::Patterns { globs, recursive: false });
                        }
                    }
                }
                Some(("dir", value)) => {
                    kind = Some(IncludeSpec::Dir {
                        dir: value.to_string(),
                        pattern: None,
                        recursive: false,
                    });
                }
                None if token.eq_ignore_ascii_case("all") => {
                    kind = Some(IncludeSpec::All);
                }
                None if token.eq_ignore_ascii_case("recursive") => {
                    recursive = true;
                }
                _ => {
                    return Err(StoreError::Pattern {
                        pattern: text.to_string(),
                        message: format!("unrecognized include token '{}'", token),
                    });
                }
            }
        }

        let mut spec = kind.ok_or_else(|| StoreError::Pattern {
            pattern: text.to_string(),
            message: "empty include specification".to_string(),
        })?;

        if recursive {
            spec = match spec {
                IncludeSpec::Patterns { globs, .. } => IncludeSpec::Patterns { globs, recursive: true },
                IncludeSpec::Dir { dir, pattern, .. } => IncludeSpec::Dir {
                    dir,
                    pattern,
                    recursive: true,
                },
                // A recursive file spec is just a single recursive glob
                IncludeSpec::File { pattern } => IncludeSpec::Patterns {
                    globs: vec![pattern],
                    recursive: true,
                },
                IncludeSpec::All => IncludeSpec::All,
            };
        }

        Ok(spec)
    }
}

/// The assembled prompt context
#[derive(Debug, Clone)]
pub struct KnowledgeBlob {
    /// Concatenated, header-separated file contents
    pub text: String,

    /// Files included, in blob order
    pub files: Vec<PathBuf>,

    /// Files dropped from the tail to fit the token budget
    pub dropped: Vec<PathBuf>,

    /// Total bytes of `text`
    pub bytes: usize,

    /// Estimated tokens of `text`
    pub tokens: usize,
}

impl KnowledgeBlob {
    /// An empty blob, used when a task has no include spec
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            files: Vec::new(),
            dropped: Vec::new(),
            bytes: 0,
            tokens: 0,
        }
    }
}

/// Expands include specs into path sets and budgeted knowledge blobs
pub struct IncludeResolver<'a> {
    roots: &'a RootSet,
    store: &'a FileStore,
    exclude: Vec<String>,
    token_budget: usize,
}

impl<'a> IncludeResolver<'a> {
    pub fn new(roots: &'a RootSet, store: &'a FileStore, exclude: Vec<String>, token_budget: usize) -> Self {
        Self {
            roots,
            store,
            exclude,
            token_budget,
        }
    }

    /// Expand a spec into a deterministic, deduplicated sequence of files
    ///
    /// Multi-glob specs keep glob order: all matches of the first glob in
    /// lexicographic order, then the second, with later duplicates dropped.
    pub fn expand(&self, spec: &IncludeSpec) -> Result<Vec<PathBuf>> {
        let raw = match spec {
            IncludeSpec::All => {
                let mut paths = Vec::new();
                for root in self.roots.roots() {
                    paths.extend(self.roots.enumerate(root, true, &self.exclude)?);
                }
                paths
            }
            IncludeSpec::File { pattern } => self.glob_roots(pattern, false)?,
            IncludeSpec::Patterns { globs, recursive } => {
                let mut paths = Vec::new();
                for g in globs {
                    paths.extend(self.glob_roots(g, *recursive)?);
                }
                paths
            }
            IncludeSpec::Dir {
                dir,
                pattern,
                recursive,
            } => {
                let pattern = pattern.as_deref().unwrap_or("*");
                let mut paths = Vec::new();
                for base in self.dir_candidates(dir) {
                    paths.extend(self.glob_dir(&base, pattern, *recursive)?);
                }
                paths
            }
        };

        // Suppress later duplicates, keep first-occurrence order
        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for path in raw {
            if self.is_excluded(&path) || !self.roots.contains(&path) {
                continue;
            }
            if seen.insert(path.clone()) {
                unique.push(path);
            }
        }

        debug!(count = unique.len(), "include spec expanded");
        Ok(unique)
    }

    /// Expand, read, and concatenate a spec into a budgeted blob
    pub fn resolve(&self, spec: &IncludeSpec) -> Result<KnowledgeBlob> {
        let paths = self.expand(spec)?;

        let mut records = Vec::new();
        for path in paths {
            let content = match self.store.read(&path) {
                Ok(c) => c,
                Err(StoreError::Binary { .. }) | Err(StoreError::TooLarge { .. }) => {
                    warn!(path = %path.display(), "skipping unreadable include file");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let rel = self.roots.relative_to_nearest_root(&path);
            let record = format!("=== {} ===\n{}", rel.display(), content);
            records.push((path, record));
        }

        // Drop from the tail until the estimate fits the budget
        let mut dropped = Vec::new();
        loop {
            let bytes: usize = blob_len(&records);
            if estimate_tokens(bytes) <= self.token_budget || records.is_empty() {
                break;
            }
            let (path, _) = records.pop().expect("non-empty");
            warn!(path = %path.display(), "dropping include file to fit token budget");
            dropped.push(path);
        }
        dropped.reverse();

        let text = records
            .iter()
            .map(|(_, record)| record.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let bytes = text.len();

        Ok(KnowledgeBlob {
            tokens: estimate_tokens(bytes),
            bytes,
            files: records.into_iter().map(|(path, _)| path).collect(),
            dropped,
            text,
        })
    }

    fn glob_roots(&self, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for root in self.roots.roots() {
            paths.extend(self.glob_dir(root, pattern, recursive)?);
        }
        Ok(paths)
    }

    fn glob_dir(&self, base: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
        let full = if recursive {
            base.join("**").join(pattern)
        } else {
            base.join(pattern)
        };
        let full = full.to_string_lossy().to_string();

        let walker = glob::glob(&full).map_err(|e| StoreError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;

        // glob yields matches in lexicographic order already
        let mut paths = Vec::new();
        for entry in walker {
            let path = entry.map_err(|e| StoreError::Io(e.into_error()))?;
            if path.is_file() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn dir_candidates(&self, dir: &str) -> Vec<PathBuf> {
        let p = Path::new(dir);
        if p.is_absolute() {
            return vec![p.to_path_buf()];
        }
        self.roots
            .roots()
            .iter()
            .map(|root| root.join(p))
            .filter(|candidate| candidate.is_dir())
            .collect()
    }

    fn is_excluded(&self, path: &Path) -> bool {
        path.components().any(|comp| {
            comp.as_os_str()
                .to_str()
                .map(|segment| self.exclude.iter().any(|ex| ex == segment))
                .unwrap_or(false)
        })
    }
}

fn blob_len(records: &[(PathBuf, String)]) -> usize {
    if records.is_empty() {
        return 0;
    }
    let separators = (records.len() - 1) * 2;
    records.iter().map(|(_, r)| r.len()).sum::<usize>() + separators
}
