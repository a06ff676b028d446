//! Safe file operations
//!
//! All reads sniff for binary content and enforce a size cap; all writes go
//! through a sibling temporary file and rename so a crash never leaves a
//! half-written target.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{BINARY_SNIFF_BYTES, DEFAULT_MAX_FILE_BYTES, Result, StoreError};

/// A single line matched by [`FileStore::search`]
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchMatch {
    /// File the match was found in
    pub path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// The matching line, trimmed of the trailing newline
    pub line: String,
}

/// Guarded filesystem operations
#[derive(Debug, Clone)]
pub struct FileStore {
    max_file_bytes: u64,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILE_BYTES)
    }
}

impl FileStore {
    /// Create a store with a custom size cap for reads
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    /// Read a text file, rejecting binaries and oversized files
    pub fn read(&self, path: &Path) -> Result<String> {
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound {
                path: path.to_path_buf(),
            },
            _ => StoreError::Io(e),
        })?;

        if meta.len() > self.max_file_bytes {
            return Err(StoreError::TooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                cap: self.max_file_bytes,
            });
        }

        let mut file = fs::File::open(path)?;
        let mut sniff = vec![0u8; BINARY_SNIFF_BYTES.min(meta.len() as usize)];
        file.read_exact(&mut sniff)?;
        if sniff.contains(&0) {
            return Err(StoreError::Binary {
                path: path.to_path_buf(),
            });
        }

        let mut rest = Vec::new();
        file.read_to_end(&mut rest)?;
        let mut bytes = sniff;
        bytes.extend_from_slice(&rest);

        String::from_utf8(bytes).map_err(|_| StoreError::Binary {
            path: path.to_path_buf(),
        })
    }

    /// Write a file atomically: sibling temp file, then rename over the target
    pub fn write(&self, path: &Path, text: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = sibling_temp_path(path);
        fs::write(&tmp, text)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::Io(e));
        }

        debug!(path = %path.display(), bytes = text.len(), "wrote file");
        Ok(())
    }

    /// Append text to a file, atomically rewriting the whole file
    pub fn append(&self, path: &Path, text: &str) -> Result<()> {
        let existing = if path.exists() { self.read(path)? } else { String::new() };
        let mut combined = existing;
        combined.push_str(text);
        self.write(path, &combined)
    }

    /// Rename or move a file
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if !from.exists() {
            return Err(StoreError::NotFound {
                path: from.to_path_buf(),
            });
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)?;
        Ok(())
    }

    /// Copy a file
    pub fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        if !from.exists() {
            return Err(StoreError::NotFound {
                path: from.to_path_buf(),
            });
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        Ok(())
    }

    /// Delete a file
    pub fn delete(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }
        fs::remove_file(path)?;
        Ok(())
    }

    /// Create a directory (and any missing parents)
    pub fn create_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)?;
        Ok(())
    }

    /// Delete a directory and its contents
    pub fn delete_dir(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }
        fs::remove_dir_all(path)?;
        Ok(())
    }

    /// SHA-256 hex digest of a file's contents
    pub fn checksum(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Search file contents for a regex pattern
    ///
    /// Binary and oversized files are skipped silently; matching stops once
    /// `max_results` lines have been collected.
    pub fn search(
        &self,
        paths: &[PathBuf],
        pattern: &str,
        case_insensitive: bool,
        max_results: usize,
    ) -> Result<Vec<SearchMatch>> {
        let regex = regex::RegexBuilder::new(pattern)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| StoreError::Pattern {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })?;

        let mut matches = Vec::new();
        for path in paths {
            let content = match self.read(path) {
                Ok(c) => c,
                Err(StoreError::Binary { .. }) | Err(StoreError::TooLarge { .. }) => continue,
                Err(e) => return Err(e),
            };

            for (idx, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(SearchMatch {
                        path: path.clone(),
                        line_number: idx + 1,
                        line: line.to_string(),
                    });
                    if matches.len() >= max_results {
                        return Ok(matches);
                    }
                }
            }
        }

        Ok(matches)
    }
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    let tmp_name = format!(".{}.tmp.{}", name, std::process::id());
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}
