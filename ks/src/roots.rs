//! Root set and path resolution
//!
//! Every path the daemon touches resolves through a [`RootSet`]: an ordered
//! list of absolute directories that bound all file operations. Resolution
//! accepts absolute paths under a root, joins relative paths against a base
//! directory, and fuzzy-matches bare filenames case-insensitively across all
//! roots.

use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::{Result, StoreError};

/// A resolved path: the raw form as supplied plus the confined absolute form
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Path text as supplied by the caller
    pub raw: String,

    /// Absolute path inside a root
    pub path: PathBuf,

    /// True when no file exists yet at `path`
    pub new_file: bool,
}

/// Ordered set of absolute directories bounding every file operation
#[derive(Debug, Clone)]
pub struct RootSet {
    roots: Vec<PathBuf>,
}

impl RootSet {
    /// Build a root set from directory paths
    ///
    /// Each root must exist; roots are canonicalized so confinement checks
    /// see through symlinks.
    pub fn new(roots: Vec<PathBuf>) -> Result<Self> {
        if roots.is_empty() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "at least one root directory is required",
            )));
        }

        let mut canonical = Vec::with_capacity(roots.len());
        for root in roots {
            if !root.is_dir() {
                return Err(StoreError::NotFound { path: root });
            }
            canonical.push(root.canonicalize()?);
        }

        debug!(?canonical, "RootSet created");
        Ok(Self { roots: canonical })
    }

    /// The configured roots, in order
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// The first root, used as the default placement for new files
    pub fn first(&self) -> &Path {
        &self.roots[0]
    }

    /// Whether `path` lies under any root
    pub fn contains(&self, path: &Path) -> bool {
        let normalized = self.normalize(path);
        self.roots.iter().any(|r| normalized.starts_with(r))
    }

    /// Normalize `path` and reject it unless it lies under a root
    pub fn confine(&self, path: &Path) -> Result<PathBuf> {
        let normalized = self.normalize(path);
        if self.roots.iter().any(|r| normalized.starts_with(r)) {
            Ok(normalized)
        } else {
            Err(StoreError::OutOfRoots {
                path: path.to_path_buf(),
            })
        }
    }

    /// Resolve a raw path against a base directory
    ///
    /// Resolution order: absolute paths are confined directly; relative paths
    /// with a directory separator join against `base_dir`; bare names search
    /// all roots for a unique case-insensitive basename match. A bare name
    /// with no match resolves to a new file under `base_dir` (or the first
    /// root when `base_dir` escapes the roots).
    pub fn resolve(&self, raw: &str, base_dir: &Path) -> Result<Resolved> {
        let trimmed = raw.trim();
        let p = Path::new(trimmed);

        if p.is_absolute() {
            let path = self.confine(p)?;
            let new_file = !path.exists();
            return Ok(Resolved {
                raw: raw.to_string(),
                path,
                new_file,
            });
        }

        if trimmed.contains(std::path::MAIN_SEPARATOR) || trimmed.contains('/') {
            let path = self.confine(&base_dir.join(p))?;
            let new_file = !path.exists();
            return Ok(Resolved {
                raw: raw.to_string(),
                path,
                new_file,
            });
        }

        // Bare filename: case-insensitive search across all roots
        let needle = trimmed.to_lowercase();
        let mut candidates = Vec::new();
        for root in &self.roots {
            for path in self.enumerate(root, true, &default_excludes())? {
                let matches = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.to_lowercase() == needle)
                    .unwrap_or(false);
                if matches {
                    candidates.push(path);
                }
            }
        }

        match candidates.len() {
            1 => Ok(Resolved {
                raw: raw.to_string(),
                path: candidates.remove(0),
                new_file: false,
            }),
            0 => {
                let parent = if self.contains(base_dir) {
                    base_dir.to_path_buf()
                } else {
                    self.first().to_path_buf()
                };
                let path = self.confine(&parent.join(trimmed))?;
                Ok(Resolved {
                    raw: raw.to_string(),
                    path,
                    new_file: true,
                })
            }
            _ => Err(StoreError::Ambiguous {
                name: trimmed.to_string(),
                candidates,
            }),
        }
    }

    /// Enumerate files under `root`, skipping excluded directory names
    ///
    /// Returns absolute paths in a deterministic (lexicographic) order.
    pub fn enumerate(&self, root: &Path, recursive: bool, exclude: &[String]) -> Result<Vec<PathBuf>> {
        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        let walker = WalkDir::new(root)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() {
                    return true;
                }
                entry
                    .file_name()
                    .to_str()
                    .map(|name| !exclude.iter().any(|ex| ex == name))
                    .unwrap_or(true)
            });

        for entry in walker {
            let entry = entry.map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    /// Express `path` relative to the root that contains it
    pub fn relative_to_nearest_root(&self, path: &Path) -> PathBuf {
        for root in &self.roots {
            if let Ok(rel) = path.strip_prefix(root) {
                return rel.to_path_buf();
            }
        }
        path.to_path_buf()
    }

    /// Resolve symlinks for existing prefixes and collapse `.`/`..` lexically
    /// for the rest, so non-existent targets still normalize.
    fn normalize(&self, path: &Path) -> PathBuf {
        let lexical = lexical_normalize(path);
        if lexical.exists() {
            return lexical.canonicalize().unwrap_or(lexical);
        }

        // Canonicalize the nearest existing ancestor, then re-append the tail
        let mut ancestor = lexical.clone();
        let mut tail = Vec::new();
        while !ancestor.exists() {
            match (ancestor.parent(), ancestor.file_name()) {
                (Some(parent), Some(name)) => {
                    tail.push(name.to_os_string());
                    ancestor = parent.to_path_buf();
                }
                _ => return lexical,
            }
        }

        let mut out = ancestor.canonicalize().unwrap_or(ancestor);
        for name in tail.into_iter().rev() {
            out.push(name);
        }
        out
    }
}

fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn default_excludes() -> Vec<String> {
    crate::DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn root_set(dir: &Path) -> RootSet {
        RootSet::new(vec![dir.to_path_buf()]).unwrap()
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let result = RootSet::new(vec![PathBuf::from("/no/such/dir/anywhere")]);
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_new_rejects_empty() {
        assert!(RootSet::new(vec![]).is_err());
    }

    #[test]
    fn test_resolve_absolute_inside_root() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), "x").unwrap();
        let roots = root_set(temp.path());

        let resolved = roots
            .resolve(temp.path().join("a.txt").to_str().unwrap(), temp.path())
            .unwrap();
        assert!(!resolved.new_file);
        assert_eq!(resolved.path.file_name().unwrap(), "a.txt");
    }

    #[test]
    fn test_resolve_absolute_outside_root() {
        let temp = tempdir().unwrap();
        let roots = root_set(temp.path());

        let result = roots.resolve("/etc/passwd", temp.path());
        assert!(matches!(result, Err(StoreError::OutOfRoots { .. })));
    }

    #[test]
    fn test_resolve_relative_with_separator() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/b.txt"), "x").unwrap();
        let roots = root_set(temp.path());

        let resolved = roots.resolve("sub/b.txt", temp.path()).unwrap();
        assert!(!resolved.new_file);
        assert!(resolved.path.ends_with("sub/b.txt"));
    }

    #[test]
    fn test_resolve_relative_escaping_root() {
        let temp = tempdir().unwrap();
        let roots = root_set(temp.path());

        let result = roots.resolve("../../etc/passwd", temp.path());
        assert!(matches!(result, Err(StoreError::OutOfRoots { .. })));
    }

    #[test]
    fn test_resolve_bare_unique_case_insensitive() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("deep")).unwrap();
        fs::write(temp.path().join("deep/Main.PY"), "x").unwrap();
        let roots = root_set(temp.path());

        let resolved = roots.resolve("main.py", temp.path()).unwrap();
        assert!(!resolved.new_file);
        // On-disk case is preserved
        assert_eq!(resolved.path.file_name().unwrap(), "Main.PY");
    }

    #[test]
    fn test_resolve_bare_ambiguous() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("a")).unwrap();
        fs::create_dir(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("a/x.py"), "1").unwrap();
        fs::write(temp.path().join("b/x.py"), "2").unwrap();
        let roots = root_set(temp.path());

        let result = roots.resolve("x.py", temp.path());
        match result {
            Err(StoreError::Ambiguous { name, candidates }) => {
                assert_eq!(name, "x.py");
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("Expected Ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_bare_no_match_is_new_file_under_base() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("proj")).unwrap();
        let roots = root_set(temp.path());

        let resolved = roots.resolve("hello.txt", &temp.path().join("proj")).unwrap();
        assert!(resolved.new_file);
        assert!(resolved.path.ends_with("proj/hello.txt"));
    }

    #[test]
    fn test_enumerate_skips_excluded_dirs() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("src")).unwrap();
        fs::create_dir(temp.path().join("target")).unwrap();
        fs::write(temp.path().join("src/lib.rs"), "x").unwrap();
        fs::write(temp.path().join("target/out.rs"), "x").unwrap();
        let roots = root_set(temp.path());

        let files = roots
            .enumerate(roots.first(), true, &["target".to_string()])
            .unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/lib.rs"));
    }

    #[test]
    fn test_enumerate_non_recursive() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("top.txt"), "x").unwrap();
        fs::write(temp.path().join("sub/deep.txt"), "x").unwrap();
        let roots = root_set(temp.path());

        let files = roots.enumerate(roots.first(), false, &[]).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("top.txt"));
    }

    #[test]
    fn test_relative_to_nearest_root() {
        let temp = tempdir().unwrap();
        fs::create_dir(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src/a.rs"), "x").unwrap();
        let roots = root_set(temp.path());

        let abs = roots.resolve("src/a.rs", temp.path()).unwrap().path;
        assert_eq!(roots.relative_to_nearest_root(&abs), PathBuf::from("src/a.rs"));
    }
}
