//! Diff & backup
//!
//! Before any target file is overwritten, its prior contents are copied into
//! a per-task timestamped directory under the backup root, together with a
//! unified diff of the change. Backups are append-only.

use std::path::{Path, PathBuf};

use chrono::Local;
use similar::TextDiff;
use tracing::debug;

use crate::error::EngineResult;
use knowstore::FileStore;

/// Unified diff with 3 lines of context
pub fn unified_diff(old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .to_string()
}

/// Writes backups and diffs for one task run
///
/// The timestamp directory is fixed at construction: one per task, shared by
/// every file the task touches.
#[derive(Debug, Clone)]
pub struct BackupWriter {
    store: FileStore,
    dir: PathBuf,
}

impl BackupWriter {
    /// Backup writer stamped with the current local time
    pub fn new(store: FileStore, backup_root: &Path) -> Self {
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        Self::with_stamp(store, backup_root, &stamp)
    }

    /// Backup writer with an explicit stamp (used by tests)
    pub fn with_stamp(store: FileStore, backup_root: &Path, stamp: &str) -> Self {
        Self {
            store,
            dir: backup_root.join(stamp),
        }
    }

    /// The timestamped directory receiving this task's backups
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy prior file contents to `<dir>/<rel>`
    pub fn backup_file(&self, rel: &Path, prior: &str) -> EngineResult<PathBuf> {
        let target = self.dir.join(rel);
        self.store.write(&target, prior)?;
        debug!(backup = %target.display(), "backed up prior contents");
        Ok(target)
    }

    /// Write the change's unified diff to `<dir>/<rel>.diff`
    pub fn write_diff(&self, rel: &Path, diff: &str) -> EngineResult<PathBuf> {
        let mut name = rel.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".diff");
        let target = self.dir.join(rel).with_file_name(name);
        self.store.write(&target, diff)?;
        Ok(target)
    }
}
