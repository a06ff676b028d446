//! Todo watcher and write-ignore reentrancy guard
//!
//! A single poll loop tracks every `todo.md` under the roots by mtime. The
//! engine records a write-ignore entry for each of its own writes; when the
//! watcher observes an mtime equal to a recorded entry it consumes the entry
//! and swallows the event, so engine writes never re-trigger the engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use knowstore::RootSet;

/// Watcher tuning
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How often tracked files are polled
    pub poll_interval: Duration,

    /// Basename of tracked task files
    pub todo_name: String,

    /// Directory names skipped while discovering todo files
    pub exclude_dirs: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            todo_name: "todo.md".to_string(),
            exclude_dirs: knowstore::DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Short-lived `(path, mtime)` records distinguishing engine writes from
/// human edits
#[derive(Debug, Clone)]
pub struct WriteIgnoreMap {
    inner: Arc<Mutex<HashMap<PathBuf, Vec<(SystemTime, Instant)>>>>,
    ttl: Duration,
}

impl Default for WriteIgnoreMap {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl WriteIgnoreMap {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Record an engine write keyed by the observed post-write mtime
    pub fn record(&self, path: &Path, mtime: SystemTime) {
        let mut map = self.inner.lock().expect("write-ignore lock");
        map.entry(path.to_path_buf())
            .or_default()
            .push((mtime, Instant::now()));
    }

    /// Match and discard an entry for `(path, mtime)`
    ///
    /// Expired entries are purged as a side effect. Returns true when the
    /// observed mtime was an engine write.
    pub fn consume(&self, path: &Path, mtime: SystemTime) -> bool {
        let mut map = self.inner.lock().expect("write-ignore lock");
        let Some(entries) = map.get_mut(path) else {
            return false;
        };

        entries.retain(|(_, recorded)| recorded.elapsed() < self.ttl);

        let hit = entries.iter().position(|(m, _)| *m == mtime);
        if let Some(idx) = hit {
            entries.remove(idx);
        }
        if entries.is_empty() {
            map.remove(path);
        }
        hit.is_some()
    }
}

/// Poll-based watcher over every `todo.md` under the roots
pub struct TodoWatcher {
    config: WatcherConfig,
    roots: Arc<RwLock<RootSet>>,
    write_ignore: WriteIgnoreMap,
    events_tx: mpsc::UnboundedSender<PathBuf>,
    last_mtime: HashMap<PathBuf, SystemTime>,
}

impl TodoWatcher {
    pub fn new(
        config: WatcherConfig,
        roots: Arc<RwLock<RootSet>>,
        write_ignore: WriteIgnoreMap,
        events_tx: mpsc::UnboundedSender<PathBuf>,
    ) -> Self {
        Self {
            config,
            roots,
            write_ignore,
            events_tx,
            last_mtime: HashMap::new(),
        }
    }

    /// Run the poll loop until the event channel closes
    pub async fn run(mut self) {
        info!(
            interval_s = self.config.poll_interval.as_secs(),
            todo_name = %self.config.todo_name,
            "TodoWatcher started"
        );

        loop {
            self.check_once().await;
            if self.events_tx.is_closed() {
                debug!("event channel closed, watcher stopping");
                return;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One poll iteration; returns the paths that produced events
    pub async fn check_once(&mut self) -> Vec<PathBuf> {
        let tracked = self.discover().await;
        let mut changed = Vec::new();

        for path in tracked {
            let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to stat todo file");
                    continue;
                }
            };

            match self.last_mtime.get(&path) {
                None => {
                    // First sighting establishes the baseline, no event
                    self.last_mtime.insert(path.clone(), mtime);
                }
                Some(last) if *last == mtime => {}
                Some(_) => {
                    self.last_mtime.insert(path.clone(), mtime);
                    if self.write_ignore.consume(&path, mtime) {
                        debug!(path = %path.display(), "swallowed engine write");
                        continue;
                    }
                    debug!(path = %path.display(), "todo changed");
                    let _ = self.events_tx.send(path.clone());
                    changed.push(path);
                }
            }
        }

        changed
    }

    /// Every `todo.md` currently under the roots
    async fn discover(&self) -> Vec<PathBuf> {
        let roots = self.roots.read().await;
        let mut found = Vec::new();
        for root in roots.roots() {
            match roots.enumerate(root, true, &self.config.exclude_dirs) {
                Ok(paths) => {
                    found.extend(paths.into_iter().filter(|p| {
                        p.file_name()
                            .and_then(|n| n.to_str())
                            .map(|n| n.eq_ignore_ascii_case(&self.config.todo_name))
                            .unwrap_or(false)
                    }));
                }
                Err(e) => warn!(root = %root.display(), error = %e, "failed to enumerate root"),
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_until_mtime_changes(path: &Path, content: &str) -> SystemTime {
        let before = fs::metadata(path).and_then(|m| m.modified()).ok();
        loop {
            fs::write(path, content).unwrap();
            let now = fs::metadata(path).unwrap().modified().unwrap();
            if Some(now) != before {
                return now;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn watcher(dir: &Path) -> (TodoWatcher, mpsc::UnboundedReceiver<PathBuf>, WriteIgnoreMap) {
        let roots = Arc::new(RwLock::new(RootSet::new(vec![dir.to_path_buf()]).unwrap()));
        let ignore = WriteIgnoreMap::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = TodoWatcher::new(WatcherConfig::default(), roots, ignore.clone(), tx);
        (watcher, rx, ignore)
    }

    #[tokio::test]
    async fn test_first_sighting_is_silent() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("todo.md"), "- [ ][ ][ ] Task\n").unwrap();
        let (mut watcher, mut rx, _) = watcher(temp.path());

        let changed = watcher.check_once().await;
        assert!(changed.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_human_edit_emits_one_event() {
        let temp = tempdir().unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Task\n").unwrap();
        let (mut watcher, mut rx, _) = watcher(temp.path());

        watcher.check_once().await;
        write_until_mtime_changes(&todo, "- [ ][ ][ ] Task edited\n");

        let changed = watcher.check_once().await;
        assert_eq!(changed.len(), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        // No further events while the file stays still
        assert!(watcher.check_once().await.is_empty());
    }

    #[tokio::test]
    async fn test_engine_write_is_swallowed() {
        let temp = tempdir().unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Task\n").unwrap();
        let (mut watcher, mut rx, ignore) = watcher(temp.path());

        watcher.check_once().await;

        // Engine-style write: record the post-write mtime before the poll
        let mtime = write_until_mtime_changes(&todo, "- [~][ ][ ] Task | knowledge: 1\n");
        ignore.record(&todo, mtime);

        let changed = watcher.check_once().await;
        assert!(changed.is_empty());
        assert!(rx.try_recv().is_err());

        // Entry is consumed: a later human edit with a new mtime fires
        write_until_mtime_changes(&todo, "- [ ][ ][ ] Task again\n");
        assert_eq!(watcher.check_once().await.len(), 1);
    }

    #[test]
    fn test_ignore_entries_expire() {
        let map = WriteIgnoreMap::new(Duration::from_millis(10));
        let mtime = SystemTime::now();
        map.record(Path::new("/t/todo.md"), mtime);

        std::thread::sleep(Duration::from_millis(20));
        assert!(!map.consume(Path::new("/t/todo.md"), mtime));
    }

    #[test]
    fn test_ignore_entry_single_use() {
        let map = WriteIgnoreMap::default();
        let mtime = SystemTime::now();
        map.record(Path::new("/t/todo.md"), mtime);

        assert!(map.consume(Path::new("/t/todo.md"), mtime));
        assert!(!map.consume(Path::new("/t/todo.md"), mtime));
    }
}
