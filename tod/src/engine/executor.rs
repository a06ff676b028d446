//! Engine executor - strict FIFO serialization of task runs
//!
//! Concurrent `TODO` requests enqueue onto an unbounded channel drained by a
//! single actor task, so no two task runs ever execute concurrently. The
//! handle also owns the per-path write locks shared with the dispatch
//! layer's file operations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::{RunOutcome, TaskEngine};
use crate::error::{EngineError, EngineResult};

/// A lock per absolute path, protecting each write sequence
#[derive(Debug, Clone, Default)]
pub struct PathLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    /// Acquire the lock for a path, creating it on first use
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

enum EngineCommand {
    Run {
        todo: Option<PathBuf>,
        reply: oneshot::Sender<EngineResult<RunOutcome>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Spawns the single actor that owns all task-engine runs
pub struct EngineExecutor;

impl EngineExecutor {
    pub fn spawn(engine: Arc<TaskEngine>) -> ExecutorHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<EngineCommand>();

        let join = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    EngineCommand::Run { todo, reply } => {
                        debug!(?todo, "executor: task run dequeued");
                        let result = engine.run_next(todo).await;
                        let _ = reply.send(result);
                    }
                    EngineCommand::Shutdown { reply } => {
                        info!("executor: shutdown");
                        let _ = reply.send(());
                        break;
                    }
                }
            }
        });

        ExecutorHandle {
            tx,
            shutting_down: Arc::new(AtomicBool::new(false)),
            join: Arc::new(std::sync::Mutex::new(Some(join))),
        }
    }
}

/// Handle for enqueueing task runs; clone freely
#[derive(Clone)]
pub struct ExecutorHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
    shutting_down: Arc<AtomicBool>,
    join: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl ExecutorHandle {
    /// Enqueue a run and await its result; FIFO across callers
    pub async fn run_next(&self, todo: Option<PathBuf>) -> EngineResult<RunOutcome> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineError::Unknown("engine is shutting down".to_string()));
        }

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::Run { todo, reply })
            .map_err(|_| EngineError::Unknown("engine executor stopped".to_string()))?;
        rx.await
            .map_err(|_| EngineError::Unknown("engine executor stopped".to_string()))?
    }

    /// Stop accepting work, wait up to `grace` for the queue to drain, then
    /// abort the actor
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineCommand::Shutdown { reply }).is_err() {
            return;
        }

        if tokio::time::timeout(grace, rx).await.is_err() {
            warn!("executor did not drain within grace period, aborting");
            if let Some(handle) = self.join.lock().expect("join lock").take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_path_locks_serialize_writers() {
        let locks = PathLocks::default();
        let path = Path::new("/some/file.txt");

        let guard = locks.lock(path).await;

        // A second lock on the same path must wait
        let locks2 = locks.clone();
        let pending = tokio::spawn(async move {
            let _g = locks2.lock(Path::new("/some/file.txt")).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("second lock acquired after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_path_locks_distinct_paths_independent() {
        let locks = PathLocks::default();
        let _a = locks.lock(Path::new("/a")).await;
        // Must not block
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Path::new("/b")))
            .await
            .expect("different path does not contend");
    }
}
