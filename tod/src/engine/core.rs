//! The task engine orchestrator
//!
//! One `run_next` call: select the earliest fully-pending task, resolve its
//! context, stamp it in-progress, call the LLM, parse the reply into edit
//! records, apply each edit with backup and diff discipline, and stamp the
//! terminal state. Attempts wrap steps 4-6 in a bounded retry loop.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::backup::{BackupWriter, unified_diff};
use super::executor::PathLocks;
use super::merge::smart_merge;
use super::output::parse_llm_output;
use super::prompt::{Prompt, build_prompt};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::llm::{ChatRequest, LlmClient, collect_chat};
use crate::task::{BeginMetrics, Task, TaskManager, TaskOutcome, parse_todo_file};
use crate::watcher::WriteIgnoreMap;
use knowstore::{FileStore, IncludeResolver, IncludeSpec, KnowledgeBlob, RootSet, estimate_tokens};

/// Result of one `run_next` call
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// No task had all three flags pending
    NoPending,

    /// A task ran to completion
    Completed {
        task: String,
        files: Vec<PathBuf>,
        backup_dir: PathBuf,
        plan_tokens: usize,
    },
}

/// The orchestrator; all mutable orchestration state lives here
pub struct TaskEngine {
    config: Config,
    roots: Arc<RwLock<RootSet>>,
    store: FileStore,
    manager: TaskManager,
    llm: Arc<dyn LlmClient>,
    path_locks: PathLocks,
}

impl TaskEngine {
    pub fn new(
        config: Config,
        roots: Arc<RwLock<RootSet>>,
        llm: Arc<dyn LlmClient>,
        write_ignore: WriteIgnoreMap,
        path_locks: PathLocks,
    ) -> Self {
        let store = FileStore::new(config.max_file_bytes);
        let manager = TaskManager::new(store.clone(), write_ignore);
        Self {
            config,
            roots,
            store,
            manager,
            llm,
            path_locks,
        }
    }

    /// Run the earliest pending task in the given todo file, or across every
    /// todo file under the roots
    pub async fn run_next(&self, todo: Option<PathBuf>) -> EngineResult<RunOutcome> {
        let roots = self.roots.read().await.clone();

        let task = match &todo {
            Some(path) => {
                let confined = roots.confine(path)?;
                let parsed = parse_todo_file(&confined, &self.store)?;
                parsed.next_runnable().cloned()
            }
            None => self.find_runnable(&roots)?,
        };

        let Some(task) = task else {
            debug!("no pending task");
            return Ok(RunOutcome::NoPending);
        };

        info!(task = %task.clean_desc, file = %task.file.display(), "running task");
        match self.run_task(&roots, &task).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(task = %task.clean_desc, error = %e, kind = e.kind(), "task failed");
                if let Err(mark_err) = self.manager.finish(
                    &task,
                    None,
                    &TaskOutcome::Failed {
                        kind: e.kind().to_string(),
                    },
                ) {
                    warn!(error = %mark_err, "failed to mark task as failed");
                }
                Err(e)
            }
        }
    }

    /// The earliest runnable task across all todo files, in root order
    fn find_runnable(&self, roots: &RootSet) -> EngineResult<Option<Task>> {
        for path in discover_todos(roots, &self.config.exclude_dirs) {
            let parsed = match parse_todo_file(&path, &self.store) {
                Ok(p) => p,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unparseable todo file");
                    continue;
                }
            };
            if let Some(task) = parsed.next_runnable() {
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }

    async fn run_task(&self, roots: &RootSet, task: &Task) -> EngineResult<RunOutcome> {
        // Resolve context before any mutation: failures here leave the
        // bullet line untouched until the failure stamp
        let resolver = IncludeResolver::new(
            roots,
            &self.store,
            self.config.exclude_dirs.clone(),
            self.config.token_budget,
        );
        let knowledge = match &task.include_spec {
            Some(spec) => resolver.resolve(&IncludeSpec::parse(spec)?)?,
            None => KnowledgeBlob::empty(),
        };
        if !knowledge.dropped.is_empty() {
            warn!(
                dropped = knowledge.dropped.len(),
                budget = self.config.token_budget,
                "include files dropped to fit token budget"
            );
        }

        let focus = match &task.focus_spec {
            Some(raw) => Some(roots.resolve(raw, &task.base_dir)?),
            None => None,
        };
        let focus_contents = match &focus {
            Some(resolved) if !resolved.new_file => Some(self.store.read(&resolved.path)?),
            _ => None,
        };
        let focus_view = match (&focus, &focus_contents) {
            (Some(resolved), Some(contents)) => Some((resolved.path.as_path(), contents.as_str())),
            _ => None,
        };

        let prompt = build_prompt(&task.clean_desc, task.inline_knowledge.as_deref(), focus_view, &knowledge);

        self.manager.begin(
            task,
            &BeginMetrics {
                knowledge_tokens: prompt.inline_tokens,
                include_tokens: knowledge.tokens,
                prompt_tokens: prompt.total_tokens,
                cur_model: self.llm.model().to_string(),
            },
        )?;

        let backup = BackupWriter::new(self.store.clone(), &self.config.backup_root);
        let mut attempt = 1u32;
        let (files, reply_len) = loop {
            match self.attempt_edits(roots, task, &prompt, &backup).await {
                Ok(applied) => break applied,
                Err(e) => {
                    // LowSimilarity is transient only on the first attempt
                    let retryable =
                        e.is_retryable() && (!matches!(e, EngineError::LowSimilarity { .. }) || attempt == 1);
                    if retryable && attempt < self.config.retry_attempts {
                        warn!(attempt, error = %e, "attempt failed, retrying");
                        tokio::time::sleep(self.config.retry_delay()).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        };

        let plan_tokens = estimate_tokens(reply_len);
        self.manager.finish(task, Some(plan_tokens), &TaskOutcome::Done)?;

        info!(task = %task.clean_desc, files = files.len(), "task completed");
        Ok(RunOutcome::Completed {
            task: task.clean_desc.clone(),
            files,
            backup_dir: backup.dir().to_path_buf(),
            plan_tokens,
        })
    }

    /// Steps 4-6: one LLM call plus edit application
    async fn attempt_edits(
        &self,
        roots: &RootSet,
        task: &Task,
        prompt: &Prompt,
        backup: &BackupWriter,
    ) -> EngineResult<(Vec<PathBuf>, usize)> {
        let request = ChatRequest {
            system: prompt.system.clone(),
            prompt: prompt.text.clone(),
            max_tokens: self.config.llm.max_tokens,
        };
        let reply = collect_chat(self.llm.as_ref(), request).await?;

        let records = parse_llm_output(&reply);
        if records.is_empty() {
            return Err(EngineError::EmptyOutput);
        }

        let mut files = Vec::new();
        for mut record in records {
            let resolved = roots.resolve(&record.original_filename, &task.base_dir)?;
            record.resolved_path = Some(resolved.path.clone());
            record.new_file = resolved.new_file;

            let _guard = self.path_locks.lock(&resolved.path).await;

            let prior = if resolved.new_file {
                None
            } else {
                Some(self.store.read(&resolved.path)?)
            };

            let new_content = if record.partial {
                let Some(original) = prior.as_deref() else {
                    return Err(EngineError::Validation(format!(
                        "partial update for missing file {}",
                        record.original_filename
                    )));
                };
                let (merged, diagnostics) =
                    smart_merge(&resolved.path, original, &record.content, &self.config.smart_merge)?;
                for warning in &diagnostics.warnings {
                    warn!(file = %resolved.path.display(), %warning, "smart merge warning");
                }
                merged
            } else {
                record.content.clone()
            };

            let rel = roots.relative_to_nearest_root(&resolved.path);
            if let Some(old) = prior.as_deref() {
                backup.backup_file(&rel, old)?;
            }
            let diff = prior
                .as_deref()
                .map(|old| unified_diff(old, &new_content))
                .unwrap_or_default();

            self.store.write(&resolved.path, &new_content)?;
            backup.write_diff(&rel, &diff)?;

            debug!(file = %resolved.path.display(), new_file = resolved.new_file, "edit applied");
            files.push(resolved.path);
        }

        Ok((files, reply.len()))
    }
}

/// Every todo.md under the roots, in root order then lexicographic
fn discover_todos(roots: &RootSet, exclude: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots.roots() {
        if let Ok(paths) = roots.enumerate(root, true, exclude) {
            found.extend(paths.into_iter().filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.eq_ignore_ascii_case("todo.md"))
                    .unwrap_or(false)
            }));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    /// Scripted LLM: pops one reply per chat call
    struct ScriptedLlm {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn model(&self) -> &str {
            "scripted-test"
        }

        async fn chat(&self, _request: ChatRequest, chunk_tx: mpsc::Sender<String>) -> Result<(), crate::llm::LlmError> {
            let reply = self.replies.lock().unwrap().pop().unwrap_or_default();
            // Deliver in two chunks to exercise accumulation
            let mid = reply.len() / 2;
            let (a, b) = reply.split_at(mid);
            chunk_tx.send(a.to_string()).await.ok();
            chunk_tx.send(b.to_string()).await.ok();
            Ok(())
        }
    }

    fn engine_for(dir: &Path, llm: Arc<dyn LlmClient>) -> TaskEngine {
        let mut config: Config = serde_yaml::from_str("roots: [/tmp]\ntoken: secret\n").unwrap();
        config.roots = vec![dir.to_path_buf()];
        config.backup_root = dir.join(".todod").join("backups");
        config.retry_attempts = 1;
        let roots = Arc::new(RwLock::new(RootSet::new(vec![dir.to_path_buf()]).unwrap()));
        TaskEngine::new(config, roots, llm, WriteIgnoreMap::default(), PathLocks::default())
    }

    #[tokio::test]
    async fn test_happy_path_new_file() {
        let temp = tempdir().unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Create greeting\n  out: hello.txt\n").unwrap();

        let llm = ScriptedLlm::new(vec!["# file: hello.txt\nHello, world!"]);
        let engine = engine_for(temp.path(), llm);

        let outcome = engine.run_next(None).await.unwrap();
        match outcome {
            RunOutcome::Completed { files, backup_dir, .. } => {
                assert_eq!(files.len(), 1);
                assert!(files[0].ends_with("hello.txt"));
                // New file: empty diff file in the backup dir, no backup copy
                let diff = backup_dir.join("hello.txt.diff");
                assert_eq!(fs::read_to_string(diff).unwrap(), "");
                assert!(!backup_dir.join("hello.txt").exists());
            }
            other => panic!("expected Completed, got {:?}", other),
        }

        // Exact bytes with the normalized trailing newline
        let created = fs::read_to_string(temp.path().join("hello.txt")).unwrap();
        assert_eq!(created, "Hello, world!\n");

        // Todo file stamped done
        let text = fs::read_to_string(&todo).unwrap();
        let lines: Vec<&str> = text.split('\n').collect();
        assert!(lines[0].starts_with("- [x][x][ ] Create greeting | "));
        assert!(lines[1].contains("completed: "));
        assert!(lines[1].contains("cur_model: scripted-test"));
    }

    #[tokio::test]
    async fn test_no_pending() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("todo.md"), "- [x][x][ ] Finished | knowledge: 1\n").unwrap();

        let llm = ScriptedLlm::new(vec![]);
        let engine = engine_for(temp.path(), llm);

        assert!(matches!(engine.run_next(None).await.unwrap(), RunOutcome::NoPending));
    }

    #[tokio::test]
    async fn test_idempotence_when_nothing_pending() {
        let temp = tempdir().unwrap();
        let todo = temp.path().join("todo.md");
        let original = "# Notes\n- [x][x][ ] Done | knowledge: 1\n  - started: T | completed: T\n";
        fs::write(&todo, original).unwrap();

        let engine = engine_for(temp.path(), ScriptedLlm::new(vec![]));
        engine.run_next(None).await.unwrap();

        assert_eq!(fs::read_to_string(&todo).unwrap(), original);
    }

    #[tokio::test]
    async fn test_ambiguous_bare_name_marks_failed() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("a")).unwrap();
        fs::create_dir_all(temp.path().join("b")).unwrap();
        fs::write(temp.path().join("a/x.py"), "a = 1\n").unwrap();
        fs::write(temp.path().join("b/x.py"), "b = 2\n").unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Touch the module\n  out: x.py\n").unwrap();

        let engine = engine_for(temp.path(), ScriptedLlm::new(vec![]));
        let err = engine.run_next(None).await.unwrap_err();
        assert_eq!(err.kind(), "Ambiguous");

        // Neither candidate was modified
        assert_eq!(fs::read_to_string(temp.path().join("a/x.py")).unwrap(), "a = 1\n");
        assert_eq!(fs::read_to_string(temp.path().join("b/x.py")).unwrap(), "b = 2\n");

        // Task marked failed with the error kind in the summary
        let text = fs::read_to_string(&todo).unwrap();
        let lines: Vec<&str> = text.split('\n').collect();
        assert!(lines[0].starts_with("- [!][ ][ ] Touch the module"));
        assert!(lines[1].contains("error: Ambiguous"));
    }

    #[tokio::test]
    async fn test_empty_output_is_fatal() {
        let temp = tempdir().unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Produce nothing\n").unwrap();

        let engine = engine_for(temp.path(), ScriptedLlm::new(vec!["no files here, sorry"]));
        let err = engine.run_next(None).await.unwrap_err();
        assert_eq!(err.kind(), "EmptyOutput");

        let text = fs::read_to_string(&todo).unwrap();
        assert!(text.starts_with("- [!][ ][ ] Produce nothing"));
    }

    #[tokio::test]
    async fn test_existing_file_backed_up_before_overwrite() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("notes.txt"), "old contents\n").unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Rewrite notes\n  out: notes.txt\n").unwrap();

        let llm = ScriptedLlm::new(vec!["# file: notes.txt\nnew contents"]);
        let engine = engine_for(temp.path(), llm);

        let outcome = engine.run_next(None).await.unwrap();
        let RunOutcome::Completed { backup_dir, .. } = outcome else {
            panic!("expected Completed");
        };

        assert_eq!(fs::read_to_string(temp.path().join("notes.txt")).unwrap(), "new contents\n");
        assert_eq!(
            fs::read_to_string(backup_dir.join("notes.txt")).unwrap(),
            "old contents\n"
        );
        let diff = fs::read_to_string(backup_dir.join("notes.txt.diff")).unwrap();
        assert!(diff.contains("-old contents"));
        assert!(diff.contains("+new contents"));
    }

    #[tokio::test]
    async fn test_partial_low_similarity_fails_task() {
        let temp = tempdir().unwrap();
        let body = (1..=40).map(|i| format!("row {}", i)).collect::<Vec<_>>().join("\n") + "\n";
        fs::write(temp.path().join("mod.py"), &body).unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Patch the module\n  out: mod.py\n").unwrap();

        let reply = "# file: mod.py\n# partial: true\nnothing\nthat\nmatches\nanything\nat\nall\nhere\nok\n";
        // retry_attempts is 1 in the fixture, so one attempt only
        let engine = engine_for(temp.path(), ScriptedLlm::new(vec![reply]));
        let err = engine.run_next(None).await.unwrap_err();
        assert_eq!(err.kind(), "LowSimilarity");

        // Original untouched
        assert_eq!(fs::read_to_string(temp.path().join("mod.py")).unwrap(), body);
        let text = fs::read_to_string(&todo).unwrap();
        assert!(text.contains("error: LowSimilarity"));
    }

    #[tokio::test]
    async fn test_multi_file_reply_applied_in_order() {
        let temp = tempdir().unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Write two files\n").unwrap();

        let reply = "# file: first.txt\none\n# file: second.txt\ntwo\n";
        let engine = engine_for(temp.path(), ScriptedLlm::new(vec![reply]));

        let RunOutcome::Completed { files, .. } = engine.run_next(None).await.unwrap() else {
            panic!("expected Completed");
        };
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("first.txt"));
        assert!(files[1].ends_with("second.txt"));
        assert_eq!(fs::read_to_string(temp.path().join("first.txt")).unwrap(), "one\n");
        assert_eq!(fs::read_to_string(temp.path().join("second.txt")).unwrap(), "two\n");
    }

    #[tokio::test]
    async fn test_include_blob_feeds_prompt_metrics() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("ref.py"), "def helper(): pass\n").unwrap();
        let todo = temp.path().join("todo.md");
        fs::write(&todo, "- [ ][ ][ ] Use the helper\n  include: pattern=*.py\n  out: new.py\n").unwrap();

        let llm = ScriptedLlm::new(vec!["# file: new.py\nimport ref\n"]);
        let engine = engine_for(temp.path(), llm);
        engine.run_next(None).await.unwrap();

        let text = fs::read_to_string(&todo).unwrap();
        let lines: Vec<&str> = text.split('\n').collect();
        // include tokens reflect the resolved blob, not zero
        assert!(lines[1].contains("include: "));
        assert!(!lines[1].contains("include: 0"));
    }
}
