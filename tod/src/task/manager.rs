//! Task manager - the only code that mutates a todo file
//!
//! Two operations exist: `begin` stamps a task as in-progress with its
//! metric metadata, `finish` stamps the terminal flags and completion
//! metrics. Every other line in the file is preserved byte-for-byte; after
//! each write the observed mtime is recorded in the write-ignore map so the
//! watcher does not re-trigger the engine.

use chrono::Local;
use tracing::debug;

use super::parser::{parse_bullet, summary_body};
use super::types::{Flag, Metadata, Task};
use crate::error::{EngineError, EngineResult};
use crate::watcher::WriteIgnoreMap;
use knowstore::FileStore;

/// Metrics stamped when a task starts
#[derive(Debug, Clone)]
pub struct BeginMetrics {
    pub knowledge_tokens: usize,
    pub include_tokens: usize,
    pub prompt_tokens: usize,
    pub cur_model: String,
}

/// Terminal state of a task run
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Done,
    CommitDeferred,
    Failed { kind: String },
}

impl TaskOutcome {
    fn flags(&self) -> (Flag, Flag, Flag) {
        match self {
            TaskOutcome::Done => (Flag::Done, Flag::Done, Flag::Pending),
            TaskOutcome::CommitDeferred => (Flag::Done, Flag::Done, Flag::Doing),
            TaskOutcome::Failed { .. } => (Flag::Failed, Flag::Pending, Flag::Pending),
        }
    }
}

/// Mutates todo files in place
#[derive(Debug, Clone)]
pub struct TaskManager {
    store: FileStore,
    write_ignore: WriteIgnoreMap,
}

impl TaskManager {
    pub fn new(store: FileStore, write_ignore: WriteIgnoreMap) -> Self {
        Self { store, write_ignore }
    }

    /// Mark a task in-progress and stamp its start metrics
    pub fn begin(&self, task: &Task, metrics: &BeginMetrics) -> EngineResult<()> {
        let text = self.store.read(&task.file)?;
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        self.check_bullet(&lines, task)?;

        let mut bullet_meta = task.metadata.clone();
        bullet_meta.set("knowledge", metrics.knowledge_tokens.to_string());
        bullet_meta.set("include", metrics.include_tokens.to_string());
        bullet_meta.set("prompt", metrics.prompt_tokens.to_string());
        bullet_meta.set("cur_model", metrics.cur_model.clone());

        lines[task.line_index] = format!(
            "- [{}][{}][{}] {} | {}",
            Flag::Doing.as_char(),
            task.llm_flag.as_char(),
            task.commit_flag.as_char(),
            task.clean_desc,
            bullet_meta.serialize()
        );

        let mut summary = Metadata::default();
        summary.set("started", timestamp());
        summary.set("knowledge", metrics.knowledge_tokens.to_string());
        summary.set("include", metrics.include_tokens.to_string());
        summary.set("prompt", metrics.prompt_tokens.to_string());
        summary.set("cur_model", metrics.cur_model.clone());
        self.put_summary(&mut lines, task.line_index, summary);

        self.write_back(task, lines)
    }

    /// Stamp terminal flags and completion metrics
    pub fn finish(&self, task: &Task, plan_tokens: Option<usize>, outcome: &TaskOutcome) -> EngineResult<()> {
        let text = self.store.read(&task.file)?;
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        let (_, _, _, raw_desc) = self.check_bullet(&lines, task)?;

        // Keep whatever metadata begin put on the bullet
        let (desc, bullet_meta) = match raw_desc.split_once(" | ") {
            Some((d, m)) => (d.to_string(), Metadata::parse(m)),
            None => (raw_desc, Metadata::default()),
        };

        let (a, b, c) = outcome.flags();
        let meta_suffix = if bullet_meta.is_empty() {
            String::new()
        } else {
            format!(" | {}", bullet_meta.serialize())
        };
        lines[task.line_index] = format!(
            "- [{}][{}][{}] {}{}",
            a.as_char(),
            b.as_char(),
            c.as_char(),
            desc,
            meta_suffix
        );

        let mut summary = match find_summary(&lines, task.line_index) {
            Some(idx) => summary_body(&lines[idx]).map(Metadata::parse).unwrap_or_default(),
            None => Metadata::default(),
        };
        summary.set("completed", timestamp());
        if let Some(tokens) = plan_tokens {
            summary.set("plan", tokens.to_string());
        }
        if let TaskOutcome::Failed { kind } = outcome {
            summary.set("error", kind.clone());
        }
        self.put_summary(&mut lines, task.line_index, summary);

        self.write_back(task, lines)
    }

    fn check_bullet(&self, lines: &[String], task: &Task) -> EngineResult<(Flag, Flag, Flag, String)> {
        lines
            .get(task.line_index)
            .and_then(|line| parse_bullet(line))
            .ok_or_else(|| {
                EngineError::Parse(format!(
                    "{}: no task bullet at line {}",
                    task.file.display(),
                    task.line_index + 1
                ))
            })
    }

    /// Overwrite the task's summary line, or insert one right below the bullet
    fn put_summary(&self, lines: &mut Vec<String>, bullet_index: usize, summary: Metadata) {
        let rendered = format!("  - {}", summary.serialize());
        match find_summary(lines, bullet_index) {
            Some(idx) => lines[idx] = rendered,
            None => lines.insert(bullet_index + 1, rendered),
        }
    }

    fn write_back(&self, task: &Task, lines: Vec<String>) -> EngineResult<()> {
        self.store.write(&task.file, &lines.join("\n"))?;

        let mtime = std::fs::metadata(&task.file)?.modified()?;
        self.write_ignore.record(&task.file, mtime);
        debug!(file = %task.file.display(), line = task.line_index, "todo file updated");
        Ok(())
    }
}

/// Locate the summary line in the indented block below a bullet
fn find_summary(lines: &[String], bullet_index: usize) -> Option<usize> {
    let mut j = bullet_index + 1;
    while j < lines.len() {
        let line = &lines[j];
        if summary_body(line).is_some() {
            return Some(j);
        }
        let indented_attr = line.starts_with("  ") && line.contains(':') && !line.trim_start().starts_with('-');
        if indented_attr {
            j += 1;
            continue;
        }
        if line.trim_start().starts_with("```") {
            j += 1;
            while j < lines.len() && !lines[j].trim_start().starts_with("```") {
                j += 1;
            }
            j += 1;
            continue;
        }
        break;
    }
    None
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
