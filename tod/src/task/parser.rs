//! Todo file parser
//!
//! The todo file is the source of truth; parsed [`Task`] objects are a
//! reconstructable cache rebuilt on every load. Parsing is line-oriented:
//! bullets, indented attribute lines, an optional fenced knowledge block, a
//! previous engine summary line, and optional leading front matter.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::types::{Flag, Metadata, Task};
use crate::error::{EngineError, EngineResult};
use knowstore::FileStore;

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^- \[([ \-~x!])\]\[([ \-~x!])\]\[([ \-~x!])\] (.*)$").expect("bullet regex"));

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s{2,}(include|out|focus):\s*(.*)$").expect("attr regex"));

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s{2,}- (.*)$").expect("summary regex"));

/// Parsed bullet line: three flags plus the raw description text
pub(crate) fn parse_bullet(line: &str) -> Option<(Flag, Flag, Flag, String)> {
    let caps = BULLET_RE.captures(line)?;
    let flag = |i: usize| Flag::from_char(caps[i].chars().next().unwrap());
    Some((flag(1)?, flag(2)?, flag(3)?, caps[4].to_string()))
}

/// An engine summary stamp: indented `- ` line carrying started/completed
pub(crate) fn summary_body(line: &str) -> Option<&str> {
    let body = SUMMARY_RE.captures(line)?.get(1)?.as_str();
    if body.contains("started:") || body.contains("completed:") {
        Some(body)
    } else {
        None
    }
}

/// One parsed todo file
#[derive(Debug, Clone)]
pub struct TodoFile {
    /// Absolute path of the file
    pub path: PathBuf,

    /// Default base directory for tasks in this file
    pub base_dir: PathBuf,

    /// Tasks in file order
    pub tasks: Vec<Task>,
}

impl TodoFile {
    /// The earliest task whose flags are all pending
    pub fn next_runnable(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.is_runnable())
    }
}

/// Read and parse a todo file through the store
pub fn parse_todo_file(path: &Path, store: &FileStore) -> EngineResult<TodoFile> {
    let text = store.read(path)?;
    parse_todo(path, &text)
}

/// Parse todo file text
pub fn parse_todo(path: &Path, text: &str) -> EngineResult<TodoFile> {
    let lines: Vec<&str> = text.split('\n').collect();
    let todo_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut base_dir = todo_dir.clone();
    let mut start = 0;

    // Optional front matter: ---\nbase: <dir>\n---
    if lines.first().map(|l| l.trim_end()) == Some("---") {
        if let Some(offset) = lines.iter().skip(1).position(|l| l.trim_end() == "---") {
            let close = offset + 1;
            for line in &lines[1..close] {
                if let Some(value) = line.strip_prefix("base:") {
                    let dir = PathBuf::from(value.trim());
                    base_dir = if dir.is_absolute() { dir } else { todo_dir.join(dir) };
                }
            }
            start = close + 1;
        }
    }

    let mut tasks = Vec::new();
    let mut i = start;
    while i < lines.len() {
        let Some((plan, llm, commit, raw_desc)) = parse_bullet(lines[i]) else {
            i += 1;
            continue;
        };

        let (clean_desc, metadata) = match raw_desc.split_once(" | ") {
            Some((desc, meta)) => (desc.trim_end().to_string(), Metadata::parse(meta)),
            None => (raw_desc.trim_end().to_string(), Metadata::default()),
        };

        let mut task = Task {
            file: path.to_path_buf(),
            line_index: i,
            plan_flag: plan,
            llm_flag: llm,
            commit_flag: commit,
            clean_desc,
            metadata,
            include_spec: None,
            focus_spec: None,
            inline_knowledge: None,
            base_dir: base_dir.clone(),
            summary_line: None,
        };

        // Scan the indented block below the bullet
        let mut j = i + 1;
        while j < lines.len() {
            let line = lines[j];

            if summary_body(line).is_some() {
                task.summary_line = Some(j);
                j += 1;
                continue;
            }

            if let Some(caps) = ATTR_RE.captures(line) {
                let value = caps[2].trim().to_string();
                match &caps[1] {
                    "include" => task.include_spec = Some(value),
                    _ => task.focus_spec = Some(value),
                }
                j += 1;
                continue;
            }

            if line.trim_start().starts_with("```") {
                let mut inner = Vec::new();
                let mut k = j + 1;
                loop {
                    if k >= lines.len() {
                        return Err(EngineError::Parse(format!(
                            "{}: unclosed knowledge fence at line {}",
                            path.display(),
                            j + 1
                        )));
                    }
                    if lines[k].trim_start().starts_with("```") {
                        break;
                    }
                    inner.push(lines[k]);
                    k += 1;
                }
                task.inline_knowledge = Some(inner.join("\n"));
                j = k + 1;
                continue;
            }

            break;
        }

        tasks.push(task);
        i = j;
    }

    Ok(TodoFile {
        path: path.to_path_buf(),
        base_dir,
        tasks,
    })
}
