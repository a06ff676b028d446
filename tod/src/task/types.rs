//! Task domain types

use std::path::PathBuf;

/// One status flag of a task bullet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Pending,
    Disabled,
    Doing,
    Done,
    Failed,
}

impl Flag {
    /// Parse the single character between a pair of brackets
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(Flag::Pending),
            '-' => Some(Flag::Disabled),
            '~' => Some(Flag::Doing),
            'x' => Some(Flag::Done),
            '!' => Some(Flag::Failed),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Flag::Pending => ' ',
            Flag::Disabled => '-',
            Flag::Doing => '~',
            Flag::Done => 'x',
            Flag::Failed => '!',
        }
    }
}

/// Preferred serialization order for summary metadata keys
const KEY_ORDER: &[&str] = &[
    "started",
    "completed",
    "knowledge",
    "include",
    "prompt",
    "plan",
    "cur_model",
    "error",
];

/// Ordered key/value metadata carried on bullet and summary lines
///
/// Setting an existing key replaces its value in place, so a key never
/// appears twice. Serialization emits known keys in a fixed order followed
/// by any others in first-set order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    /// Parse `key: value | key: value` text
    pub fn parse(text: &str) -> Self {
        let mut meta = Metadata::default();
        for piece in text.split(" | ") {
            if let Some((key, value)) = piece.split_once(':') {
                let key = key.trim();
                if !key.is_empty() {
                    meta.set(key, value.trim());
                }
            }
        }
        meta
    }

    /// Set a key, replacing any existing value
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to `key: value | key: value` in canonical key order
    pub fn serialize(&self) -> String {
        let mut ordered: Vec<&(String, String)> = Vec::with_capacity(self.entries.len());
        for key in KEY_ORDER {
            if let Some(entry) = self.entries.iter().find(|(k, _)| k == key) {
                ordered.push(entry);
            }
        }
        for entry in &self.entries {
            if !KEY_ORDER.contains(&entry.0.as_str()) {
                ordered.push(entry);
            }
        }

        ordered
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v))
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// One task bullet parsed out of a todo file
#[derive(Debug, Clone)]
pub struct Task {
    /// Absolute todo file path
    pub file: PathBuf,

    /// 0-based line index of the bullet
    pub line_index: usize,

    pub plan_flag: Flag,
    pub llm_flag: Flag,
    pub commit_flag: Flag,

    /// Bullet text with trailing ` | key: value` metadata stripped
    pub clean_desc: String,

    /// Metadata parsed off the bullet line
    pub metadata: Metadata,

    /// Raw text of an indented `include:` line
    pub include_spec: Option<String>,

    /// Raw text of an indented `out:` / `focus:` line
    pub focus_spec: Option<String>,

    /// Fenced block below the bullet, minus the fence lines
    pub inline_knowledge: Option<String>,

    /// Base directory for path resolution, from front matter or the todo
    /// file's directory
    pub base_dir: PathBuf,

    /// Line index of an existing engine summary line, if any
    pub summary_line: Option<usize>,
}

impl Task {
    /// Only fully-pending tasks are runnable
    pub fn is_runnable(&self) -> bool {
        self.plan_flag == Flag::Pending && self.llm_flag == Flag::Pending && self.commit_flag == Flag::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_roundtrip() {
        for c in [' ', '-', '~', 'x', '!'] {
            assert_eq!(Flag::from_char(c).unwrap().as_char(), c);
        }
        assert!(Flag::from_char('?').is_none());
    }

    #[test]
    fn test_metadata_parse_and_serialize() {
        let meta = Metadata::parse("started: 2026-08-01T10:00:00 | knowledge: 42");
        assert_eq!(meta.get("started"), Some("2026-08-01T10:00:00"));
        assert_eq!(meta.get("knowledge"), Some("42"));
        assert_eq!(meta.serialize(), "started: 2026-08-01T10:00:00 | knowledge: 42");
    }

    #[test]
    fn test_metadata_set_replaces() {
        let mut meta = Metadata::default();
        meta.set("knowledge", "1");
        meta.set("knowledge", "2");
        assert_eq!(meta.serialize(), "knowledge: 2");
    }

    #[test]
    fn test_metadata_canonical_order() {
        let mut meta = Metadata::default();
        meta.set("cur_model", "claude");
        meta.set("completed", "T2");
        meta.set("started", "T1");
        assert_eq!(meta.serialize(), "started: T1 | completed: T2 | cur_model: claude");
    }

    #[test]
    fn test_metadata_keeps_unknown_keys_last() {
        let mut meta = Metadata::default();
        meta.set("custom", "v");
        meta.set("started", "T1");
        assert_eq!(meta.serialize(), "started: T1 | custom: v");
    }
}
