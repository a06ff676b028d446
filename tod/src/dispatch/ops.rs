//! Dispatch operations and wire payload records
//!
//! Every request names one operation; payloads deserialize into the typed
//! record for that operation before any handler runs.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::EngineError;

/// Every operation the dispatch surface exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Todo,
    ListFiles,
    ReadFile,
    UpdateFile,
    CreateFile,
    AppendFile,
    DeleteFile,
    Rename,
    Move,
    CopyFile,
    CreateDir,
    DeleteDir,
    Checksum,
    Search,
    Include,
    SetRoots,
    Quit,
}

impl Operation {
    /// Parse a wire operation name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "TODO" => Some(Operation::Todo),
            "LIST_FILES" => Some(Operation::ListFiles),
            "READ_FILE" => Some(Operation::ReadFile),
            "UPDATE_FILE" => Some(Operation::UpdateFile),
            "CREATE_FILE" => Some(Operation::CreateFile),
            "APPEND_FILE" => Some(Operation::AppendFile),
            "DELETE_FILE" => Some(Operation::DeleteFile),
            "RENAME" => Some(Operation::Rename),
            "MOVE" => Some(Operation::Move),
            "COPY_FILE" => Some(Operation::CopyFile),
            "CREATE_DIR" => Some(Operation::CreateDir),
            "DELETE_DIR" => Some(Operation::DeleteDir),
            "CHECKSUM" => Some(Operation::Checksum),
            "SEARCH" => Some(Operation::Search),
            "INCLUDE" => Some(Operation::Include),
            "SET_ROOTS" => Some(Operation::SetRoots),
            "QUIT" | "EXIT" => Some(Operation::Quit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Todo => "TODO",
            Operation::ListFiles => "LIST_FILES",
            Operation::ReadFile => "READ_FILE",
            Operation::UpdateFile => "UPDATE_FILE",
            Operation::CreateFile => "CREATE_FILE",
            Operation::AppendFile => "APPEND_FILE",
            Operation::DeleteFile => "DELETE_FILE",
            Operation::Rename => "RENAME",
            Operation::Move => "MOVE",
            Operation::CopyFile => "COPY_FILE",
            Operation::CreateDir => "CREATE_DIR",
            Operation::DeleteDir => "DELETE_DIR",
            Operation::Checksum => "CHECKSUM",
            Operation::Search => "SEARCH",
            Operation::Include => "INCLUDE",
            Operation::SetRoots => "SET_ROOTS",
            Operation::Quit => "QUIT",
        }
    }
}

/// Payload naming one path
#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

/// Payload for write-style operations
#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
}

/// Payload for rename/move/copy
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub from: String,
    pub to: String,
}

/// Payload for LIST_FILES
#[derive(Debug, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
}

/// Payload for SEARCH
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub pattern: String,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Payload for INCLUDE
#[derive(Debug, Deserialize)]
pub struct IncludeRequest {
    pub spec: String,
}

/// Payload for SET_ROOTS
#[derive(Debug, Deserialize)]
pub struct SetRootsRequest {
    pub roots: Vec<PathBuf>,
}

/// Payload for TODO
#[derive(Debug, Deserialize, Default)]
pub struct TodoRequest {
    #[serde(default)]
    pub file: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    100
}

/// `{"status":"ok", ...extra}`
pub fn ok_response(extra: Value) -> Value {
    let mut out = json!({"status": "ok"});
    if let (Some(obj), Some(extra)) = (out.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    out
}

/// `{"status":"error","error":tag,"message":...}`
pub fn error_response(tag: &str, message: &str) -> Value {
    json!({"status": "error", "error": tag, "message": message})
}

/// Error response carrying an engine error's wire tag
pub fn engine_error_response(err: &EngineError) -> Value {
    error_response(err.kind(), &err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_operations() {
        assert_eq!(Operation::parse("TODO"), Some(Operation::Todo));
        assert_eq!(Operation::parse("READ_FILE"), Some(Operation::ReadFile));
        assert_eq!(Operation::parse("SET_ROOTS"), Some(Operation::SetRoots));
        // EXIT is an alias for QUIT
        assert_eq!(Operation::parse("EXIT"), Some(Operation::Quit));
        assert_eq!(Operation::parse("QUIT"), Some(Operation::Quit));
    }

    #[test]
    fn test_parse_unknown_operation() {
        assert_eq!(Operation::parse("FROBNICATE"), None);
        assert_eq!(Operation::parse("todo"), None);
    }

    #[test]
    fn test_name_roundtrip() {
        for name in ["TODO", "LIST_FILES", "COPY_FILE", "CHECKSUM", "INCLUDE"] {
            assert_eq!(Operation::parse(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_ok_response_merges_fields() {
        let value = ok_response(json!({"content": "abc"}));
        assert_eq!(value["status"], "ok");
        assert_eq!(value["content"], "abc");
    }

    #[test]
    fn test_error_response_shape() {
        let value = error_response("Unauthorized", "bad token");
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "Unauthorized");
        assert_eq!(value["message"], "bad token");
    }

    #[test]
    fn test_payload_defaults() {
        let list: ListRequest = serde_json::from_value(json!({})).unwrap();
        assert!(list.recursive);
        assert!(list.dir.is_none());

        let todo: TodoRequest = serde_json::from_value(json!({})).unwrap();
        assert!(todo.file.is_none());

        let search: SearchRequest = serde_json::from_value(json!({"pattern": "x"})).unwrap();
        assert_eq!(search.max_results, 100);
        assert!(!search.case_insensitive);
    }
}
