//! todod - Markdown todo task daemon
//!
//! todod watches `todo.md` files under a set of root directories, drives an
//! LLM to produce source edits for each pending task, applies those edits
//! with backup and diff discipline, and rewrites the todo file in place with
//! status transitions and metric stamps. Everything it can do is also exposed
//! over a dual-protocol local server (bearer-authenticated HTTP plus a
//! line-oriented `OP {json}` variant).
//!
//! # Modules
//!
//! - [`task`] - todo file parsing and in-place rewriting
//! - [`engine`] - prompt building, LLM output parsing, smart merge, the
//!   orchestrating engine and its serializing executor
//! - [`watcher`] - poll-based todo watcher with the write-ignore reentrancy
//!   guard
//! - [`llm`] - LLM client trait and the Anthropic implementation
//! - [`dispatch`] - the dual-protocol request server
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod llm;
pub mod task;
pub mod watcher;

// Re-export commonly used types
pub use config::{Config, LlmConfig, SmartMergeConfig};
pub use dispatch::{DispatchServer, Operation, ServerState};
pub use engine::{
    BackupWriter, EditRecord, EngineExecutor, ExecutorHandle, MergeDiagnostics, PathLocks, Prompt, RunOutcome,
    TaskEngine, build_prompt, parse_llm_output, smart_merge, unified_diff,
};
pub use error::{EngineError, EngineResult};
pub use llm::{AnthropicClient, ChatRequest, LlmClient, LlmError, collect_chat, create_client};
pub use task::{BeginMetrics, Flag, Metadata, Task, TaskManager, TaskOutcome, TodoFile, parse_todo, parse_todo_file};
pub use watcher::{TodoWatcher, WatcherConfig, WriteIgnoreMap};
