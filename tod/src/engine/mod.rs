//! Task engine
//!
//! The orchestrator and its supporting operators: prompt building, LLM
//! output parsing, smart merge, diff & backup, and the serializing executor
//! every `TODO` request goes through.

mod backup;
mod core;
mod executor;
mod merge;
mod output;
mod prompt;

pub use backup::{BackupWriter, unified_diff};
pub use core::{RunOutcome, TaskEngine};
pub use executor::{EngineExecutor, ExecutorHandle, PathLocks};
pub use merge::{MergeDiagnostics, smart_merge};
pub use output::{EditRecord, parse_llm_output};
pub use prompt::{OUTPUT_CONTRACT, Prompt, build_prompt};
