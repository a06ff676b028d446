//! LLM client module
//!
//! The engine consumes one capability: send a prompt, get text back as a
//! stream of chunks. [`collect_chat`] adapts the stream into a single string
//! for the non-streaming engine path.

mod anthropic;
mod client;
mod error;

pub use anthropic::AnthropicClient;
pub use client::{ChatRequest, LlmClient, collect_chat};
pub use error::LlmError;

use std::sync::Arc;

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
pub fn create_client(config: &LlmConfig, timeout: std::time::Duration) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config, timeout)?)),
        other => Err(LlmError::InvalidResponse(format!(
            "Unknown LLM provider: '{}'. Supported: anthropic",
            other
        ))),
    }
}
