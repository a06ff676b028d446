//! LLM client trait and stream-collection adapter

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::LlmError;

/// Everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// System prompt carrying the output-format contract
    pub system: String,

    /// The assembled task prompt
    pub prompt: String,

    /// Max tokens for the response
    pub max_tokens: u32,
}

/// The single LLM capability the engine consumes
///
/// Implementations push text chunks into `chunk_tx` as they arrive and
/// return once the message completes. Callers that want one final string use
/// [`collect_chat`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier, recorded in task metrics
    fn model(&self) -> &str;

    /// Run one completion, streaming text chunks into `chunk_tx`
    async fn chat(&self, request: ChatRequest, chunk_tx: mpsc::Sender<String>) -> Result<(), LlmError>;
}

/// Drain a chat stream into a single string
pub async fn collect_chat(client: &dyn LlmClient, request: ChatRequest) -> Result<String, LlmError> {
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let drain = async move {
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        out
    };

    let (result, output) = tokio::join!(client.chat(request, tx), drain);
    result?;
    Ok(output)
}
