//! Anthropic Claude API client implementation
//!
//! Implements the LlmClient trait against the Messages API with SSE
//! streaming.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::{ChatRequest, LlmClient, LlmError};
use crate::config::LlmConfig;

/// Anthropic Claude API client
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable specified in config.
    pub fn from_config(config: &LlmConfig, timeout: Duration) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| LlmError::InvalidResponse(format!("Environment variable {} not set", config.api_key_env)))?;

        let http = Client::builder().timeout(timeout).build().map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.clone(),
            http,
            max_tokens: config.max_tokens,
            timeout,
        })
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": true,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: ChatRequest, chunk_tx: mpsc::Sender<String>) -> Result<(), LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let http_request = self
            .http
            .post(url)
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body);

        let mut es = EventSource::new(http_request).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let result = tokio::time::timeout(self.timeout, async {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Message(msg)) => {
                        let data: serde_json::Value = serde_json::from_str(&msg.data).map_err(LlmError::Json)?;

                        match data["type"].as_str() {
                            Some("content_block_delta") => {
                                if let Some(text) = data["delta"]["text"].as_str() {
                                    let _ = chunk_tx.send(text.to_string()).await;
                                }
                            }
                            Some("message_stop") => break,
                            Some("error") => {
                                let message = data["error"]["message"].as_str().unwrap_or("unknown").to_string();
                                let status = match data["error"]["type"].as_str() {
                                    Some("overloaded_error") => 529,
                                    Some("rate_limit_error") => 429,
                                    _ => 400,
                                };
                                if status == 429 {
                                    return Err(LlmError::RateLimited {
                                        retry_after: Duration::from_secs(60),
                                    });
                                }
                                return Err(LlmError::ApiError { status, message });
                            }
                            _ => {}
                        }
                    }
                    Ok(Event::Open) => {
                        debug!("anthropic stream opened");
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                        let status = status.as_u16();
                        if status == 429 {
                            let retry_after = response
                                .headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok())
                                .and_then(|s| s.parse::<u64>().ok())
                                .unwrap_or(60);
                            return Err(LlmError::RateLimited {
                                retry_after: Duration::from_secs(retry_after),
                            });
                        }
                        let message = response.text().await.unwrap_or_default();
                        return Err(LlmError::ApiError { status, message });
                    }
                    Err(e) => {
                        return Err(LlmError::InvalidResponse(e.to_string()));
                    }
                }
            }
            Ok(())
        })
        .await;

        es.close();

        match result {
            Ok(inner) => inner,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        }
    }
}
