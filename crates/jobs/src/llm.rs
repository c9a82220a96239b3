use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use sift_core::config::LlmConfig;
use sift_core::{LlmClient, SiftError};

/// Messages-API client for the configured LLM provider. Non-streaming:
/// extraction wants one JSON value, not tokens as they arrive.
pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, SiftError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SiftError::Internal(format!("llm client build failed: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, SiftError> {
        if self.api_key.is_empty() {
            return Err(SiftError::LlmProvider("no LLM API key configured".into()));
        }

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let request = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send();

        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| SiftError::LlmTimeout(timeout.as_secs()))?
            .map_err(|e| {
                if e.is_timeout() {
                    SiftError::LlmTimeout(timeout.as_secs())
                } else {
                    SiftError::LlmProvider(e.to_string())
                }
            })?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| SiftError::LlmProvider(format!("bad provider response: {e}")))?;

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("provider returned an error");
            return Err(SiftError::LlmProvider(format!("HTTP {status}: {message}")));
        }

        let text = payload
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| SiftError::LlmProvider("response carries no text content".into()))?;

        debug!(chars = text.len(), "llm completion received");
        Ok(text.to_string())
    }
}
