//! Completion-service client abstraction.
//!
//! One generic interface for the text-completion backend used for
//! parameter extraction, keyword mining, and similarity scoring, plus a
//! scripted fake for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::retry::{with_retry, RetryConfig};

/// Completion-service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:3b".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Generic completion client: system instruction plus user text in,
/// plain text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError>;
}

/// HTTP implementation against an OpenAI-compatible chat endpoint.
pub struct HttpCompletionClient {
    config: CompletionConfig,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionConfig, retry: RetryConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AgentError::external(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            config,
            retry,
            client,
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let url = format!("{}/v1/chat/completions", self.config.endpoint);
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": 0.0,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::external(format!("completion request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::external(format!(
                "HTTP {} from completion service",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::external(format!("completion response unreadable: {e}")))?;

        let text = json
            .get("choices")
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("message"))
            .and_then(|v| v.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::external("completion response had no content"))?;

        Ok(text.to_string())
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError> {
        with_retry(&self.retry, "completion service", || self.chat(system, user)).await
    }
}

/// Scripted completion client for tests.
///
/// Responses are consumed front-to-back; a single remaining response is
/// returned repeatedly.
pub struct FakeCompletionClient {
    responses: Mutex<Vec<Result<String, AgentError>>>,
    call_count: Mutex<usize>,
}

impl FakeCompletionClient {
    pub fn new(responses: Vec<Result<String, AgentError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        }
    }

    /// A client that always returns the given text.
    pub fn always(text: &str) -> Self {
        Self::new(vec![Ok(text.to_string())])
    }

    /// A client that always fails with an external-service error.
    pub fn always_failing(context: &str) -> Self {
        Self::new(vec![Err(AgentError::external(context))])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait]
impl CompletionClient for FakeCompletionClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, AgentError> {
        *self.call_count.lock().unwrap() += 1;

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(AgentError::external("fake client ran out of responses"));
        }
        if responses.len() == 1 {
            responses[0].clone()
        } else {
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_config_default() {
        let config = CompletionConfig::default();
        assert_eq!(config.endpoint, "http://localhost:11434");
        assert_eq!(config.model, "llama3.2:3b");
        assert!(config.api_key.is_none());
        assert_eq!(config.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_fake_client_repeats_last_response() {
        let client = FakeCompletionClient::always("hello");
        assert_eq!(client.complete("s", "u").await.unwrap(), "hello");
        assert_eq!(client.complete("s", "u").await.unwrap(), "hello");
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_fake_client_scripted_sequence() {
        let client = FakeCompletionClient::new(vec![
            Ok("first".to_string()),
            Err(AgentError::external("down")),
        ]);
        assert_eq!(client.complete("", "").await.unwrap(), "first");
        assert!(client.complete("", "").await.is_err());
    }
}
