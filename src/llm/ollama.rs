//! HTTP client for the Ollama chat API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::Generator;
use crate::error::GenerationError;

/// Default Ollama host.
pub const DEFAULT_HOST: &str = "http://localhost:11434";

/// Default chat model.
pub const DEFAULT_MODEL: &str = "gpt-oss:20b";

/// Connection timeout. The overall request deadline is owned by the caller.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the Ollama backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub host: String,
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Non-streaming client for `POST {host}/api/chat`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::Backend {
                status: None,
                payload: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            url: format!("{}/api/chat", config.host.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for OllamaClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Backend {
                status: None,
                payload: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| GenerationError::Backend {
            status: Some(status.as_u16()),
            payload: format!("failed to read response body: {e}"),
        })?;
        debug!(status = %status, model = %self.model, "Ollama response received");

        if !status.is_success() {
            warn!(status = %status, body = %body, "Ollama returned an error status");
            return Err(GenerationError::Backend {
                status: Some(status.as_u16()),
                payload: body,
            });
        }

        let parsed: ChatResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, body = %body, "Ollama response is not valid JSON");
                return Err(GenerationError::MalformedResponse { payload: body });
            }
        };

        if parsed.error.is_some() {
            warn!(body = %body, "Ollama reported an error");
            return Err(GenerationError::Backend {
                status: Some(status.as_u16()),
                payload: body,
            });
        }

        match parsed.message {
            Some(message) if !message.content.trim().is_empty() => Ok(message.content),
            _ => Err(GenerationError::MalformedResponse { payload: body }),
        }
    }
}
