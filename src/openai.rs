use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::OpenAiConfig;

/// Completion failures, split into transient conditions worth seeing again
/// (network hiccups, rate limits, server errors) and fatal ones that will
/// not fix themselves (bad credentials, malformed requests).
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("transient API error: {0}")]
    Transient(String),
    #[error("API error: {0}")]
    Fatal(String),
}

impl CompletionError {
    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            CompletionError::Transient(format!("{}: {}", status, body))
        } else {
            CompletionError::Fatal(format!("{}: {}", status, body))
        }
    }
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        // Connection and timeout failures are retryable by nature
        CompletionError::Transient(e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    url: String,
}

/// The completion surface the channel adapters talk to. Kept as a trait so
/// handlers can run against a stub in tests.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Generate a reply for one user message. Never fails: errors come back
    /// as user-visible text.
    async fn reply_text(&self, prompt: &str) -> String;

    /// Generate one image and return its URL.
    async fn generate_image(&self, prompt: &str) -> Result<String, CompletionError>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn chat(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        debug!("Sending chat completion request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Fatal(format!("invalid response body: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| CompletionError::Fatal("no choices in response".to_string()))
    }
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn reply_text(&self, prompt: &str) -> String {
        match self.chat(prompt).await {
            Ok(text) => text,
            Err(e) => format!("Erro ao gerar resposta: {}", e),
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, CompletionError> {
        let request = ImageRequest {
            prompt,
            n: 1,
            size: &self.config.image_size,
        };

        let url = format!("{}/images/generations", self.config.base_url);
        debug!("Sending image generation request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, body));
        }

        let image_response: ImageResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Fatal(format!("invalid response body: {}", e)))?;

        image_response
            .data
            .into_iter()
            .next()
            .map(|d| d.url)
            .ok_or_else(|| CompletionError::Fatal("no image URL in response".to_string()))
    }
}
