//! Speech-to-text and chat-completion services.
//!
//! Handlers only see the [`SpeechToText`] and [`ChatCompletion`] traits;
//! [`OpenAiClient`] implements both against an OpenAI-compatible HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::OpenAiSettings;

#[derive(Debug, Clone, Error)]
pub enum AiError {
    #[error("API key not configured")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited,

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("API error: {0}")]
    ApiError(String),
}

/// Uploaded answer audio.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, AiError>;
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Sends the conversation and returns the assistant's reply text.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, AiError>;
}

// Request/response types for the OpenAI API

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    settings: OpenAiSettings,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings, timeout: Duration) -> Result<Self, AiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str, AiError> {
        self.settings.api_key.as_deref().ok_or(AiError::MissingApiKey)
    }

    /// Maps non-success statuses to [`AiError`], reading the error body if any.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AiError::InvalidApiKey);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AiError::RateLimited);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(AiError::ApiError(format!("HTTP {}: {}", status, message)))
    }
}

#[async_trait]
impl SpeechToText for OpenAiClient {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, AiError> {
        let file = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(&clip.mime_type)
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.settings.transcription_model.clone());

        debug!(bytes = clip.bytes.len(), mime = %clip.mime_type, "sending audio for transcription");
        let response = self
            .client
            .post(self.url("audio/transcriptions"))
            .bearer_auth(self.api_key()?)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        let response: TranscriptionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::ParseError(e.to_string()))?;

        let text = response.text.trim();
        if text.is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl ChatCompletion for OpenAiClient {
    async fn complete(&self, messages: &[PromptMessage]) -> Result<String, AiError> {
        let body = ChatCompletionRequest {
            model: &self.settings.chat_model,
            messages,
            max_tokens: self.settings.max_tokens,
        };

        debug!(model = %self.settings.chat_model, turns = messages.len(), "requesting chat completion");
        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(self.api_key()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::RequestFailed(e.to_string()))?;

        let response: ChatCompletionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| AiError::ParseError(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(AiError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> OpenAiClient {
        let settings = OpenAiSettings {
            api_key: api_key.map(str::to_string),
            base_url: format!("{}/v1", server.uri()),
            chat_model: "gpt-4".to_string(),
            max_tokens: 500,
            transcription_model: "whisper-1".to_string(),
        };
        OpenAiClient::new(settings, Duration::from_secs(5)).unwrap()
    }

    fn clip() -> AudioClip {
        AudioClip {
            bytes: b"RIFF0000WAVE".to_vec(),
            mime_type: "audio/wav".to_string(),
            file_name: "answer.wav".to_string(),
        }
    }

    #[tokio::test]
    async fn chat_completion_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "  Strong answer.  " } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-test"));
        let reply = client
            .complete(&[PromptMessage::new(Role::User, "Rate my answer")])
            .await
            .unwrap();
        assert_eq!(reply, "Strong answer.");
    }

    #[tokio::test]
    async fn transcription_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": "I would start by listening." })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-test"));
        let text = client.transcribe(&clip()).await.unwrap();
        assert_eq!(text, "I would start by listening.");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_invalid_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-bad"));
        let err = client.transcribe(&clip()).await.unwrap_err();
        assert!(matches!(err, AiError::InvalidApiKey));
    }

    #[tokio::test]
    async fn api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Invalid file format." }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-test"));
        match client.transcribe(&clip()).await.unwrap_err() {
            AiError::ApiError(message) => assert!(message.contains("Invalid file format.")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_transcription_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "text": "  " })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-test"));
        let err = client.transcribe(&clip()).await.unwrap_err();
        assert!(matches!(err, AiError::EmptyResponse));
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let server = MockServer::start().await;
        let client = client_for(&server, None);
        let err = client.complete(&[]).await.unwrap_err();
        assert!(matches!(err, AiError::MissingApiKey));
    }
}
