//! OpenAI chat-completions client.
//!
//! One blocking-style request per call against `/v1/chat/completions`;
//! the generated text is pulled out of `choices[0].message.content`.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::{ChatMessage, CompletionClient, LlmError};

/// Default API base.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model used for both text advice and photo analysis.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Low temperature keeps the operator guidance terse and repeatable.
const TEMPERATURE: f32 = 0.2;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

/// Client for the OpenAI chat-completions endpoint.
///
/// The API key is optional at construction so the process can start
/// without one; every call re-checks it and fails that call alone with
/// [`LlmError::MissingCredentials`].
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    /// Build a client reading `OPENAI_API_KEY` from the environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Override the API base URL (tests point this at a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingCredentials)?;

        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature: TEMPERATURE,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| LlmError::MalformedResponse(format!("{e} / body={body}")))?;
        let content = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| {
                LlmError::MalformedResponse(format!("missing choices[0].message.content / body={body}"))
            })?;

        debug!(model = %self.model, chars = content.len(), "completion received");
        Ok(content.to_string())
    }
}
