//! OpenAI-compatible chat completions client.
//!
//! Local inference servers (llama.cpp and friends) expose
//! `POST /v1/chat/completions`; vision-capable models accept the image as an
//! `image_url` content part holding a `data:` URL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use super::{
    CompletionRequest, ModelClient, check_image, check_text_limit, endpoint, read_success_body,
};
use crate::constants::{COMPLETION_MAX_TOKENS, DEFAULT_MAX_PROMPT_CHARS};
use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Talks to one OpenAI-compatible completion server.
#[derive(Clone, Debug)]
pub struct OpenAiLikeClient {
    http: reqwest::Client,
    base_url: Url,
    model: String,
    api_key: Option<String>,
    max_prompt_chars: usize,
}

impl OpenAiLikeClient {
    /// Client for `model` served under `base_url` (e.g. `http://localhost:8082/v1`).
    pub fn new(http: reqwest::Client, base_url: Url, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            model: model.into(),
            api_key: None,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
        }
    }

    /// Sends `key` as a bearer token.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the prompt length cap.
    pub fn with_max_prompt_chars(mut self, max_prompt_chars: usize) -> Self {
        self.max_prompt_chars = max_prompt_chars;
        self
    }

    fn request_body(&self, request: &CompletionRequest<'_>) -> Value {
        let user_content = match request.image {
            Some(image) => json!([
                {"type": "text", "text": request.user},
                {"type": "image_url", "image_url": {"url": image.data_url()}},
            ]),
            None => json!(request.user),
        };
        json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": user_content},
            ],
            "max_tokens": COMPLETION_MAX_TOKENS,
            "temperature": 0,
        })
    }
}

#[async_trait]
impl ModelClient for OpenAiLikeClient {
    #[instrument(skip_all, fields(task = %request.task, model = %self.model))]
    async fn complete_text(&self, request: &CompletionRequest<'_>) -> Result<String, ClientError> {
        check_text_limit("system prompt", request.system, self.max_prompt_chars)?;
        check_text_limit("user prompt", &request.user, self.max_prompt_chars)?;
        if let Some(image) = request.image {
            check_image(image)?;
        }

        let mut builder = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .json(&self.request_body(request));
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let body = read_success_body(builder.send().await?).await?;
        let parsed: ChatCompletionResponse = serde_json::from_slice(&body).map_err(|err| {
            ClientError::Malformed(format!("Failed to parse chat completion JSON: {err}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                ClientError::Malformed("chat completion missing choices[0].message.content".into())
            })?;
        debug!("Completion for {}: {}", request.task, content);
        Ok(content)
    }
}
