//! Image edit backends speaking the OpenAI `images/edits` shape.
//!
//! The local diffusion server and the cloud API take the same multipart form
//! and answer with `data[0].b64_json` or `data[0].url`; they differ in auth
//! and in which optional fields they understand.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use super::{
    EditedImage, ImageBackend, ImageInput, check_image, check_text_limit, endpoint,
    read_capped_body, read_success_body,
};
use crate::constants::{DEFAULT_MAX_PROMPT_CHARS, DEFAULT_MAX_UPLOAD_BYTES};
use crate::error::ClientError;

#[derive(Deserialize, Debug)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize, Debug)]
struct ImageData {
    b64_json: Option<String>,
    url: Option<String>,
    revised_prompt: Option<String>,
}

fn edit_form(image: &ImageInput, model: &str, instruction: &str) -> Result<Form, ClientError> {
    let part = Part::bytes(image.bytes.clone())
        .file_name(image.file_name())
        .mime_str(&image.media_type)
        .map_err(|err| ClientError::InvalidRequest(err.to_string()))?;
    Ok(Form::new()
        .text("model", model.to_string())
        .text("prompt", instruction.to_string())
        .text("n", "1")
        .part("image", part))
}

async fn send_edit(
    http: &reqwest::Client,
    request: reqwest::RequestBuilder,
    max_image_bytes: usize,
) -> Result<EditedImage, ClientError> {
    let body = read_success_body(request.send().await?).await?;
    let parsed: ImagesResponse = serde_json::from_slice(&body).map_err(|err| {
        ClientError::Malformed(format!("Failed to parse images/edits JSON: {err}"))
    })?;
    let first = parsed
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ClientError::Malformed("No image data returned".to_string()))?;

    let text = first
        .revised_prompt
        .filter(|prompt| !prompt.trim().is_empty());
    if let Some(revised) = text.as_deref() {
        debug!("Revised prompt from image backend: {revised}");
    }

    let bytes = if let Some(b64_json) = first.b64_json {
        general_purpose::STANDARD
            .decode(b64_json.trim())
            .map_err(|err| ClientError::Malformed(format!("Failed to base64-decode image: {err}")))?
    } else if let Some(url) = first.url {
        info!("Downloading edited image from backend URL");
        read_capped_body(http.get(url).send().await?, max_image_bytes).await?
    } else {
        return Err(ClientError::Malformed(
            "Image response missing b64_json and url fields".to_string(),
        ));
    };

    Ok(EditedImage { bytes, text })
}

/// Local diffusion server exposing an OpenAI-style `images/edits` route.
#[derive(Clone, Debug)]
pub struct LocalDiffusionBackend {
    http: reqwest::Client,
    base_url: Url,
    model: String,
    max_prompt_chars: usize,
    max_image_bytes: usize,
}

impl LocalDiffusionBackend {
    /// Backend for `model` served under `base_url` (e.g. `http://localhost:8083/v1`).
    pub fn new(http: reqwest::Client, base_url: Url, model: impl Into<String>) -> Self {
        Self {
            http,
            base_url,
            model: model.into(),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            max_image_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Overrides the instruction length cap.
    pub fn with_max_prompt_chars(mut self, max_prompt_chars: usize) -> Self {
        self.max_prompt_chars = max_prompt_chars;
        self
    }

    /// Caps the size of an image downloaded from a result URL.
    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }
}

#[async_trait]
impl ImageBackend for LocalDiffusionBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn edit_image(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> Result<EditedImage, ClientError> {
        check_image(image)?;
        check_text_limit("instruction", instruction, self.max_prompt_chars)?;

        let form = edit_form(image, &self.model, instruction)?.text("response_format", "b64_json");
        let request = self
            .http
            .post(endpoint(&self.base_url, "images/edits"))
            .multipart(form);
        send_edit(&self.http, request, self.max_image_bytes).await
    }
}

/// Hosted image model reached with an API key.
#[derive(Clone)]
pub struct CloudImageBackend {
    http: reqwest::Client,
    base_url: Url,
    model: String,
    api_key: String,
    max_prompt_chars: usize,
    max_image_bytes: usize,
}

impl std::fmt::Debug for CloudImageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudImageBackend")
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl CloudImageBackend {
    /// Backend for `model` at `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url,
            model: model.into(),
            api_key: api_key.into(),
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            max_image_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Overrides the instruction length cap.
    pub fn with_max_prompt_chars(mut self, max_prompt_chars: usize) -> Self {
        self.max_prompt_chars = max_prompt_chars;
        self
    }

    /// Caps the size of an image downloaded from a result URL.
    pub fn with_max_image_bytes(mut self, max_image_bytes: usize) -> Self {
        self.max_image_bytes = max_image_bytes;
        self
    }
}

#[async_trait]
impl ImageBackend for CloudImageBackend {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn edit_image(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> Result<EditedImage, ClientError> {
        check_image(image)?;
        check_text_limit("instruction", instruction, self.max_prompt_chars)?;

        // GPT image models always answer in base64 and reject response_format.
        let form = edit_form(image, &self.model, instruction)?;
        let form = if self.model.starts_with("gpt-image") {
            form.text("size", "auto").text("quality", "high")
        } else {
            form.text("response_format", "b64_json")
        };
        let request = self
            .http
            .post(endpoint(&self.base_url, "images/edits"))
            .bearer_auth(&self.api_key)
            .multipart(form);
        send_edit(&self.http, request, self.max_image_bytes).await
    }
}
