//! Clients for the external model servers.
//!
//! Two capabilities are needed by the pipeline: text completion (optionally
//! grounded on an image) and image editing. Each is a trait so the pipeline
//! never knows whether it is talking to a local server, a cloud API, or the
//! fixed implementations used in mock mode.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose;
use tracing::debug;

use crate::error::ClientError;

pub mod fixed;
pub mod images;
pub mod openai_like;

pub use fixed::{FixedImageBackend, FixedModelClient};
pub use images::{CloudImageBackend, LocalDiffusionBackend};
pub use openai_like::OpenAiLikeClient;

/// An uploaded image and its declared media type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageInput {
    /// Raw encoded image bytes
    pub bytes: Vec<u8>,
    /// Media type such as `image/png`
    pub media_type: String,
}

impl ImageInput {
    /// Wraps encoded bytes with their media type.
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
        }
    }

    /// `data:` URL form used by vision chat requests.
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }

    /// File name to use for multipart uploads.
    pub fn file_name(&self) -> String {
        let ext = match self.media_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "jpg",
        };
        format!("image.{ext}")
    }
}

/// What a completion request is for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueryTask {
    /// Does the image show an indoor room
    RoomCheck,
    /// Is the caller's request about decorating
    RelevanceCheck,
    /// Name the key furnishings in the room
    Furnishings,
    /// Condense the caller's request into a theme
    ThemeSummary,
}

impl std::fmt::Display for QueryTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryTask::RoomCheck => write!(f, "room_check"),
            QueryTask::RelevanceCheck => write!(f, "relevance_check"),
            QueryTask::Furnishings => write!(f, "furnishings"),
            QueryTask::ThemeSummary => write!(f, "theme_summary"),
        }
    }
}

/// A single system+user completion, optionally with an attached image.
#[derive(Clone, Debug)]
pub struct CompletionRequest<'a> {
    /// Purpose of the query
    pub task: QueryTask,
    /// System instruction
    pub system: &'static str,
    /// User message
    pub user: String,
    /// Image for vision-grounded queries
    pub image: Option<&'a ImageInput>,
}

/// Text completion against a model server.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Returns the model's text reply.
    async fn complete_text(&self, request: &CompletionRequest<'_>) -> Result<String, ClientError>;
}

/// Edited image plus whatever text the backend sent along.
#[derive(Clone, Debug)]
pub struct EditedImage {
    /// Encoded output image
    pub bytes: Vec<u8>,
    /// Accompanying text, if any
    pub text: Option<String>,
}

/// Image editing backend.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Applies `instruction` to `image`.
    async fn edit_image(
        &self,
        image: &ImageInput,
        instruction: &str,
    ) -> Result<EditedImage, ClientError>;
}

/// Builds the shared HTTP client for one model server.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|err| ClientError::Transport(err.to_string()))
}

/// Rejects strings over the character cap before they go on the wire.
pub(crate) fn check_text_limit(label: &str, text: &str, max_chars: usize) -> Result<(), ClientError> {
    let count = text.chars().count();
    if count > max_chars {
        return Err(ClientError::InvalidRequest(format!(
            "{label} is {count} characters, limit is {max_chars}"
        )));
    }
    Ok(())
}

pub(crate) fn check_image(image: &ImageInput) -> Result<(), ClientError> {
    if image.bytes.is_empty() {
        return Err(ClientError::InvalidRequest("image is empty".to_string()));
    }
    Ok(())
}

/// Joins an endpoint path onto a base URL such as `http://localhost:8082/v1`.
pub(crate) fn endpoint(base_url: &url::Url, path: &str) -> String {
    format!("{}/{}", base_url.as_str().trim_end_matches('/'), path)
}

/// Reads the body, turning non-2xx replies into [`ClientError::Status`].
pub(crate) async fn read_success_body(resp: reqwest::Response) -> Result<Vec<u8>, ClientError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).to_string();
        debug!("Model server replied {status}: {body}");
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(bytes.to_vec())
}

/// Reads a 2xx body of at most `max_bytes`, chunk by chunk.
pub(crate) async fn read_capped_body(
    mut resp: reqwest::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, ClientError> {
    if !resp.status().is_success() {
        return read_success_body(resp).await;
    }
    let too_large = || ClientError::Malformed(format!("body exceeds {max_bytes} bytes"));
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if resp.content_length().is_some_and(|len| len > limit) {
        return Err(too_large());
    }
    let mut bytes = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if bytes.len().saturating_add(chunk.len()) > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
