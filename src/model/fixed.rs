//! Fixed model implementations for mock mode.
//!
//! Selected at startup when no model servers are available; they never touch
//! the network.

use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};

use super::{
    CompletionRequest, EditedImage, ImageBackend, ImageInput, ModelClient, QueryTask, check_image,
};
use crate::error::ClientError;

/// Answers every query from a per-task reply table.
#[derive(Clone, Debug)]
pub struct FixedModelClient {
    replies: HashMap<QueryTask, String>,
    fallback: String,
}

impl FixedModelClient {
    /// Client that answers `fallback` for any task without a specific reply.
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: HashMap::new(),
            fallback: fallback.into(),
        }
    }

    /// Sets the reply for one task.
    pub fn with_reply(mut self, task: QueryTask, reply: impl Into<String>) -> Self {
        self.replies.insert(task, reply.into());
        self
    }

    /// Mock-mode client: accepts every image and request.
    pub fn accepting() -> Self {
        Self::new("")
            .with_reply(
                QueryTask::RoomCheck,
                "YES - mock mode treats every upload as a room.",
            )
            .with_reply(
                QueryTask::RelevanceCheck,
                "YES - mock mode treats every request as decoration.",
            )
            .with_reply(QueryTask::Furnishings, "sofa, window, bookshelf")
    }
}

#[async_trait]
impl ModelClient for FixedModelClient {
    async fn complete_text(&self, request: &CompletionRequest<'_>) -> Result<String, ClientError> {
        Ok(self
            .replies
            .get(&request.task)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Applies a warm tint and a sprinkle of snow locally instead of calling a model.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedImageBackend;

#[async_trait]
impl ImageBackend for FixedImageBackend {
    async fn edit_image(
        &self,
        image: &ImageInput,
        _instruction: &str,
    ) -> Result<EditedImage, ClientError> {
        check_image(image)?;
        let source = image.bytes.clone();
        let bytes = tokio::task::spawn_blocking(move || festive_filter(&source))
            .await
            .map_err(|err| ClientError::Transport(err.to_string()))??;
        Ok(EditedImage { bytes, text: None })
    }
}

/// Decodes `bytes`, tints it and returns a PNG.
pub fn festive_filter(bytes: &[u8]) -> Result<Vec<u8>, ClientError> {
    let source = image::load_from_memory(bytes)
        .map_err(|err| ClientError::InvalidRequest(format!("Failed to decode image: {err}")))?;
    let mut canvas = source.to_rgba8();
    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let [r, g, b, a] = pixel.0;
        pixel.0 = if is_snowflake(x, y) {
            [255, 255, 255, a]
        } else {
            [blend(r, 196), blend(g, 40), blend(b, 48), a]
        };
    }

    let mut output = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut output, ImageFormat::Png)
        .map_err(|err| ClientError::Malformed(format!("Failed to encode image: {err}")))?;
    Ok(output.into_inner())
}

fn blend(channel: u8, tint: u8) -> u8 {
    // 80% source, 20% tint; never exceeds 255
    ((u16::from(channel) * 4 + u16::from(tint)) / 5) as u8
}

fn is_snowflake(x: u32, y: u32) -> bool {
    (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729)) % 97 == 0
}
