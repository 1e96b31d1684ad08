use axum::extract::multipart::{Field, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::response::Json;
use base64::Engine;
use base64::engine::general_purpose;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::AppState;
use crate::error::PipelineError;
use crate::model::ImageInput;
use crate::pipeline::{DecorationRequest, inspect_image};

/// Body of a successful `POST /api/decorate`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecorateResponse {
    /// Base64 of the edited image, no `data:` prefix
    pub decorated_image: String,
    /// What was changed
    pub explanation: String,
}

fn unreadable(err: axum::extract::multipart::MultipartError) -> PipelineError {
    debug!("Multipart read failed: {}", err);
    PipelineError::Input(format!("Could not read the upload: {}", err.body_text()))
}

async fn read_image(field: Field<'_>) -> Result<ImageInput, PipelineError> {
    if field.file_name().is_none_or(|name| name.trim().is_empty()) {
        return Err(PipelineError::Input(
            "The image part must be a file upload".to_string(),
        ));
    }
    let declared = field.content_type().map(str::to_string);
    let bytes = field.bytes().await.map_err(unreadable)?;
    if bytes.is_empty() {
        return Err(PipelineError::Input("The uploaded image is empty".to_string()));
    }
    let media_type = match declared {
        Some(media_type) if media_type.starts_with("image/") => media_type,
        _ => inspect_image(&bytes)?.to_mime_type().to_string(),
    };
    Ok(ImageInput::new(bytes.to_vec(), media_type))
}

async fn read_request(mut multipart: Multipart) -> Result<DecorationRequest, PipelineError> {
    let mut image: Option<ImageInput> = None;
    let mut prompt: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(unreadable)? {
        match field.name().unwrap_or_default() {
            "image" => image = Some(read_image(field).await?),
            "prompt" => prompt = Some(field.text().await.map_err(unreadable)?),
            other => debug!("Ignoring form field {:?}", other),
        }
    }

    let image = image.ok_or_else(|| {
        PipelineError::Input("Missing the image file in the 'image' form field".to_string())
    })?;
    Ok(DecorationRequest::new(image, prompt))
}

pub(crate) async fn decorate_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DecorateResponse>, PipelineError> {
    let multipart = multipart.map_err(|rejection| {
        PipelineError::Input(format!(
            "Expected a multipart/form-data upload: {}",
            rejection.body_text()
        ))
    })?;
    let request = read_request(multipart).await?;
    info!(
        "Decoration requested: {} bytes of {}, prompt given: {}",
        request.image.bytes.len(),
        request.image.media_type,
        request.prompt().is_some()
    );

    let attempts = state.attempts.get();
    let mut attempt = 1;
    let result = loop {
        match state.decorator.decorate(request.clone()).await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    "Attempt {}/{} failed ({}), retrying: {}",
                    attempt,
                    attempts,
                    err.stage_tag(),
                    err
                );
                attempt += 1;
            }
            other => break other?,
        }
    };

    Ok(Json(DecorateResponse {
        decorated_image: general_purpose::STANDARD.encode(&result.image_bytes),
        explanation: result.explanation,
    }))
}
