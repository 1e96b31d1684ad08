//! Generation stage: hands the source image and plan to the image backend.

use std::sync::Arc;

use tracing::{info, instrument};

use super::plan::indefinite_article;
use super::{DecorationPlan, DecorationResult};
use crate::error::{ClientError, PipelineError, Stage};
use crate::model::{ImageBackend, ImageInput};

/// Runs the edit on whichever backend was configured at startup.
#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn ImageBackend>,
}

impl Generator {
    /// Generator sending edits to `backend`.
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self { backend }
    }

    /// Edits `image` per `plan`; an empty, corrupt or unchanged result is a failure.
    #[instrument(skip_all)]
    pub async fn generate(
        &self,
        image: &ImageInput,
        plan: &DecorationPlan,
    ) -> Result<DecorationResult, PipelineError> {
        let edited = self
            .backend
            .edit_image(image, &plan.generation_prompt)
            .await
            .map_err(PipelineError::at(Stage::Generation))?;
        check_output(&image.bytes, &edited.bytes).map_err(PipelineError::at(Stage::Generation))?;
        info!("Image backend returned {} bytes", edited.bytes.len());

        let explanation = edited
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| synthesize_explanation(plan));

        Ok(DecorationResult {
            image_bytes: edited.bytes,
            explanation,
        })
    }
}

fn check_output(source: &[u8], output: &[u8]) -> Result<(), ClientError> {
    if output.is_empty() {
        return Err(ClientError::Malformed(
            "backend returned an empty image".to_string(),
        ));
    }
    if output == source {
        return Err(ClientError::Malformed(
            "backend returned the source image unchanged".to_string(),
        ));
    }
    image::load_from_memory(output)
        .map_err(|err| ClientError::Malformed(format!("backend returned a corrupt image: {err}")))?;
    Ok(())
}

fn synthesize_explanation(plan: &DecorationPlan) -> String {
    format!(
        "Decorated your room with {} {}, keeping the original layout and lighting.",
        indefinite_article(&plan.style_summary),
        plan.style_summary
    )
}
