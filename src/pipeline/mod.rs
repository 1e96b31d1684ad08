//! The decoration pipeline: validate, plan, generate.
//!
//! One [`Decorator`] is built at startup and shared by every request. A run
//! walks [`PipelineState`] forward exactly once; any stage failure moves it
//! to `Failed` and nothing after that stage runs.

use std::future::Future;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::ImageReader;
use tracing::{debug, info, instrument};

use crate::constants::{
    DEFAULT_GENERATION_TIMEOUT_SECS, DEFAULT_MAX_PROMPT_CHARS, DEFAULT_MODEL_TIMEOUT_SECS,
    QUERY_OVERHEAD_CHARS, REASON_INCONCLUSIVE,
};
use crate::error::{ClientError, PipelineError, Stage};
use crate::model::{ImageBackend, ImageInput, ModelClient};

pub mod generate;
pub mod plan;
pub mod validate;

pub use generate::Generator;
pub use plan::Planner;
pub use validate::{Validator, Verdict, parse_verdict};

/// One inbound decoration request.
#[derive(Clone, Debug)]
pub struct DecorationRequest {
    /// The uploaded photo
    pub image: ImageInput,
    prompt: Option<String>,
}

impl DecorationRequest {
    /// Builds a request; a blank prompt counts as no prompt.
    pub fn new(image: ImageInput, prompt: Option<String>) -> Self {
        let prompt = prompt
            .map(|prompt| prompt.trim().to_string())
            .filter(|prompt| !prompt.is_empty());
        Self { image, prompt }
    }

    /// The caller's styling request, if any.
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }
}

/// Outcome of the validation stage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationResult {
    /// The image shows an indoor room
    pub is_valid_room: bool,
    /// The request is about decorating; true when there was no request
    pub is_prompt_relevant: bool,
    /// Why the input was rejected; empty when accepted
    pub reason: String,
    /// What the vision model said about an accepted room; may be empty
    pub room_note: String,
}

impl ValidationResult {
    /// A result that lets the pipeline continue.
    pub fn accepted() -> Self {
        Self {
            is_valid_room: true,
            is_prompt_relevant: true,
            reason: String::new(),
            room_note: String::new(),
        }
    }

    /// Caller-facing rejection message, or `None` when the pipeline may continue.
    pub fn rejection(&self) -> Option<String> {
        if !self.is_valid_room {
            let detail = if self.reason == REASON_INCONCLUSIVE {
                "the vision model could not confirm it (inconclusive)".to_string()
            } else {
                self.reason.clone()
            };
            return Some(format!(
                "Image validation failed: the image is not a recognized indoor room; {detail}"
            ));
        }
        if !self.is_prompt_relevant {
            return Some(
                "Prompt validation failed: the request is not related to room decoration"
                    .to_string(),
            );
        }
        None
    }
}

/// What the image backend should do, plus a summary for the explanation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecorationPlan {
    /// Bounded instruction sent to the image backend
    pub generation_prompt: String,
    /// Short style description used only for the explanation
    pub style_summary: String,
}

/// The decorated image and what was done to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecorationResult {
    /// Encoded edited image
    pub image_bytes: Vec<u8>,
    /// Non-empty description of the changes
    pub explanation: String,
}

/// Where a pipeline run currently is.
#[derive(Debug)]
pub enum PipelineState {
    /// Checking the room and request
    Validating,
    /// Building the decoration plan
    Planning,
    /// Waiting for the image backend
    Generating(DecorationPlan),
    /// Finished with a result
    Done(DecorationResult),
    /// Stopped by an error
    Failed(PipelineError),
}

impl PipelineState {
    /// Lowercase state name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Validating => "validating",
            PipelineState::Planning => "planning",
            PipelineState::Generating(_) => "generating",
            PipelineState::Done(_) => "done",
            PipelineState::Failed(_) => "failed",
        }
    }
}

/// Request-size caps and per-stage network waits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PipelineLimits {
    /// Longest accepted caller prompt, in characters
    pub max_prompt_chars: usize,
    /// Wait for the validation and planning stages
    pub model_timeout: Duration,
    /// Wait for the generation stage
    pub generation_timeout: Duration,
}

impl PipelineLimits {
    /// Cap for a whole text or vision message: the caller's prompt plus the
    /// fixed question wrapped around it.
    pub fn message_chars(&self) -> usize {
        self.max_prompt_chars.saturating_add(QUERY_OVERHEAD_CHARS)
    }
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
            model_timeout: Duration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECS),
        }
    }
}

/// Runs the three stages in order for each request.
#[derive(Clone)]
pub struct Decorator {
    validator: Validator,
    planner: Planner,
    generator: Generator,
    limits: PipelineLimits,
}

impl Decorator {
    /// Wires the stages to their clients.
    pub fn new(
        vision: Arc<dyn ModelClient>,
        text: Arc<dyn ModelClient>,
        backend: Arc<dyn ImageBackend>,
        limits: PipelineLimits,
    ) -> Self {
        Self {
            validator: Validator::new(vision.clone()),
            planner: Planner::new(vision, text).with_max_prompt_chars(limits.max_prompt_chars),
            generator: Generator::new(backend),
            limits,
        }
    }

    /// Caps and timeouts in force.
    pub fn limits(&self) -> PipelineLimits {
        self.limits
    }

    /// Runs one request to completion: exactly one result or one error.
    #[instrument(skip_all, fields(has_prompt = request.prompt().is_some()))]
    pub async fn decorate(
        &self,
        request: DecorationRequest,
    ) -> Result<DecorationResult, PipelineError> {
        let request = self.check_input(request)?;
        let image = &request.image;
        let prompt = request.prompt();

        let mut room_note = String::new();
        let mut state = PipelineState::Validating;
        loop {
            info!("Pipeline state: {}", state.name());
            state = match state {
                PipelineState::Validating => {
                    let verdict = with_timeout(
                        Stage::Validation,
                        self.limits.model_timeout,
                        self.validator.validate(image, prompt),
                    )
                    .await;
                    match verdict {
                        Ok(result) => match result.rejection() {
                            Some(reason) => PipelineState::Failed(PipelineError::Rejected(reason)),
                            None => {
                                room_note = result.room_note;
                                PipelineState::Planning
                            }
                        },
                        Err(err) => PipelineState::Failed(err),
                    }
                }
                PipelineState::Planning => {
                    let plan = with_timeout(
                        Stage::Planning,
                        self.limits.model_timeout,
                        self.planner.plan(image, prompt),
                    )
                    .await;
                    match plan {
                        Ok(plan) => PipelineState::Generating(plan),
                        Err(err) => PipelineState::Failed(err),
                    }
                }
                PipelineState::Generating(plan) => {
                    let result = with_timeout(
                        Stage::Generation,
                        self.limits.generation_timeout,
                        self.generator.generate(image, &plan),
                    )
                    .await;
                    match result {
                        Ok(result) => PipelineState::Done(result),
                        Err(err) => PipelineState::Failed(err),
                    }
                }
                PipelineState::Done(mut result) => {
                    if !room_note.is_empty() {
                        result.explanation = format!("{}\n\nRoom check: {room_note}", result.explanation);
                    }
                    if let Some(prompt) = prompt {
                        result.explanation = format!("Your request: {prompt}\n\n{}", result.explanation);
                    }
                    info!("Pipeline finished");
                    return Ok(result);
                }
                PipelineState::Failed(err) => return Err(err),
            };
        }
    }

    /// Rejects unusable uploads before any model is asked anything.
    fn check_input(&self, mut request: DecorationRequest) -> Result<DecorationRequest, PipelineError> {
        let format = inspect_image(&request.image.bytes)?;
        if !request.image.media_type.starts_with("image/") {
            request.image.media_type = format.to_mime_type().to_string();
        }
        if let Some(prompt) = request.prompt() {
            let count = prompt.chars().count();
            if count > self.limits.max_prompt_chars {
                return Err(PipelineError::Input(format!(
                    "Prompt is too long ({count} characters, limit is {})",
                    self.limits.max_prompt_chars
                )));
            }
        }
        Ok(request)
    }
}

/// Confirms the bytes decode as a supported image and returns the format.
pub fn inspect_image(bytes: &[u8]) -> Result<image::ImageFormat, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::Input("The uploaded image is empty".to_string()));
    }
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| {
            debug!("Failed to guess image format: {}", err);
            PipelineError::Input("The uploaded file is not a supported image".to_string())
        })?;
    let format = reader.format().ok_or_else(|| {
        PipelineError::Input("The uploaded file is not a supported image".to_string())
    })?;
    reader.decode().map_err(|err| {
        debug!("Failed to decode image: {}", err);
        PipelineError::Input("The uploaded image could not be decoded".to_string())
    })?;
    Ok(format)
}

async fn with_timeout<T>(
    stage: Stage,
    limit: Duration,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or_else(|_| Err(PipelineError::at(stage)(ClientError::Timeout)))
}
