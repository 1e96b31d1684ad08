//! CLI parser
use clap::{Parser, ValueEnum};
use std::num::NonZeroU16;
use url::Url;

use crate::constants::{
    DEFAULT_GENERATION_TIMEOUT_SECS, DEFAULT_MAX_PROMPT_CHARS, DEFAULT_MAX_UPLOAD_BYTES,
    DEFAULT_MODEL_TIMEOUT_SECS,
};

/// Which text/vision client to use.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModelBackendKind {
    /// OpenAI-compatible completion servers
    Server,
    /// Canned replies, no network
    Fixed,
}

/// Which image edit backend to use.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ImageBackendKind {
    /// Local diffusion server
    Local,
    /// Hosted image API, needs an API key
    Cloud,
    /// Local tint filter, no network
    Fixed,
}

impl std::fmt::Display for ModelBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelBackendKind::Server => write!(f, "server"),
            ModelBackendKind::Fixed => write!(f, "fixed"),
        }
    }
}

impl std::fmt::Display for ImageBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageBackendKind::Local => write!(f, "local"),
            ImageBackendKind::Cloud => write!(f, "cloud"),
            ImageBackendKind::Fixed => write!(f, "fixed"),
        }
    }
}

#[derive(Parser, Debug, Clone)]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "XMAS_DEBUG")]
    /// Enable debug logging. Env: XMAS_DEBUG
    pub debug: bool,
    #[clap(long, short, default_value = "8000", env = "XMAS_PORT")]
    /// http listener, defaults to `8000`.
    /// Env: XMAS_PORT
    pub port: NonZeroU16,
    #[clap(long, short, default_value = "127.0.0.1", env = "XMAS_LISTEN_ADDRESS")]
    /// Listen address, defaults to `127.0.0.1`.
    /// Env: XMAS_LISTEN_ADDRESS
    pub listen_address: String,

    #[clap(long, default_value = "http://localhost:8081/v1", env = "XMAS_TEXT_URL")]
    /// Base URL of the text completion server.
    /// Env: XMAS_TEXT_URL
    pub text_url: Url,
    #[clap(long, default_value = "unsloth/gemma-3-270m-it-GGUF", env = "XMAS_TEXT_MODEL")]
    /// Model name sent to the text server. Env: XMAS_TEXT_MODEL
    pub text_model: String,
    #[clap(long, default_value = "http://localhost:8082/v1", env = "XMAS_VISION_URL")]
    /// Base URL of the vision completion server.
    /// Env: XMAS_VISION_URL
    pub vision_url: Url,
    #[clap(long, default_value = "unsloth/gemma-3-4b-it-GGUF", env = "XMAS_VISION_MODEL")]
    /// Model name sent to the vision server. Env: XMAS_VISION_MODEL
    pub vision_model: String,
    #[clap(long, value_enum, default_value_t = ModelBackendKind::Server, env = "XMAS_MODEL_BACKEND")]
    /// Text/vision client, `server` or `fixed`. Env: XMAS_MODEL_BACKEND
    pub model_backend: ModelBackendKind,

    #[clap(long, value_enum, default_value_t = ImageBackendKind::Local, env = "XMAS_IMAGE_BACKEND")]
    /// Image backend, `local`, `cloud` or `fixed`. Env: XMAS_IMAGE_BACKEND
    pub image_backend: ImageBackendKind,
    #[clap(long, default_value = "http://localhost:8083/v1", env = "XMAS_DIFFUSION_URL")]
    /// Base URL of the local diffusion server.
    /// Env: XMAS_DIFFUSION_URL
    pub diffusion_url: Url,
    #[clap(
        long,
        default_value = "unsloth/Qwen-Image-Edit-2511-GGUF",
        env = "XMAS_DIFFUSION_MODEL"
    )]
    /// Model name sent to the diffusion server. Env: XMAS_DIFFUSION_MODEL
    pub diffusion_model: String,
    #[clap(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    /// API key for the cloud image backend. Env: OPENAI_API_KEY
    pub openai_api_key: Option<String>,
    #[clap(long, default_value = "https://api.openai.com/v1", env = "XMAS_OPENAI_BASE_URL")]
    /// Base URL of the cloud image API. Env: XMAS_OPENAI_BASE_URL
    pub openai_base_url: Url,
    #[clap(long, default_value = "gpt-image-1", env = "XMAS_OPENAI_IMAGE_MODEL")]
    /// Cloud image model. Env: XMAS_OPENAI_IMAGE_MODEL
    pub openai_image_model: String,

    #[clap(long, default_value_t = DEFAULT_MODEL_TIMEOUT_SECS, env = "XMAS_MODEL_TIMEOUT_SECS")]
    /// Seconds to wait for the validation and planning stages.
    /// Env: XMAS_MODEL_TIMEOUT_SECS
    pub model_timeout_secs: u64,
    #[clap(long, default_value_t = DEFAULT_GENERATION_TIMEOUT_SECS, env = "XMAS_GENERATION_TIMEOUT_SECS")]
    /// Seconds to wait for the image backend.
    /// Env: XMAS_GENERATION_TIMEOUT_SECS
    pub generation_timeout_secs: u64,
    #[clap(long, default_value_t = DEFAULT_MAX_PROMPT_CHARS, env = "XMAS_MAX_PROMPT_CHARS")]
    /// Longest accepted prompt, in characters. Env: XMAS_MAX_PROMPT_CHARS
    pub max_prompt_chars: usize,
    #[clap(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "XMAS_MAX_UPLOAD_BYTES")]
    /// Largest accepted request body, in bytes. Env: XMAS_MAX_UPLOAD_BYTES
    pub max_upload_bytes: usize,
    #[clap(long, default_value = "1", env = "XMAS_PIPELINE_ATTEMPTS")]
    /// Whole-pipeline attempts on transport or backend failure, `1` disables retry.
    /// Env: XMAS_PIPELINE_ATTEMPTS
    pub pipeline_attempts: NonZeroU16,
}
