//! Config handling

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::info;
use tracing::log::LevelFilter;

use crate::cli::{CliOptions, ImageBackendKind, ModelBackendKind};
use crate::model::{
    CloudImageBackend, FixedImageBackend, FixedModelClient, ImageBackend, LocalDiffusionBackend,
    ModelClient, OpenAiLikeClient, http_client,
};
use crate::pipeline::{Decorator, PipelineLimits};

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

impl CliOptions {
    /// Caps and timeouts for the pipeline.
    pub fn limits(&self) -> PipelineLimits {
        PipelineLimits {
            max_prompt_chars: self.max_prompt_chars,
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            generation_timeout: Duration::from_secs(self.generation_timeout_secs),
        }
    }

    /// Builds the pipeline with the configured clients; called once at startup.
    pub fn build_decorator(&self) -> anyhow::Result<Decorator> {
        let limits = self.limits();
        if limits.model_timeout.is_zero() || limits.generation_timeout.is_zero() {
            return Err(anyhow!("Timeouts must be at least one second"));
        }

        let (vision, text): (Arc<dyn ModelClient>, Arc<dyn ModelClient>) = match self.model_backend
        {
            ModelBackendKind::Server => {
                let http = http_client(limits.model_timeout)
                    .context("Failed to build model HTTP client")?;
                let vision = OpenAiLikeClient::new(
                    http.clone(),
                    self.vision_url.clone(),
                    &self.vision_model,
                )
                .with_max_prompt_chars(limits.message_chars());
                let text = OpenAiLikeClient::new(http, self.text_url.clone(), &self.text_model)
                    .with_max_prompt_chars(limits.message_chars());
                (Arc::new(vision), Arc::new(text))
            }
            ModelBackendKind::Fixed => {
                let client = Arc::new(FixedModelClient::accepting());
                (client.clone(), client)
            }
        };

        let backend: Arc<dyn ImageBackend> = match self.image_backend {
            ImageBackendKind::Local => {
                let http = http_client(limits.generation_timeout)
                    .context("Failed to build image HTTP client")?;
                Arc::new(
                    LocalDiffusionBackend::new(
                        http,
                        self.diffusion_url.clone(),
                        &self.diffusion_model,
                    )
                    .with_max_prompt_chars(self.max_prompt_chars)
                    .with_max_image_bytes(self.max_upload_bytes),
                )
            }
            ImageBackendKind::Cloud => {
                let api_key = self
                    .openai_api_key
                    .as_deref()
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .ok_or_else(|| anyhow!("The cloud image backend needs OPENAI_API_KEY"))?;
                let http = http_client(limits.generation_timeout)
                    .context("Failed to build image HTTP client")?;
                Arc::new(
                    CloudImageBackend::new(
                        http,
                        self.openai_base_url.clone(),
                        &self.openai_image_model,
                        api_key,
                    )
                    .with_max_prompt_chars(self.max_prompt_chars)
                    .with_max_image_bytes(self.max_upload_bytes),
                )
            }
            ImageBackendKind::Fixed => Arc::new(FixedImageBackend),
        };

        info!(
            "Pipeline configured: model backend {}, image backend {}",
            self.model_backend, self.image_backend
        );
        Ok(Decorator::new(vision, text, backend, limits))
    }
}
