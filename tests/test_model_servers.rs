use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

use clap::Parser;
use xmas_decorator::cli::CliOptions;
use xmas_decorator::error::{ClientError, ErrorKind};
use xmas_decorator::model::fixed::festive_filter;
use xmas_decorator::model::{
    CloudImageBackend, CompletionRequest, ImageBackend, ImageInput, LocalDiffusionBackend,
    ModelClient, OpenAiLikeClient, QueryTask, http_client,
};
use xmas_decorator::pipeline::{DecorationRequest, Decorator, PipelineLimits};

/// Matches a raw body containing `needle`; multipart bodies carrying image
/// bytes are not valid UTF-8, so the string matchers never fire on them.
struct BodyContains(&'static [u8]);

impl Match for BodyContains {
    fn matches(&self, request: &Request) -> bool {
        request
            .body
            .windows(self.0.len())
            .any(|window| window == self.0)
    }
}

fn room_png() -> Vec<u8> {
    let img = ImageBuffer::from_fn(12, 12, |x, y| Rgb([(x * 20) as u8, 100, (y * 20) as u8]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode sample");
    out.into_inner()
}

fn base_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/v1", server.uri())).expect("mock url")
}

fn chat_reply(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    }))
}

fn text_client(server: &MockServer) -> OpenAiLikeClient {
    let http = http_client(Duration::from_secs(5)).expect("http client");
    OpenAiLikeClient::new(http, base_url(server), "gemma-test")
}

#[tokio::test]
async fn chat_completion_sends_image_and_reads_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-local"))
        .and(body_partial_json(json!({"model": "gemma-test"})))
        .and(body_string_contains("data:image/png;base64,"))
        .respond_with(chat_reply("YES, a living room"))
        .expect(1)
        .mount(&server)
        .await;

    let image = ImageInput::new(room_png(), "image/png");
    let reply = text_client(&server)
        .with_api_key("sk-local")
        .complete_text(&CompletionRequest {
            task: QueryTask::RoomCheck,
            system: "Answer YES or NO.",
            user: "Is this a room?".to_string(),
            image: Some(&image),
        })
        .await
        .expect("completion");
    assert_eq!(reply, "YES, a living room");
}

#[tokio::test]
async fn chat_completion_server_error_is_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let err = text_client(&server)
        .complete_text(&CompletionRequest {
            task: QueryTask::ThemeSummary,
            system: "Summarize.",
            user: "icy blue".to_string(),
            image: None,
        })
        .await
        .expect_err("should fail");
    assert!(matches!(err, ClientError::Status { status: 500, .. }));
}

#[tokio::test]
async fn chat_completion_without_choices_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = text_client(&server)
        .complete_text(&CompletionRequest {
            task: QueryTask::ThemeSummary,
            system: "Summarize.",
            user: "icy blue".to_string(),
            image: None,
        })
        .await
        .expect_err("should fail");
    assert!(matches!(err, ClientError::Malformed(_)));
}

#[tokio::test]
async fn overlong_prompt_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(chat_reply("YES"))
        .expect(0)
        .mount(&server)
        .await;

    let err = text_client(&server)
        .with_max_prompt_chars(10)
        .complete_text(&CompletionRequest {
            task: QueryTask::ThemeSummary,
            system: "Summarize.",
            user: "a much longer request than allowed".to_string(),
            image: None,
        })
        .await
        .expect_err("should fail");
    assert!(matches!(err, ClientError::InvalidRequest(_)));
}

#[tokio::test]
async fn local_backend_decodes_b64_json() {
    let server = MockServer::start().await;
    let source = room_png();
    let edited = festive_filter(&source).expect("filter");
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .and(BodyContains(b"name=\"response_format\""))
        .and(BodyContains(b"b64_json"))
        .and(BodyContains(b"Add tinsel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "b64_json": general_purpose::STANDARD.encode(&edited),
                "revised_prompt": "Added tinsel to the mantel."
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let http = http_client(Duration::from_secs(5)).expect("http client");
    let backend = LocalDiffusionBackend::new(http, base_url(&server), "qwen-edit");
    let result = backend
        .edit_image(&ImageInput::new(source, "image/png"), "Add tinsel")
        .await
        .expect("edit");
    assert_eq!(result.bytes, edited);
    assert_eq!(result.text.as_deref(), Some("Added tinsel to the mantel."));
}

#[tokio::test]
async fn cloud_backend_follows_result_url() {
    let server = MockServer::start().await;
    let source = room_png();
    let edited = festive_filter(&source).expect("filter");
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .and(header("authorization", "Bearer sk-cloud"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"url": format!("{}/files/out.png", server.uri())}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/out.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(edited.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let http = http_client(Duration::from_secs(5)).expect("http client");
    let backend = CloudImageBackend::new(http, base_url(&server), "dall-e-2", "sk-cloud");
    let result = backend
        .edit_image(&ImageInput::new(source, "image/png"), "Add tinsel")
        .await
        .expect("edit");
    assert_eq!(result.bytes, edited);
    assert!(result.text.is_none());
}

#[tokio::test]
async fn cloud_backend_overload_is_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let http = http_client(Duration::from_secs(5)).expect("http client");
    let backend = CloudImageBackend::new(http, base_url(&server), "gpt-image-1", "sk-cloud");
    let err = backend
        .edit_image(&ImageInput::new(room_png(), "image/png"), "Add tinsel")
        .await
        .expect_err("should fail");
    assert!(matches!(err, ClientError::Status { status: 503, .. }));
}

#[tokio::test]
async fn oversized_result_download_is_refused() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"url": format!("{}/files/huge.png", server.uri())}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/huge.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .mount(&server)
        .await;

    let http = http_client(Duration::from_secs(5)).expect("http client");
    let backend = LocalDiffusionBackend::new(http, base_url(&server), "qwen-edit")
        .with_max_image_bytes(1024);
    let err = backend
        .edit_image(&ImageInput::new(room_png(), "image/png"), "Add tinsel")
        .await
        .expect_err("should refuse");
    assert!(matches!(err, ClientError::Malformed(_)));
}

#[tokio::test]
async fn prompt_just_under_the_cap_is_accepted() {
    let server = MockServer::start().await;
    let source = room_png();
    let edited = festive_filter(&source).expect("filter");
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(chat_reply("YES, a bright living room."))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": general_purpose::STANDARD.encode(&edited)}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let url = base_url(&server).to_string();
    let cli = CliOptions::try_parse_from([
        "xmas-decorator",
        "--text-url",
        url.as_str(),
        "--vision-url",
        url.as_str(),
        "--diffusion-url",
        url.as_str(),
        "--image-backend",
        "local",
        "--model-backend",
        "server",
        "--max-prompt-chars",
        "2000",
    ])
    .expect("parse cli");
    let decorator = cli.build_decorator().expect("decorator");

    let prompt = "icy blue ".repeat(221);
    let prompt = prompt.trim().to_string();
    assert!(prompt.chars().count() > 1950 && prompt.chars().count() <= 2000);
    let result = decorator
        .decorate(DecorationRequest::new(
            ImageInput::new(source, "image/png"),
            Some(prompt),
        ))
        .await
        .expect("prompt under the cap should decorate");
    assert_eq!(result.image_bytes, edited);
}

async fn pipeline_against(server: &MockServer) -> Decorator {
    let http = http_client(Duration::from_secs(5)).expect("http client");
    let vision = Arc::new(OpenAiLikeClient::new(
        http.clone(),
        base_url(server),
        "vision-test",
    ));
    let text = Arc::new(OpenAiLikeClient::new(
        http.clone(),
        base_url(server),
        "text-test",
    ));
    let backend = Arc::new(LocalDiffusionBackend::new(
        http,
        base_url(server),
        "qwen-edit",
    ));
    Decorator::new(vision, text, backend, PipelineLimits::default())
}

#[tokio::test]
async fn pipeline_reports_generation_backend_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(chat_reply("YES, this is a cozy living room."))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(ResponseTemplate::new(503).set_body_string("gpu busy"))
        .expect(1)
        .mount(&server)
        .await;

    let err = pipeline_against(&server)
        .await
        .decorate(DecorationRequest::new(
            ImageInput::new(room_png(), "image/png"),
            Some("make it icy blue".to_string()),
        ))
        .await
        .expect_err("should fail");
    assert_eq!(err.stage_tag(), "generation");
    assert_eq!(err.kind(), ErrorKind::BackendError);
    assert!(err.detail().starts_with("Image generation failed"));
    assert!(!err.detail().contains("gpu busy"));
}

#[tokio::test]
async fn pipeline_succeeds_end_to_end() {
    let server = MockServer::start().await;
    let source = room_png();
    let edited = festive_filter(&source).expect("filter");
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "text-test"})))
        .respond_with(chat_reply("Icy blue winter"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("furnishings"))
        .respond_with(chat_reply("sofa, fireplace, window"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(chat_reply("YES"))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/edits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"b64_json": general_purpose::STANDARD.encode(&edited)}]
        })))
        .mount(&server)
        .await;

    let result = pipeline_against(&server)
        .await
        .decorate(DecorationRequest::new(
            ImageInput::new(source, "image/png"),
            Some("make it icy blue".to_string()),
        ))
        .await
        .expect("decorate");
    assert_eq!(result.image_bytes, edited);
    assert!(result.explanation.starts_with("Your request: make it icy blue"));
    assert!(result.explanation.contains("icy blue winter theme"));
    assert!(result.explanation.contains("sofa, fireplace and window"));
}
