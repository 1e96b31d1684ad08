//! Error handling

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Failures talking to a model server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection refused, reset, DNS failure and friends
    #[error("transport error: {0}")]
    Transport(String),
    /// No response inside the allotted time
    #[error("request timed out")]
    Timeout,
    /// The server answered with a non-2xx status
    #[error("backend returned HTTP {status}")]
    Status {
        /// HTTP status code reported by the server
        status: u16,
        /// Response body, kept for logs only
        body: String,
    },
    /// The body was missing expected fields or could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Refused locally before anything was sent
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::Malformed(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl ClientError {
    /// Short description safe to show to a caller.
    fn public_reason(&self) -> String {
        match self {
            ClientError::Transport(_) => "model server is unreachable".to_string(),
            ClientError::Timeout => "model server did not respond in time".to_string(),
            ClientError::Status { status, .. } => format!("backend returned HTTP {status}"),
            ClientError::Malformed(_) => "backend returned an unreadable response".to_string(),
            ClientError::InvalidRequest(_) => "request exceeded backend limits".to_string(),
        }
    }
}

/// Pipeline stage that produced a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    /// Room and request checks
    Validation,
    /// Decoration planning
    Planning,
    /// Image editing
    Generation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Validation => write!(f, "validation"),
            Stage::Planning => write!(f, "planning"),
            Stage::Generation => write!(f, "generation"),
        }
    }
}

/// Caller-facing classification of a failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Missing or invalid upload
    InputError,
    /// Image is not a room, or the request is off topic
    ValidationRejected,
    /// A model server was unreachable, slow, or sent garbage
    TransportError,
    /// A model server answered with an explicit failure status
    BackendError,
}

/// The single failure representation of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The caller sent something unusable
    #[error("{0}")]
    Input(String),
    /// Validation ran and said no
    #[error("{0}")]
    Rejected(String),
    /// A stage could not complete because its model call failed
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Stage that was running
        stage: Stage,
        /// Underlying client failure
        source: ClientError,
    },
}

impl PipelineError {
    /// Wraps a client failure raised while `stage` was running.
    pub fn at(stage: Stage) -> impl FnOnce(ClientError) -> Self {
        move |source| PipelineError::Stage { stage, source }
    }

    /// Stage tag: `input`, `validation`, `planning`, `generation` or `transport`.
    ///
    /// Model failures during validation are reported as `transport`, since the
    /// validation stage itself only ever fails by rejecting.
    pub fn stage_tag(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::Rejected(_) => "validation",
            PipelineError::Stage {
                stage: Stage::Validation,
                ..
            } => "transport",
            PipelineError::Stage {
                stage: Stage::Planning,
                ..
            } => "planning",
            PipelineError::Stage {
                stage: Stage::Generation,
                ..
            } => "generation",
        }
    }

    /// Taxonomy bucket for this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::InputError,
            PipelineError::Rejected(_) => ErrorKind::ValidationRejected,
            PipelineError::Stage {
                source: ClientError::Status { .. },
                ..
            } => ErrorKind::BackendError,
            PipelineError::Stage { .. } => ErrorKind::TransportError,
        }
    }

    /// True for failures a deployment may retry by re-running the whole pipeline.
    ///
    /// Requests refused locally would be refused again, so they never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Stage {
                source: ClientError::InvalidRequest(_),
                ..
            } => false,
            _ => matches!(
                self.kind(),
                ErrorKind::TransportError | ErrorKind::BackendError
            ),
        }
    }

    /// HTTP status reported to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Input(_) | PipelineError::Rejected(_) => StatusCode::BAD_REQUEST,
            PipelineError::Stage {
                source: ClientError::Timeout,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Stage { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Human-readable message for the caller, free of internal detail.
    pub fn detail(&self) -> String {
        match self {
            PipelineError::Input(message) | PipelineError::Rejected(message) => message.clone(),
            PipelineError::Stage { stage, source } => {
                let prefix = match stage {
                    Stage::Validation => "Image validation could not complete",
                    Stage::Planning => "Decoration planning failed",
                    Stage::Generation => "Image generation failed",
                };
                format!("{prefix}: {}", source.public_reason())
            }
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// What went wrong, for humans
    pub detail: String,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> axum::response::Response {
        match self.kind() {
            ErrorKind::InputError | ErrorKind::ValidationRejected => {
                info!("Request rejected ({}): {}", self.stage_tag(), self);
            }
            ErrorKind::TransportError | ErrorKind::BackendError => {
                error!("Pipeline failed ({}): {}", self.stage_tag(), self);
            }
        }
        let body = ErrorBody {
            detail: self.detail(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_transport_failures_are_tagged_transport() {
        let err = PipelineError::at(Stage::Validation)(ClientError::Timeout);
        assert_eq!(err.stage_tag(), "transport");
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn backend_status_is_a_backend_error() {
        let err = PipelineError::at(Stage::Generation)(ClientError::Status {
            status: 503,
            body: "overloaded at gpu-node-7".to_string(),
        });
        assert_eq!(err.stage_tag(), "generation");
        assert_eq!(err.kind(), ErrorKind::BackendError);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(err.is_retryable());
        let detail = err.detail();
        assert!(detail.contains("Image generation failed"));
        assert!(detail.contains("503"));
        assert!(!detail.contains("gpu-node-7"));
    }

    #[test]
    fn caller_mistakes_are_not_retryable() {
        assert!(!PipelineError::Input("no image".to_string()).is_retryable());
        assert!(!PipelineError::Rejected("not a room".to_string()).is_retryable());
        assert_eq!(
            PipelineError::Rejected("x".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn locally_refused_requests_are_not_retried() {
        let err = PipelineError::at(Stage::Validation)(ClientError::InvalidRequest(
            "user prompt is 2600 characters, limit is 2512".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert!(!err.is_retryable());
        assert!(PipelineError::at(Stage::Planning)(ClientError::Timeout).is_retryable());
    }

    #[test]
    fn transport_detail_hides_addresses() {
        let err = PipelineError::at(Stage::Planning)(ClientError::Transport(
            "error sending request for url (http://10.0.0.4:8082/v1/chat/completions)".to_string(),
        ));
        assert_eq!(
            err.detail(),
            "Decoration planning failed: model server is unreachable"
        );
    }
}
