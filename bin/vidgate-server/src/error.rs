//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors are automatically converted
//! to a plain-text HTTP response with an appropriate status code.
//!
//! Encoder diagnostics are returned verbatim so callers can tell a corrupt
//! upload from an unsupported codec. I/O and other internal errors are logged
//! with full detail but only a generic message reaches the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::handlers::ingest::IngestError;

pub const NO_FILE_MESSAGE: &str = "No file uploaded.";

/// All errors that can end a vidgate-server request.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The multipart body carried no file part.
    #[error("No file uploaded.")]
    NoFileProvided,

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The upload exceeded the configured size limit.
    #[error("upload exceeds the {limit_mb} MB limit")]
    PayloadTooLarge { limit_mb: u64 },

    /// ffmpeg could not produce the output file.
    #[error("FFmpeg error: {0}")]
    Encode(String),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NoFileProvided => (StatusCode::BAD_REQUEST, NO_FILE_MESSAGE.to_owned()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ServerError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),

            ServerError::Io(e) => {
                error!(error = %e, "i/o error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, client_message).into_response()
    }
}

impl From<IngestError> for ServerError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Multipart(m) => ServerError::BadRequest(m),
            IngestError::Io(e) => ServerError::Io(e),
            IngestError::TooLarge { limit } => ServerError::PayloadTooLarge {
                limit_mb: limit.div_ceil(1024 * 1024),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn missing_file_is_a_400_with_fixed_text() {
        let response = ServerError::NoFileProvided.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "No file uploaded.");
    }

    #[tokio::test]
    async fn encode_failure_exposes_the_diagnostic() {
        let response =
            ServerError::Encode("ffmpeg exited with code 1: moov atom not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response).await,
            "FFmpeg error: ffmpeg exited with code 1: moov atom not found"
        );
    }

    #[tokio::test]
    async fn io_errors_are_not_leaked() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/secret/path");
        let response = ServerError::Io(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "internal server error");
    }

    #[test]
    fn ingest_errors_map_to_client_statuses() {
        let too_large: ServerError = IngestError::TooLarge { limit: 5 * 1024 * 1024 }.into();
        assert!(matches!(too_large, ServerError::PayloadTooLarge { limit_mb: 5 }));

        let aborted: ServerError = IngestError::Multipart("stream ended early".into()).into();
        assert!(matches!(aborted, ServerError::BadRequest(_)));
    }
}
