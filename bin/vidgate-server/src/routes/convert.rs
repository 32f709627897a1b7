//! `POST /convert` – upload a video, receive a messaging-compatible MP4.
//!
//! One request walks strictly forward through
//! `awaiting_upload → ingesting → transcoding → dispatching → done`:
//!
//! - no file part: 400, nothing was written;
//! - encode failure: input and output released, then 500 with the diagnostic;
//! - success: the output is streamed and both files are released once the
//!   transfer ends, whether it completed or the client disconnected.
//!
//! An error while ingesting discards the partial input before responding.

use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use tracing::{debug, info, warn};
use utoipa::{OpenApi, ToSchema};

use crate::error::ServerError;
use crate::handlers::dispatch::dispatch;
use crate::handlers::ingest::{ingest, Upload};
use crate::handlers::transcode::JobOutcome;
use crate::state::AppState;

const FALLBACK_DOWNLOAD_NAME: &str = "converted";

#[derive(OpenApi)]
#[openapi(paths(convert), components(schemas(ConvertUpload)))]
pub struct ConvertApi;

/// Multipart form accepted by `POST /convert`.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct ConvertUpload {
    /// The video to convert. Only the first file part is read.
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

/// Lifecycle of one conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
enum Stage {
    AwaitingUpload,
    Ingesting,
    Transcoding,
    Dispatching,
    Done,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/convert", post(convert))
        // Uploads are streamed to disk and limited by `ingest` itself.
        .layer(DefaultBodyLimit::disable())
}

#[utoipa::path(
    post,
    path = "/convert",
    tag = "convert",
    request_body(
        content = ConvertUpload,
        content_type = "multipart/form-data",
        description = "Video file upload; extra files and text fields are ignored"
    ),
    responses(
        (status = 200, description = "The converted MP4 (video/mp4): H.264 main@3.1, AAC 128k, faststart, no B-frames"),
        (status = 400, description = "No file uploaded, or a malformed multipart body", body = String, content_type = "text/plain"),
        (status = 413, description = "Upload exceeds the configured size limit", body = String, content_type = "text/plain"),
        (status = 500, description = "ffmpeg failed; the body carries its diagnostic", body = String, content_type = "text/plain"),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ServerError> {
    debug!(stage = %Stage::AwaitingUpload, "conversion requested");
    let mut multipart = multipart.map_err(|e| ServerError::BadRequest(e.body_text()))?;

    debug!(stage = %Stage::Ingesting, "reading multipart body");
    let ingested = ingest(
        &mut multipart,
        &state.temp_files,
        state.config.max_upload_bytes(),
    )
    .await
    .inspect_err(|e| warn!(stage = %Stage::Done, error = %e, "upload failed"))?;

    let Some(Upload {
        handle: input,
        file_name,
        bytes,
    }) = ingested.upload
    else {
        info!(
            stage = %Stage::Done,
            skipped_parts = ingested.skipped_parts,
            "request carried no file part"
        );
        return Err(ServerError::NoFileProvided);
    };

    debug!(stage = %Stage::Transcoding, bytes, input = %input.path().display(), "encoding upload");
    match state.transcoder.invoke(&state.temp_files, input.path()).await {
        JobOutcome::Succeeded(output) => {
            debug!(stage = %Stage::Dispatching, "streaming converted file");
            dispatch(output, &download_name(file_name.as_deref()), move |outcome, output| {
                // Dropping a TempPath removes the file.
                drop(output);
                drop(input);
                debug!(stage = %Stage::Done, %outcome, "temp files released");
            })
            .await
        }
        JobOutcome::Failed { message, output } => {
            input.release().await;
            output.release().await;
            info!(stage = %Stage::Done, "conversion failed; temp files released");
            Err(ServerError::Encode(message))
        }
    }
}

/// `"Holiday clip.MOV"` → `"Holiday_clip.mp4"`.
///
/// Only the final extension is dropped, and a bare dotfile name such as
/// `".mov"` has no stem.
fn download_name(file_name: Option<&str>) -> String {
    let base = file_name
        .and_then(|name| Path::new(name).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let stem = base.rsplit_once('.').map_or(base, |(stem, _)| stem);
    let stem: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let stem = stem.trim_matches('.');
    if stem.is_empty() {
        format!("{FALLBACK_DOWNLOAD_NAME}.mp4")
    } else {
        format!("{stem}.mp4")
    }
}
