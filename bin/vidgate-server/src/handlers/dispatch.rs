//! Streams a finished output file as the response body.
//!
//! The body owns the output [`TempPath`] and a finalization callback. The
//! callback runs exactly once: when the stream reaches EOF, when reading
//! fails, or when the body is dropped early because the client went away.
//! The file handle is closed before the callback runs so the path can be
//! removed on every platform.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{Span, debug, info, warn};

use crate::error::ServerError;

use super::temp_files::TempPath;

pub const MP4_CONTENT_TYPE: &str = "video/mp4";

/// How the transfer of the output file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DispatchOutcome {
    /// Every byte was handed to the transport.
    Completed,
    /// The output file could not be opened or read.
    ReadFailed,
    /// The body was dropped before EOF, typically a client disconnect.
    Aborted,
}

type Finalizer = Box<dyn FnOnce(DispatchOutcome, TempPath) + Send>;

/// Build a `200 OK` streaming `output` as `download_name`.
///
/// `on_finish` receives the outcome and the output path once the transfer is
/// over. If the file cannot even be opened, it runs before this returns.
pub async fn dispatch<F>(
    output: TempPath,
    download_name: &str,
    on_finish: F,
) -> Result<Response, ServerError>
where
    F: FnOnce(DispatchOutcome, TempPath) + Send + 'static,
{
    let opened = match File::open(output.path()).await {
        Ok(file) => file.metadata().await.map(|meta| (file, meta.len())),
        Err(e) => Err(e),
    };
    let (file, length) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            warn!(path = %output.path().display(), error = %e, "cannot open encoded output");
            on_finish(DispatchOutcome::ReadFailed, output);
            return Err(ServerError::Io(e));
        }
    };

    let body = FinalizingStream {
        inner: Some(ReaderStream::new(file)),
        output: Some(output),
        on_finish: Some(Box::new(on_finish)),
        sent: 0,
        length,
        span: Span::current(),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MP4_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, content_disposition(download_name))
        .body(Body::from_stream(body))
        .map_err(|e| ServerError::Internal(format!("failed to build response: {e}")))
}

/// `attachment; filename="<name>"` with characters that would break the
/// quoted-string replaced.
fn content_disposition(download_name: &str) -> HeaderValue {
    let safe: String = download_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

struct FinalizingStream {
    inner: Option<ReaderStream<File>>,
    output: Option<TempPath>,
    on_finish: Option<Finalizer>,
    sent: u64,
    length: u64,
    span: Span,
}

impl FinalizingStream {
    fn finish(&mut self, outcome: DispatchOutcome) {
        // Close the file before handing the path over.
        self.inner = None;
        let (Some(on_finish), Some(output)) = (self.on_finish.take(), self.output.take()) else {
            return;
        };

        let _entered = self.span.enter();
        match outcome {
            DispatchOutcome::Completed => {
                info!(bytes = self.sent, "converted file delivered");
            }
            _ => warn!(
                %outcome,
                sent = self.sent,
                expected = self.length,
                "converted file transfer did not complete"
            ),
        }
        on_finish(outcome, output);
    }
}

impl Stream for FinalizingStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match Pin::new(inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                debug!(error = %e, "reading encoded output failed");
                this.finish(DispatchOutcome::ReadFailed);
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(DispatchOutcome::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for FinalizingStream {
    fn drop(&mut self) {
        self.finish(DispatchOutcome::Aborted);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handlers::temp_files::TempFiles;
    use http_body_util::BodyExt;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(DispatchOutcome, PathBuf)>>>;

    fn recorder() -> (Seen, impl FnOnce(DispatchOutcome, TempPath) + Send + 'static) {
        let seen = Seen::default();
        let sink = Arc::clone(&seen);
        let callback = move |outcome: DispatchOutcome, output: TempPath| {
            sink.lock().unwrap().push((outcome, output.path().to_path_buf()));
        };
        (seen, callback)
    }

    async fn output_file(dir: &std::path::Path, contents: &[u8]) -> TempPath {
        let path = TempFiles::new(dir, "vidgate").allocate("out", "mp4");
        tokio::fs::write(path.path(), contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn full_transfer_finalizes_once_with_completed() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![7u8; 200_000];
        let output = output_file(dir.path(), &payload).await;
        let (seen, callback) = recorder();

        let response = dispatch(output, "holiday.mp4", callback).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], MP4_CONTENT_TYPE);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "200000");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"holiday.mp4\""
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), payload.len());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, DispatchOutcome::Completed);
        assert!(!seen[0].1.exists(), "output removed after delivery");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn dropped_body_finalizes_with_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let output = output_file(dir.path(), &vec![1u8; 512 * 1024]).await;
        let (seen, callback) = recorder();

        let response = dispatch(output, "clip.mp4", callback).await.unwrap();
        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert!(first.is_data());
        drop(body);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, DispatchOutcome::Aborted);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unopenable_output_finalizes_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let output = TempFiles::new(dir.path(), "vidgate").allocate("out", "mp4");
        let (seen, callback) = recorder();

        let err = dispatch(output, "clip.mp4", callback).await.unwrap_err();

        assert!(matches!(err, ServerError::Io(_)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, DispatchOutcome::ReadFailed);
    }

    #[test]
    fn download_names_are_quoted_safely() {
        assert_eq!(
            content_disposition("my \"best\" clip.mp4"),
            "attachment; filename=\"my _best_ clip.mp4\""
        );
        assert_eq!(
            content_disposition("vídeo.mp4"),
            "attachment; filename=\"v_deo.mp4\""
        );
    }
}
