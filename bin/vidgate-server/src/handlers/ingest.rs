//! Streaming multipart ingestion.
//!
//! The body is consumed part by part. The first file part is piped chunk by
//! chunk into a writer obtained from an [`UploadSink`]; every other part is
//! skipped. Each chunk is written before the next one is pulled, so a slow
//! disk throttles the client instead of growing memory.
//!
//! Part sources and sinks are traits so the loop can be exercised without a
//! socket or a filesystem. The production implementations are axum's
//! [`Multipart`] and [`TempFiles`].

use std::future::Future;
use std::io;

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use bytes::Bytes;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use super::temp_files::{TempFiles, TempPath, extension_of};

#[derive(Debug, Error)]
pub enum IngestError {
    /// The multipart stream was malformed or the client went away mid-body.
    #[error("failed to read multipart body: {0}")]
    Multipart(String),

    #[error("failed to persist upload: {0}")]
    Io(#[from] io::Error),

    #[error("upload exceeds the limit of {limit} bytes")]
    TooLarge { limit: u64 },
}

impl From<MultipartError> for IngestError {
    fn from(e: MultipartError) -> Self {
        IngestError::Multipart(e.body_text())
    }
}

/// How a multipart part is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    File,
    Field,
}

/// A part is a file when its Content-Disposition names a non-empty file.
///
/// Browsers send `filename=""` for an untouched file input; that counts as a
/// plain field.
pub fn classify_part(file_name: Option<&str>) -> PartKind {
    match file_name {
        Some(name) if !name.trim().is_empty() => PartKind::File,
        _ => PartKind::Field,
    }
}

/// A sequence of multipart parts.
pub trait PartStream: Send {
    type Part<'a>: UploadPart
    where
        Self: 'a;

    /// Next part, or `None` once the body has been fully consumed.
    fn next_part(
        &mut self,
    ) -> impl Future<Output = Result<Option<Self::Part<'_>>, IngestError>> + Send;
}

/// One part of a multipart body.
pub trait UploadPart: Send {
    fn name(&self) -> Option<&str>;

    fn file_name(&self) -> Option<&str>;

    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, IngestError>> + Send;
}

/// Destination for the bytes of the accepted file part.
pub trait UploadSink: Send + Sync {
    /// Ownership token for whatever `open` created.
    type Handle: Send;
    type Writer: AsyncWrite + Unpin + Send;

    fn open(
        &self,
        file_name: Option<&str>,
    ) -> impl Future<Output = io::Result<(Self::Handle, Self::Writer)>> + Send;

    /// Throw away a partially written upload.
    fn discard(&self, handle: Self::Handle) -> impl Future<Output = ()> + Send;
}

/// The accepted file part.
#[derive(Debug)]
pub struct Upload<H> {
    pub handle: H,
    pub file_name: Option<String>,
    pub bytes: u64,
}

/// Result of consuming a whole multipart body.
#[derive(Debug)]
pub struct Ingested<H> {
    /// `None` when the body carried no file part.
    pub upload: Option<Upload<H>>,
    pub skipped_parts: usize,
}

/// Consume `parts` to the end, persisting the first file part through `sink`.
///
/// Returns only after the body is exhausted and the writer has been flushed
/// and shut down. On error, anything already opened is discarded.
pub async fn ingest<P, S>(
    parts: &mut P,
    sink: &S,
    limit: Option<u64>,
) -> Result<Ingested<S::Handle>, IngestError>
where
    P: PartStream,
    S: UploadSink,
{
    let mut upload = None;
    match drain(parts, sink, limit, &mut upload).await {
        Ok(skipped_parts) => Ok(Ingested {
            upload,
            skipped_parts,
        }),
        Err(e) => {
            if let Some(partial) = upload.take() {
                debug!(bytes = partial.bytes, "discarding partial upload");
                sink.discard(partial.handle).await;
            }
            Err(e)
        }
    }
}

async fn drain<P, S>(
    parts: &mut P,
    sink: &S,
    limit: Option<u64>,
    upload: &mut Option<Upload<S::Handle>>,
) -> Result<usize, IngestError>
where
    P: PartStream,
    S: UploadSink,
{
    let mut skipped = 0;

    while let Some(mut part) = parts.next_part().await? {
        if upload.is_some() || classify_part(part.file_name()) == PartKind::Field {
            debug!(name = ?part.name(), file_name = ?part.file_name(), "skipping part");
            skipped += 1;
            continue;
        }

        let file_name = part.file_name().map(str::to_owned);
        let (handle, mut writer) = sink.open(file_name.as_deref()).await?;
        let accepted = upload.insert(Upload {
            handle,
            file_name,
            bytes: 0,
        });

        while let Some(chunk) = part.next_chunk().await? {
            let received = accepted.bytes + chunk.len() as u64;
            if let Some(limit) = limit {
                if received > limit {
                    return Err(IngestError::TooLarge { limit });
                }
            }
            writer.write_all(&chunk).await?;
            accepted.bytes = received;
        }
        writer.flush().await?;
        writer.shutdown().await?;

        info!(
            file_name = ?accepted.file_name,
            bytes = accepted.bytes,
            "upload persisted"
        );
    }

    Ok(skipped)
}

// ── axum / filesystem implementations ───────────────────────────────────────

impl PartStream for Multipart {
    type Part<'a> = Field<'a>;

    async fn next_part(&mut self) -> Result<Option<Field<'_>>, IngestError> {
        Ok(self.next_field().await?)
    }
}

impl UploadPart for Field<'_> {
    fn name(&self) -> Option<&str> {
        Field::name(self)
    }

    fn file_name(&self) -> Option<&str> {
        Field::file_name(self)
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, IngestError> {
        Ok(self.chunk().await?)
    }
}

impl UploadSink for TempFiles {
    type Handle = TempPath;
    type Writer = BufWriter<File>;

    async fn open(&self, file_name: Option<&str>) -> io::Result<(TempPath, BufWriter<File>)> {
        let path = self.allocate("in", &extension_of(file_name));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.path())
            .await?;
        debug!(path = %path.path().display(), "opened upload target");
        Ok((path, BufWriter::new(file)))
    }

    async fn discard(&self, handle: TempPath) {
        handle.release().await;
    }
}
