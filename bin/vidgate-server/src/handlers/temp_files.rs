//! Per-request scratch files.
//!
//! [`TempFiles::allocate`] hands out a fresh, unused path under the configured
//! temp directory. The returned [`TempPath`] owns that path: it is removed
//! either by an explicit [`TempPath::release`] or, as a fallback, when the
//! handle is dropped. Removal failures are logged and never propagated.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 8;

/// Allocates uniquely named paths inside one directory.
#[derive(Debug, Clone)]
pub struct TempFiles {
    dir: PathBuf,
    prefix: String,
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve a new path of the form `<prefix>-<kind>-<unix-ms>-<uuid>.<ext>`.
    ///
    /// Nothing is created on disk; the caller decides when to open the file.
    pub fn allocate(&self, kind: &str, extension: &str) -> TempPath {
        let name = format!(
            "{}-{}-{}-{}.{}",
            self.prefix,
            kind,
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple(),
            sanitize_extension(extension),
        );
        TempPath::new(self.dir.join(name))
    }
}

/// Delete `path` if it exists.
///
/// A missing file is not an error. Any other failure is logged as a cleanup
/// failure and swallowed so it can never mask the request outcome.
pub async fn release(path: &Path) {
    log_removal(path, tokio::fs::remove_file(path).await);
}

fn release_blocking(path: &Path) {
    log_removal(path, std::fs::remove_file(path));
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "temp file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "temp file already absent");
        }
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temp file"),
    }
}

/// An owned temp path that is removed exactly once.
#[derive(Debug)]
pub struct TempPath {
    path: PathBuf,
    armed: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now.
    pub async fn release(mut self) {
        self.armed = false;
        release(&self.path).await;
    }
}

impl AsRef<Path> for TempPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.armed {
            // Blocking unlink on the runtime thread; Drop cannot await.
            release_blocking(&self.path);
        }
    }
}

/// Reduce a client-supplied extension to a short lowercase alphanumeric token.
pub fn sanitize_extension(extension: &str) -> String {
    let cleaned: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_LEN)
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        FALLBACK_EXTENSION.to_owned()
    } else {
        cleaned
    }
}

/// Extension of an uploaded file name, e.g. `"clip.MOV"` → `"mov"`.
pub fn extension_of(file_name: Option<&str>) -> String {
    let ext = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    sanitize_extension(ext)
}
