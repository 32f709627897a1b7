//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::handlers::temp_files::TempFiles;
use crate::handlers::transcode::Transcoder;

/// State shared across all HTTP handlers.
///
/// Nothing in here is mutated per request; each request owns its own temp
/// files and ffmpeg process.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Allocator for per-request scratch files.
    pub temp_files: TempFiles,
    /// ffmpeg runner with the fixed output profile.
    pub transcoder: Transcoder,
}

impl AppState {
    pub fn new(config: Config, transcoder: Transcoder) -> Self {
        let temp_files = TempFiles::new(config.temp_dir.clone(), "vidgate");
        Self {
            config: Arc::new(config),
            temp_files,
            transcoder,
        }
    }
}
