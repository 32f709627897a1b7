//! The conversion pipeline stages, leaves first: scratch files, upload
//! ingestion, the ffmpeg invocation and the streaming response.

pub mod dispatch;
pub mod ingest;
pub mod temp_files;
pub mod transcode;
