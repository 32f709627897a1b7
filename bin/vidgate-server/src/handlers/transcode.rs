//! External ffmpeg invocation with the fixed messaging-compatible profile.
//!
//! [`Transcoder::invoke`] allocates the output path, runs ffmpeg to completion
//! and reports a [`JobOutcome`]. The input path is borrowed, never deleted
//! here; the output path is handed back on both branches so the caller owns
//! its cleanup.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;

use super::temp_files::{TempFiles, TempPath};

/// Number of trailing stderr lines kept in a failure message.
const DIAGNOSTIC_TAIL_LINES: usize = 12;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} -version failed: {message}")]
    Probe { program: String, message: String },

    #[error("ffmpeg download failed: {0}")]
    Download(String),
}

/// Encoder parameters applied to every conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeProfile {
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub audio_bitrate: &'static str,
    pub preset: &'static str,
    pub h264_profile: &'static str,
    pub h264_level: &'static str,
    pub crf: u8,
    pub movflags: &'static str,
    pub pixel_format: &'static str,
    pub b_frames: u8,
    pub container: &'static str,
}

/// H.264 main@3.1 / AAC 128k / faststart MP4 without B-frames, which plays
/// back on constrained mobile and messaging clients.
pub const MESSAGING_PROFILE: EncodeProfile = EncodeProfile {
    video_codec: "libx264",
    audio_codec: "aac",
    audio_bitrate: "128k",
    preset: "veryfast",
    h264_profile: "main",
    h264_level: "3.1",
    crf: 23,
    movflags: "+faststart",
    pixel_format: "yuv420p",
    b_frames: 0,
    container: "mp4",
};

impl EncodeProfile {
    /// Output options, in the order they are passed to ffmpeg.
    pub fn output_args(&self) -> Vec<String> {
        [
            ("-c:v", self.video_codec.to_owned()),
            ("-c:a", self.audio_codec.to_owned()),
            ("-b:a", self.audio_bitrate.to_owned()),
            ("-preset", self.preset.to_owned()),
            ("-profile:v", self.h264_profile.to_owned()),
            ("-level", self.h264_level.to_owned()),
            ("-crf", self.crf.to_string()),
            ("-movflags", self.movflags.to_owned()),
            ("-pix_fmt", self.pixel_format.to_owned()),
            ("-bf", self.b_frames.to_string()),
            ("-f", self.container.to_owned()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_owned(), value])
        .collect()
    }
}

/// One encode: a borrowed input and an owned output path.
#[derive(Debug)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: TempPath,
}

/// Terminal state of a [`ConversionJob`].
#[derive(Debug)]
pub enum JobOutcome {
    /// The output path holds a complete, non-empty file.
    Succeeded(TempPath),
    /// Encoding failed; `output` may or may not exist on disk.
    Failed { message: String, output: TempPath },
}

/// Runs the ffmpeg binary it was constructed with.
#[derive(Debug, Clone)]
pub struct Transcoder {
    program: PathBuf,
    timeout: Option<Duration>,
    profile: EncodeProfile,
}

impl Transcoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
            profile: MESSAGING_PROFILE,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Allocate an output path and encode `input` into it.
    pub async fn invoke(&self, temp: &TempFiles, input: &Path) -> JobOutcome {
        let job = ConversionJob {
            input: input.to_path_buf(),
            output: temp.allocate("out", self.profile.container),
        };
        self.run(job).await
    }

    /// Run ffmpeg for `job`, resolving only after the process has exited.
    pub async fn run(&self, job: ConversionJob) -> JobOutcome {
        let ConversionJob { input, output } = job;
        let mut command = self.command(&input, output.path());
        debug!(command = ?command.as_std(), "spawning ffmpeg");

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, command.output()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs_f64(), "ffmpeg timed out; killed");
                    return JobOutcome::Failed {
                        message: format!("ffmpeg timed out after {} seconds", limit.as_secs_f64()),
                        output,
                    };
                }
            },
            None => command.output().await,
        };

        let process = match result {
            Ok(process) => process,
            Err(source) => {
                let e = TranscodeError::Launch {
                    program: self.program.display().to_string(),
                    source,
                };
                warn!(error = %e, "ffmpeg spawn failed");
                return JobOutcome::Failed {
                    message: e.to_string(),
                    output,
                };
            }
        };

        if !process.status.success() {
            let message = failure_message(process.status, &process.stderr);
            warn!(status = %process.status, error = %message, "ffmpeg conversion failed");
            return JobOutcome::Failed { message, output };
        }

        match tokio::fs::metadata(output.path()).await {
            Ok(meta) if meta.len() > 0 => {
                info!(
                    output_path = %output.path().display(),
                    bytes = meta.len(),
                    "ffmpeg conversion succeeded"
                );
                JobOutcome::Succeeded(output)
            }
            _ => {
                warn!(output_path = %output.path().display(), "ffmpeg exited cleanly without output");
                JobOutcome::Failed {
                    message: "ffmpeg produced no output".to_owned(),
                    output,
                }
            }
        }
    }

    /// The full command line for one conversion.
    pub fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(self.profile.output_args())
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Run `<program> -version` and return its first line.
    pub async fn probe(&self) -> Result<String, TranscodeError> {
        let program = self.program.display().to_string();
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscodeError::Launch {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Probe {
                program,
                message: failure_message(output.status, &output.stderr),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_owned())
    }
}

/// Pick the ffmpeg binary: explicit path, downloaded sidecar, or `PATH`.
pub async fn resolve_program(config: &Config) -> Result<PathBuf, TranscodeError> {
    if let Some(path) = &config.ffmpeg_path {
        return Ok(path.clone());
    }
    if config.ffmpeg_auto_download {
        info!("ensuring a sidecar ffmpeg build is available");
        tokio::task::spawn_blocking(ffmpeg_sidecar::download::auto_download)
            .await
            .map_err(|e| TranscodeError::Download(e.to_string()))?
            .map_err(|e| TranscodeError::Download(e.to_string()))?;
        return Ok(ffmpeg_sidecar::paths::ffmpeg_path());
    }
    Ok(PathBuf::from("ffmpeg"))
}

/// `ffmpeg exited with code N: <last stderr lines>`.
fn failure_message(status: ExitStatus, stderr: &[u8]) -> String {
    let exit = match status.code() {
        Some(code) => format!("ffmpeg exited with code {code}"),
        None => "ffmpeg was terminated by a signal".to_owned(),
    };

    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES)..];

    if tail.is_empty() {
        exit
    } else {
        format!("{exit}: {}", tail.join("\n"))
    }
}
