//! Fixtures shared by the unit tests: stub encoders, multipart bodies and a
//! ready-to-serve router.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use crate::config::Config;
use crate::handlers::transcode::Transcoder;
use crate::routes;
use crate::state::AppState;

/// Copies the `-i` input to the last argument, like a no-op encode.
pub const COPY_ENCODER: &str = r#"input=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
done
out="$prev"
cat "$input" > "$out""#;

/// Rejects every input the way ffmpeg does for a non-media file.
pub const FAILING_ENCODER: &str = r#"echo "input: Invalid data found when processing input" >&2
exit 1"#;

const BOUNDARY: &str = "vidgate-test-boundary";

/// Encoder that writes a partial output, records its pid in `pid_file` and
/// then blocks. `exec` keeps the recorded pid on the sleeping process.
pub fn hanging_encoder(pid_file: &Path) -> String {
    let pid_file = pid_file.display();
    format!(
        r#"out=""
for arg in "$@"; do out="$arg"; done
printf 'partial' > "$out"
echo $$ > "{pid_file}.tmp" && mv "{pid_file}.tmp" "{pid_file}"
exec sleep 30"#
    )
}

/// Wait until the encoder has written its pid.
pub async fn wait_for_pid(pid_file: &Path) -> u32 {
    for _ in 0..500 {
        if let Ok(text) = tokio::fs::read_to_string(pid_file).await {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("encoder never started: {}", pid_file.display());
}

/// `true` once `pid` is gone or only a zombie awaiting reaping.
pub fn process_exited(pid: u32) -> bool {
    let output = std::process::Command::new("ps")
        .args(["-o", "stat=", "-p", &pid.to_string()])
        .output()
        .unwrap();
    let state = String::from_utf8_lossy(&output.stdout);
    let state = state.trim();
    !output.status.success() || state.is_empty() || state.starts_with('Z')
}

/// Poll [`process_exited`] for up to five seconds.
pub async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..100 {
        if process_exited(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Write an executable `/bin/sh` script standing in for ffmpeg.
pub fn stub_encoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("ffmpeg-stub");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Sorted file names in `dir`.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub enum Part<'a> {
    Field(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Field(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Router over `temp_dir` using `program` as the encoder.
pub fn test_app(temp_dir: &Path, program: &Path, max_upload_size_mb: u64) -> Router {
    let mut config = Config::from_lookup(|_| None);
    config.temp_dir = temp_dir.to_path_buf();
    config.max_upload_size_mb = max_upload_size_mb;
    let transcoder = Transcoder::new(program, Some(Duration::from_secs(30)));
    routes::build(Arc::new(AppState::new(config, transcoder)))
}
