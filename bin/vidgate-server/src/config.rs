//! Server configuration, loaded from environment variables at startup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for vidgate-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to bind (default: `0.0.0.0`).
    pub host: IpAddr,

    /// TCP port to listen on, read from `PORT` (default: `10000`).
    pub port: u16,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<PathBuf>,

    /// Scratch directory for per-request upload and output files.
    pub temp_dir: PathBuf,

    /// Explicit path to the ffmpeg binary. `None` means "resolve at startup".
    pub ffmpeg_path: Option<PathBuf>,

    /// Download a sidecar ffmpeg build when no explicit path is configured.
    pub ffmpeg_auto_download: bool,

    /// Encode wall-clock limit in seconds; `0` disables the limit.
    pub encode_timeout_secs: u64,

    /// Upload size limit in MiB; `0` disables the limit.
    pub max_upload_size_mb: u64,

    /// Comma-separated CORS origin allowlist. `None` allows any origin.
    pub cors_allowed_origins: Option<String>,

    /// Serve Swagger UI at `/swagger-ui`.
    pub enable_swagger: bool,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: parse_or(&lookup, "VIDGATE_HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            port: parse_or(&lookup, "PORT", 10_000),
            log_level: non_empty("VIDGATE_LOG").unwrap_or_else(|| "info".to_owned()),
            log_json: flag_or(&lookup, "VIDGATE_LOG_JSON", false),
            log_dir: non_empty("VIDGATE_LOG_DIR").map(PathBuf::from),
            temp_dir: non_empty("VIDGATE_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            ffmpeg_path: non_empty("VIDGATE_FFMPEG_PATH").map(PathBuf::from),
            ffmpeg_auto_download: flag_or(&lookup, "VIDGATE_FFMPEG_AUTO_DOWNLOAD", false),
            encode_timeout_secs: parse_or(&lookup, "VIDGATE_ENCODE_TIMEOUT_SECS", 900),
            max_upload_size_mb: parse_or(&lookup, "VIDGATE_MAX_UPLOAD_SIZE_MB", 1024),
            cors_allowed_origins: non_empty("VIDGATE_CORS_ORIGINS"),
            enable_swagger: flag_or(&lookup, "VIDGATE_ENABLE_SWAGGER", false),
        }
    }

    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn encode_timeout(&self) -> Option<Duration> {
        (self.encode_timeout_secs > 0).then(|| Duration::from_secs(self.encode_timeout_secs))
    }

    pub fn max_upload_bytes(&self) -> Option<u64> {
        (self.max_upload_size_mb > 0).then(|| self.max_upload_size_mb.saturating_mul(1024 * 1024))
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v = v.trim();
            v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    fn config_with(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let cfg = config_with(&[]);
        assert_eq!(cfg.port, 10_000);
        assert_eq!(cfg.bind_address().to_string(), "0.0.0.0:10000");
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.log_json);
        assert!(cfg.ffmpeg_path.is_none());
        assert_eq!(cfg.temp_dir, std::env::temp_dir());
        assert_eq!(cfg.encode_timeout(), Some(Duration::from_secs(900)));
        assert_eq!(cfg.max_upload_bytes(), Some(1024 * 1024 * 1024));
        assert!(!cfg.enable_swagger);
    }

    #[test]
    fn port_comes_from_plain_port_variable() {
        let cfg = config_with(&[("PORT", "8080"), ("VIDGATE_HOST", "127.0.0.1")]);
        assert_eq!(cfg.bind_address().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let cfg = config_with(&[
            ("PORT", "not-a-port"),
            ("VIDGATE_ENCODE_TIMEOUT_SECS", "-3"),
            ("VIDGATE_HOST", "localhost"),
        ]);
        assert_eq!(cfg.port, 10_000);
        assert_eq!(cfg.encode_timeout_secs, 900);
        assert_eq!(cfg.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn zero_disables_limits() {
        let cfg = config_with(&[
            ("VIDGATE_ENCODE_TIMEOUT_SECS", "0"),
            ("VIDGATE_MAX_UPLOAD_SIZE_MB", "0"),
        ]);
        assert!(cfg.encode_timeout().is_none());
        assert!(cfg.max_upload_bytes().is_none());
    }

    #[test]
    fn flags_and_paths_are_parsed() {
        let cfg = config_with(&[
            ("VIDGATE_LOG_JSON", "TRUE"),
            ("VIDGATE_FFMPEG_AUTO_DOWNLOAD", "1"),
            ("VIDGATE_FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("VIDGATE_TEMP_DIR", "/var/tmp/vidgate"),
            ("VIDGATE_CORS_ORIGINS", "   "),
        ]);
        assert!(cfg.log_json);
        assert!(cfg.ffmpeg_auto_download);
        assert_eq!(cfg.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
        assert_eq!(cfg.temp_dir, PathBuf::from("/var/tmp/vidgate"));
        assert!(cfg.cors_allowed_origins.is_none());
    }
}
