use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_session_retention_secs() -> u64 {
    300
}

fn default_max_sessions() -> usize {
    64
}

fn default_segment_duration_secs() -> u32 {
    2
}

/// `[server]` section: HTTP listener and session policy.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Inactivity window after which a running session is closed.
    pub session_timeout_secs: u64,
    /// How long finished sessions stay visible in the status API.
    #[serde(default = "default_session_retention_secs")]
    pub session_retention_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// `[transcode]` section: the external transcoder.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Path of the transcoder executable.
    pub command: PathBuf,
    /// Directory receiving one `<id>.log` file per session.
    pub log_file_path: PathBuf,
    /// Directory receiving the transcoded playlists and segments.
    pub output_path: PathBuf,
    #[serde(default = "default_segment_duration_secs")]
    pub segment_duration_secs: u32,
    #[serde(default)]
    pub extra_args: String,
}
