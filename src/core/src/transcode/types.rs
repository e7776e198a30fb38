//! Core types shared by the transcode subsystem.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mime_guess::mime::Mime;
use serde::{Deserialize, Serialize};

/// Caller-assigned identifier of a video stream.
pub type SessionId = u64;

/// Lifecycle state of a transcode session.
///
/// Transitions only move forward along `Init -> Running -> {Eos, Failed}`,
/// and `Eos`/`Failed` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Constructed, no process yet.
    Init,
    /// Process live, pipe open, watchdog armed.
    Running,
    /// Graceful end of stream.
    Eos,
    /// Abnormal end.
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Eos | SessionState::Failed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Init, SessionState::Running)
                | (SessionState::Init, SessionState::Failed)
                | (SessionState::Running, SessionState::Eos)
                | (SessionState::Running, SessionState::Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Init => "INIT",
            SessionState::Running => "RUNNING",
            SessionState::Eos => "EOS",
            SessionState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Kind of video a producer pushes into a session.
///
/// Determines both the accepted request content types and the shape of the
/// transcoder command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestType {
    MpegTs,
    Mp4,
    H264,
    Jpeg,
}

impl IngestType {
    /// Token used in ingest URLs.
    pub fn token(self) -> &'static str {
        match self {
            IngestType::MpegTs => "mpegts",
            IngestType::Mp4 => "mp4",
            IngestType::H264 => "h264",
            IngestType::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            IngestType::MpegTs => "video/mp2t",
            IngestType::Mp4 => "video/mp4",
            IngestType::H264 => "video/h264",
            IngestType::Jpeg => "image/jpeg",
        }
    }

    fn mime_aliases(self) -> &'static [&'static str] {
        match self {
            IngestType::MpegTs => &["video/mpeg-ts"],
            IngestType::Mp4 => &[],
            IngestType::H264 => &["video/x-h264"],
            IngestType::Jpeg => &["image/jpg"],
        }
    }

    /// Returns true if `content_type` names this ingest type. Parameters such
    /// as `; codecs=...` and letter case are ignored.
    pub fn accepts(self, content_type: &str) -> bool {
        let Ok(mime) = content_type.trim().parse::<Mime>() else {
            return false;
        };
        let essence = mime.essence_str().to_ascii_lowercase();
        essence == self.mime_type() || self.mime_aliases().contains(&essence.as_str())
    }
}

impl fmt::Display for IngestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for IngestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mpegts" | "ts" => Ok(IngestType::MpegTs),
            "mp4" => Ok(IngestType::Mp4),
            "h264" | "avc" => Ok(IngestType::H264),
            "jpeg" | "jpg" | "mjpeg" => Ok(IngestType::Jpeg),
            other => Err(format!("unknown ingest type '{}'", other)),
        }
    }
}

/// Cumulative counters kept for the life of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    /// Bytes read from request bodies.
    pub bytes_in: u64,
    /// Bytes written into the transcoder pipe.
    pub bytes_out: u64,
    /// Number of accepted write calls.
    pub calls_in: u64,
    /// User CPU time of the transcoder, set after teardown.
    pub cpu_user: Option<Duration>,
    /// System CPU time of the transcoder, set after teardown.
    pub cpu_system: Option<Duration>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
}

/// One inbound chunk of video as handed over by the HTTP layer.
pub struct IngestRequest<R> {
    pub content_type: Option<String>,
    pub body: R,
}

impl<R> IngestRequest<R> {
    pub fn new(content_type: Option<String>, body: R) -> Self {
        Self { content_type, body }
    }
}

/// Read-only view of a session, safe to hand to the status API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub state: SessionState,
    pub ingest_type: Option<IngestType>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub calls_in: u64,
    pub cpu_user_secs: Option<f64>,
    pub cpu_system_secs: Option<f64>,
    pub exit_code: Option<i32>,
    pub exit_signal: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}
