use std::fmt;

use crate::transcode::types::SessionId;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Errors surfaced by a transcode session to its immediate caller.
#[derive(Debug)]
pub enum TranscodeError {
    /// The pipe, the log file or the transcoder process could not be created.
    TranscodeStartFailure(String),
    /// The pipe broke during a write, or the session is not open.
    TranscodeFailure(String),
    /// The request content type does not match the session's ingest type.
    WrongMimetype {
        expected: String,
        actual: Option<String>,
    },
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::TranscodeStartFailure(e) => {
                write!(f, "Transcoder start failed: {}", e)
            }
            TranscodeError::TranscodeFailure(e) => write!(f, "Transcoder failure: {}", e),
            TranscodeError::WrongMimetype { expected, actual } => match actual {
                Some(actual) => write!(
                    f,
                    "Wrong mimetype: expected {}, got {}",
                    expected, actual
                ),
                None => write!(f, "Wrong mimetype: expected {}, got none", expected),
            },
        }
    }
}

impl std::error::Error for TranscodeError {}

#[derive(Debug)]
pub enum SessionError {
    NotFound,
    SessionLimitReached,
    Terminated(SessionId),
    Transcode(TranscodeError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotFound => write!(f, "Session not found"),
            SessionError::SessionLimitReached => write!(f, "Session limit reached"),
            SessionError::Terminated(id) => write!(f, "Session {} already terminated", id),
            SessionError::Transcode(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<TranscodeError> for SessionError {
    fn from(err: TranscodeError) -> Self {
        SessionError::Transcode(err)
    }
}

#[derive(Debug)]
pub enum WebError {
    BindFailed(String),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BindFailed(e) => write!(f, "Web server bind failed: {}", e),
        }
    }
}

impl std::error::Error for WebError {}
