use serde::Serialize;
use warp::http::StatusCode;

use crate::error_handling::types::{SessionError, TranscodeError};
use crate::session_management::registry::RegistrySummary;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// GET /v1/status payload
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub active_sessions: usize,
    pub sessions: RegistrySummary,
}

/// HTTP status reported for a failed ingest or session operation.
pub fn status_for(error: &SessionError) -> StatusCode {
    match error {
        SessionError::NotFound => StatusCode::NOT_FOUND,
        SessionError::SessionLimitReached => StatusCode::TOO_MANY_REQUESTS,
        SessionError::Terminated(_) => StatusCode::GONE,
        SessionError::Transcode(TranscodeError::WrongMimetype { .. }) => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        SessionError::Transcode(TranscodeError::TranscodeStartFailure(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SessionError::Transcode(TranscodeError::TranscodeFailure(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_map_to_http_statuses() {
        assert_eq!(status_for(&SessionError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&SessionError::SessionLimitReached),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(&SessionError::Terminated(3)), StatusCode::GONE);
        assert_eq!(
            status_for(&SessionError::Transcode(TranscodeError::WrongMimetype {
                expected: "video/mp2t".to_string(),
                actual: None,
            })),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            status_for(&TranscodeError::TranscodeStartFailure("spawn".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&TranscodeError::TranscodeFailure("pipe".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn api_error_serializes_message() {
        let body = serde_json::to_string(&ApiError::new("Session not found")).unwrap();
        assert_eq!(body, r#"{"message":"Session not found"}"#);
    }
}
