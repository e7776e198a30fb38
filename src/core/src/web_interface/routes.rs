use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use futures_util::{Stream, TryStreamExt};
use log::{debug, warn};
use tokio_util::io::StreamReader;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{status_for, ApiError, StatusResponse};
use crate::session_management::session_manager::SessionManager;
use crate::transcode::types::{IngestRequest, IngestType, SessionId};

fn with_manager(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = (Arc<SessionManager>,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

fn error_reply(status: StatusCode, message: impl Into<String>) -> reply::Response {
    reply::with_status(reply::json(&ApiError::new(message)), status).into_response()
}

/// All routes of the HTTP API.
pub fn api_routes(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    dashboard_route()
        .or(ingest_route(manager.clone()))
        .or(list_sessions_route(manager.clone()))
        .or(get_session_route(manager.clone()))
        .or(close_session_route(manager.clone()))
        .or(status_route(manager))
}

/// GET /
pub fn dashboard_route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end().and(warp::get()).and_then(|| async move {
        let html = r#"<html><head><title>videoingest</title></head>
                <body><h1>videoingest is running</h1>
                <p>Push media to /v1/ingest/&lt;id&gt;/&lt;type&gt;. See /v1/sessions and /v1/status for JSON.</p>
                </body></html>"#;
        Ok::<_, Rejection>(reply::html(html))
    })
}

/// POST|PUT /v1/ingest/:id/:type
pub fn ingest_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("v1" / "ingest" / SessionId / String)
        .and(warp::post().or(warp::put()).unify())
        .and(warp::header::optional::<String>("content-type"))
        .and(warp::body::stream())
        .and(with_manager(manager))
        .and_then(handle_ingest)
}

async fn handle_ingest<S, B>(
    id: SessionId,
    type_token: String,
    content_type: Option<String>,
    body: S,
    manager: Arc<SessionManager>,
) -> Result<reply::Response, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send + 'static,
    B: Buf + Send + 'static,
{
    let ingest_type = match type_token.parse::<IngestType>() {
        Ok(t) => t,
        Err(message) => return Ok(error_reply(StatusCode::BAD_REQUEST, message)),
    };

    let body = body
        .map_ok(|mut buf| buf.copy_to_bytes(buf.remaining()))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let reader: StreamReader<_, Bytes> = StreamReader::new(Box::pin(body));
    let request = IngestRequest::new(content_type, reader);

    match manager.ingest(id, ingest_type, request).await {
        Ok(written) => {
            debug!("Ingest request for session {} forwarded {} bytes", id, written);
            match manager.snapshot(id) {
                Some(snapshot) => Ok(reply::with_status(reply::json(&snapshot), StatusCode::OK)
                    .into_response()),
                // Cleaned up between the write and now.
                None => Ok(error_reply(StatusCode::GONE, "Session already finished")),
            }
        }
        Err(e) => {
            warn!("Ingest request for session {} failed: {}", id, e);
            Ok(error_reply(status_for(&e), e.to_string()))
        }
    }
}

/// GET /v1/sessions
pub fn list_sessions_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("v1" / "sessions")
        .and(warp::get())
        .and_then(move || {
            let manager = manager.clone();
            async move {
                Ok::<_, Rejection>(reply::with_status(
                    reply::json(&manager.snapshots()),
                    StatusCode::OK,
                ))
            }
        })
}

/// GET /v1/sessions/:id
pub fn get_session_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("v1" / "sessions" / SessionId)
        .and(warp::get())
        .and_then(move |id: SessionId| {
            let manager = manager.clone();
            async move {
                match manager.snapshot(id) {
                    Some(snapshot) => Ok::<_, Rejection>(reply::with_status(
                        reply::json(&snapshot),
                        StatusCode::OK,
                    )),
                    None => Ok::<_, Rejection>(reply::with_status(
                        reply::json(&ApiError::new("Session not found")),
                        StatusCode::NOT_FOUND,
                    )),
                }
            }
        })
}

/// DELETE /v1/sessions/:id
pub fn close_session_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("v1" / "sessions" / SessionId)
        .and(warp::delete())
        .and_then(move |id: SessionId| {
            let manager = manager.clone();
            async move {
                match manager.close_session(id).await {
                    Ok(snapshot) => Ok::<_, Rejection>(
                        reply::with_status(reply::json(&snapshot), StatusCode::OK).into_response(),
                    ),
                    Err(e) => Ok::<_, Rejection>(error_reply(status_for(&e), e.to_string())),
                }
            }
        })
}

/// GET /v1/status
pub fn status_route(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("v1" / "status")
        .and(warp::get())
        .and_then(move || {
            let manager = manager.clone();
            async move {
                let status = StatusResponse {
                    active_sessions: manager.get_active_session_count(),
                    sessions: manager.registry().summary(),
                };
                Ok::<_, Rejection>(reply::with_status(reply::json(&status), StatusCode::OK))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::registry::MemoryRegistry;
    use crate::transcode::command_builder::CommandBuilder;
    use crate::transcode::session::SessionSettings;
    use serde_json::Value;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct NoArgs;

    impl CommandBuilder for NoArgs {
        fn build_command(&self, _id: SessionId, _ingest_type: IngestType) -> String {
            String::new()
        }
    }

    fn manager(log_dir: &Path) -> Arc<SessionManager> {
        let settings = SessionSettings {
            command: PathBuf::from("/bin/cat"),
            log_dir: log_dir.to_path_buf(),
            timeout: Duration::from_secs(30),
        };
        Arc::new(SessionManager::new(
            settings,
            Arc::new(NoArgs),
            Arc::new(MemoryRegistry::new()),
            4,
        ))
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap_or_else(|e| panic!("invalid json: {}", e))
    }

    #[tokio::test]
    async fn ingest_streams_body_until_empty_post() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let routes = api_routes(manager.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/v1/ingest/1/mpegts")
            .header("content-type", "video/mp2t")
            .body("hello")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let snapshot = json(res.body());
        assert_eq!(snapshot["state"], "running");
        assert_eq!(snapshot["bytes_out"], 5);
        assert_eq!(snapshot["ingest_type"], "mpegts");

        let res = warp::test::request()
            .method("PUT")
            .path("/v1/ingest/1/mpegts")
            .header("content-type", "video/mp2t")
            .body(" world")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res.body())["bytes_out"], 11);

        let res = warp::test::request()
            .method("POST")
            .path("/v1/ingest/1/mpegts")
            .header("content-type", "video/mp2t")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(json(res.body())["state"], "eos");

        let res = warp::test::request()
            .method("POST")
            .path("/v1/ingest/1/mpegts")
            .header("content-type", "video/mp2t")
            .body("late")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::GONE);
        assert!(json(res.body())["message"].is_string());

        let logged = std::fs::read_to_string(dir.path().join("1.log")).unwrap();
        assert_eq!(logged, "hello world");
    }

    #[tokio::test]
    async fn unknown_ingest_type_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let routes = api_routes(manager.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/v1/ingest/2/flv")
            .header("content-type", "video/x-flv")
            .body("data")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(manager.get(2).is_none());
    }

    #[tokio::test]
    async fn wrong_content_type_is_unsupported_media() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let routes = api_routes(manager.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/v1/ingest/3/mpegts")
            .header("content-type", "video/mp4")
            .body("moov")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(manager.snapshot(3).unwrap().bytes_in, 0);

        manager.shutdown_all_sessions().await;
    }

    #[tokio::test]
    async fn delete_closes_known_sessions_only() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let routes = api_routes(manager.clone());

        let res = warp::test::request()
            .method("DELETE")
            .path("/v1/sessions/404")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        warp::test::request()
            .method("POST")
            .path("/v1/ingest/4/h264")
            .header("content-type", "video/h264")
            .body("nal")
            .reply(&routes)
            .await;

        let res = warp::test::request()
            .method("DELETE")
            .path("/v1/sessions/4")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let snapshot = json(res.body());
        assert_eq!(snapshot["state"], "eos");
        assert!(snapshot["cpu_user_secs"].is_number());
    }

    #[tokio::test]
    async fn listing_and_status_reflect_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let routes = api_routes(manager.clone());

        for id in [7, 5] {
            warp::test::request()
                .method("POST")
                .path(&format!("/v1/ingest/{}/jpeg", id))
                .header("content-type", "image/jpeg")
                .body("frame")
                .reply(&routes)
                .await;
        }

        let res = warp::test::request()
            .path("/v1/sessions")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let ids: Vec<u64> = json(res.body())
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![5, 7]);

        let res = warp::test::request().path("/v1/sessions/6").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = warp::test::request().path("/v1/status").reply(&routes).await;
        let status = json(res.body());
        assert_eq!(status["active_sessions"], 2);
        assert_eq!(status["sessions"]["running"], 2);

        let res = warp::test::request().path("/").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::OK);

        manager.shutdown_all_sessions().await;
    }
}
