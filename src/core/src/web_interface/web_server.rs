use std::net::SocketAddr;
use std::sync::Arc;

use log::info;

use super::routes::api_routes;
use crate::error_handling::types::WebError;
use crate::session_management::session_manager::SessionManager;

/// Web server for the ingest API and dashboard
pub struct WebServer {
    session_manager: Arc<SessionManager>,
}

impl WebServer {
    /// Create a new WebServer instance
    pub fn new(session_manager: Arc<SessionManager>) -> Self {
        Self { session_manager }
    }

    /// Serve the API on `addr` until the future is dropped.
    pub async fn start(&self, addr: SocketAddr) -> Result<(), WebError> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;

        let routes = api_routes(self.session_manager.clone());
        info!("Web server listening on http://{}", addr);
        warp::serve(routes).incoming(listener).run().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::registry::MemoryRegistry;
    use crate::transcode::command_builder::FfmpegCommandBuilder;
    use crate::transcode::session::SessionSettings;
    use crate::configuration::types::TranscodeConfig;
    use std::path::PathBuf;
    use std::time::Duration;

    #[tokio::test]
    async fn start_reports_an_address_in_use() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let config = TranscodeConfig {
            command: PathBuf::from("/bin/cat"),
            log_file_path: PathBuf::from("/tmp"),
            output_path: PathBuf::from("/tmp"),
            segment_duration_secs: 2,
            extra_args: String::new(),
        };
        let manager = Arc::new(SessionManager::new(
            SessionSettings {
                command: config.command.clone(),
                log_dir: config.log_file_path.clone(),
                timeout: Duration::from_secs(5),
            },
            Arc::new(FfmpegCommandBuilder::new(&config)),
            Arc::new(MemoryRegistry::new()),
            1,
        ));

        let result = WebServer::new(manager).start(addr).await;
        assert!(matches!(result, Err(WebError::BindFailed(_))));
    }
}
