use crate::error_handling::types::SessionError;
use crate::session_management::registry::{MemoryRegistry, SessionRegistry};
use crate::transcode::command_builder::CommandBuilder;
use crate::transcode::session::{SessionSettings, TranscodeSession};
use crate::transcode::types::{IngestRequest, IngestType, SessionId, SessionSnapshot};
use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncRead;

/// The structure related to session management
///
/// Maps stream identifiers to their transcode sessions and routes ingest
/// requests to them. It is the component that constructs sessions, and
/// therefore the one responsible for closing them.
///
/// # Fields Overview
///
/// - `sessions`: every known session, live or finished (kept for status queries)
/// - `registry`: receives the state transitions of all sessions
/// - `builder`: shared command builder handed to each session
/// - `settings`: transcoder path, log directory and inactivity timeout
/// - `max_sessions`: upper bound on simultaneously live sessions
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Arc<TranscodeSession>>>,
    registry: Arc<MemoryRegistry>,
    builder: Arc<dyn CommandBuilder>,
    settings: Arc<SessionSettings>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(
        settings: SessionSettings,
        builder: Arc<dyn CommandBuilder>,
        registry: Arc<MemoryRegistry>,
        max_sessions: usize,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            registry,
            builder,
            settings: Arc::new(settings),
            max_sessions,
        }
    }

    pub fn registry(&self) -> &Arc<MemoryRegistry> {
        &self.registry
    }

    /// Forwards one ingest request to the session of `id`, creating and
    /// opening the session on the first request for that id.
    pub async fn ingest<R>(
        &self,
        id: SessionId,
        ingest_type: IngestType,
        request: IngestRequest<R>,
    ) -> Result<u64, SessionError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let session = self.get_or_create(id)?;
        if session.state().is_terminal() {
            debug!("Rejecting ingest for finished session {}", id);
            return Err(SessionError::Terminated(id));
        }

        session.open(ingest_type).await?;
        Ok(session.write(request).await?)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<TranscodeSession>> {
        self.sessions().get(&id).cloned()
    }

    pub fn snapshot(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.get(id).map(|s| s.snapshot())
    }

    /// Snapshots of all known sessions, ordered by id.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut list: Vec<SessionSnapshot> =
            self.sessions().values().map(|s| s.snapshot()).collect();
        list.sort_by_key(|s| s.id);
        list
    }

    pub fn get_active_session_count(&self) -> usize {
        self.sessions().values().filter(|s| s.is_open()).count()
    }

    /// Explicitly closes the session of `id`.
    pub async fn close_session(&self, id: SessionId) -> Result<SessionSnapshot, SessionError> {
        let session = self.get(id).ok_or(SessionError::NotFound)?;
        session.close().await;
        Ok(session.snapshot())
    }

    /// Closes every session. Teardowns run concurrently.
    pub async fn shutdown_all_sessions(&self) {
        let sessions: Vec<Arc<TranscodeSession>> = self.sessions().values().cloned().collect();
        info!("Shutting down {} sessions", sessions.len());
        join_all(sessions.iter().map(|s| s.close())).await;
    }

    /// Forgets finished sessions that closed more than `older_than` ago.
    /// Returns how many were removed.
    pub fn cleanup_finished_sessions(&self, older_than: Duration) -> usize {
        let now = Utc::now();
        let older_than = chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::MAX);
        let mut sessions = self.sessions();

        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|s| s.state().is_terminal())
            .filter(|s| match s.closed_at() {
                Some(closed_at) => now - closed_at >= older_than,
                None => false,
            })
            .map(|s| s.id())
            .collect();

        for id in &expired {
            sessions.remove(id);
            self.registry.remove(*id);
        }
        if !expired.is_empty() {
            info!("Removed {} finished sessions", expired.len());
        }
        expired.len()
    }

    fn get_or_create(&self, id: SessionId) -> Result<Arc<TranscodeSession>, SessionError> {
        let mut sessions = self.sessions();
        if let Some(session) = sessions.get(&id) {
            return Ok(Arc::clone(session));
        }

        let live = sessions
            .values()
            .filter(|s| !s.state().is_terminal())
            .count();
        if live >= self.max_sessions {
            warn!(
                "Session limit of {} reached, rejecting session {}",
                self.max_sessions, id
            );
            return Err(SessionError::SessionLimitReached);
        }

        let registry: Arc<dyn SessionRegistry> = self.registry.clone();
        let session = TranscodeSession::new(
            id,
            Arc::clone(&self.settings),
            registry,
            Arc::clone(&self.builder),
        );
        sessions.insert(id, Arc::clone(&session));
        Ok(session)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<TranscodeSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
