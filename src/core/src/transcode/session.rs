//! Transcode session lifecycle.
//!
//! One [`TranscodeSession`] exists per ingested stream. It owns the
//! transcoder process, the write end of its stdin pipe and the inactivity
//! watchdog, and moves through `INIT -> RUNNING -> {EOS, FAILED}`.
//!
//! Concurrency
//! - Every operation that touches the process (open, write, close, timeout)
//!   runs under the `lifecycle` lock.
//! - `state` is the authoritative field. It is only changed through
//!   [`TranscodeSession::transition`], which rejects anything but a forward
//!   move and notifies the registry once per accepted transition.
//! - Status reads (`state`, `snapshot`) never wait on the lifecycle lock.
//! - A write holds the lifecycle lock while it copies the body. `close`
//!   cancels `closing` first, so a copy stuck on a silent producer gives the
//!   lock up. A read that stays idle for the inactivity timeout ends the
//!   session the same way the watchdog would.
//!
//! Ownership
//! - Whoever creates a session must call [`TranscodeSession::close`] on
//!   every exit path. A process dropped while still owned is killed and a
//!   warning is logged, but that is a leak report, not a cleanup strategy.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error_handling::types::TranscodeError;
use crate::session_management::registry::SessionRegistry;
use crate::transcode::command_builder::CommandBuilder;
use crate::transcode::process::TranscoderProcess;
use crate::transcode::types::{
    IngestRequest, IngestType, SessionId, SessionSnapshot, SessionState, SessionStats,
};
use crate::transcode::watchdog::Watchdog;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Process-wide settings every session is constructed with.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Transcoder executable.
    pub command: PathBuf,
    /// Directory of the per-session log files.
    pub log_dir: PathBuf,
    /// Inactivity timeout.
    pub timeout: Duration,
}

impl SessionSettings {
    pub fn log_path_for(&self, id: SessionId) -> PathBuf {
        self.log_dir.join(format!("{}.log", id))
    }
}

/// Why a body copy stopped before the end of the body.
enum CopyError {
    Io(std::io::Error),
    /// `close` was requested while the copy was in progress.
    Closed,
    /// The producer sent nothing for a whole inactivity timeout.
    Idle,
}

struct Status {
    state: SessionState,
    ingest_type: Option<IngestType>,
    stats: SessionStats,
    created_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
}

struct Lifecycle {
    args: String,
    process: Option<TranscoderProcess>,
    watchdog: Watchdog,
}

pub struct TranscodeSession {
    id: SessionId,
    settings: Arc<SessionSettings>,
    registry: Arc<dyn SessionRegistry>,
    builder: Arc<dyn CommandBuilder>,
    status: Mutex<Status>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    closing: CancellationToken,
}

impl TranscodeSession {
    /// Creates a session in `INIT` and registers it.
    pub fn new(
        id: SessionId,
        settings: Arc<SessionSettings>,
        registry: Arc<dyn SessionRegistry>,
        builder: Arc<dyn CommandBuilder>,
    ) -> Arc<Self> {
        debug!("[session {}] created", id);
        let watchdog = Watchdog::new(settings.timeout);
        let session = Arc::new(Self {
            id,
            settings,
            registry,
            builder,
            status: Mutex::new(Status {
                state: SessionState::Init,
                ingest_type: None,
                stats: SessionStats::default(),
                created_at: Utc::now(),
                opened_at: None,
                closed_at: None,
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle {
                args: String::new(),
                process: None,
                watchdog,
            }),
            closing: CancellationToken::new(),
        });
        session.registry.session_update(id, SessionState::Init);
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.status().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub fn ingest_type(&self) -> Option<IngestType> {
        self.status().ingest_type
    }

    pub fn stats(&self) -> SessionStats {
        self.status().stats.clone()
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.status().closed_at
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.status();
        SessionSnapshot {
            id: self.id,
            state: status.state,
            ingest_type: status.ingest_type,
            bytes_in: status.stats.bytes_in,
            bytes_out: status.stats.bytes_out,
            calls_in: status.stats.calls_in,
            cpu_user_secs: status.stats.cpu_user.map(|d| d.as_secs_f64()),
            cpu_system_secs: status.stats.cpu_system.map(|d| d.as_secs_f64()),
            exit_code: status.stats.exit_code,
            exit_signal: status.stats.exit_signal,
            created_at: status.created_at,
            opened_at: status.opened_at,
            closed_at: status.closed_at,
        }
    }

    /// Whether the inactivity timer currently has a pending firing.
    pub async fn is_watchdog_armed(&self) -> bool {
        self.lifecycle.lock().await.watchdog.is_armed()
    }

    /// Argument string the transcoder was started with (empty before `open`).
    pub async fn command_args(&self) -> String {
        self.lifecycle.lock().await.args.clone()
    }

    /// Starts the transcoder for `ingest_type`.
    ///
    /// No-op if the session is already running. A session that already
    /// reached `EOS` or `FAILED` cannot be reopened.
    pub async fn open(self: &Arc<Self>, ingest_type: IngestType) -> Result<(), TranscodeError> {
        let mut lifecycle = self.lifecycle.lock().await;

        match self.state() {
            SessionState::Running => return Ok(()),
            SessionState::Eos | SessionState::Failed => {
                return Err(TranscodeError::TranscodeStartFailure(format!(
                    "session {} already terminated",
                    self.id
                )))
            }
            SessionState::Init => {}
        }

        let args = self.builder.build_command(self.id, ingest_type);
        info!(
            "[session {}] Opening transcoder session: {} {}",
            self.id,
            self.settings.command.display(),
            args
        );

        let argv: Vec<String> = args.split_whitespace().map(str::to_string).collect();
        let log_path = self.settings.log_path_for(self.id);
        let process = match TranscoderProcess::spawn(&self.settings.command, &argv, &log_path) {
            Ok(process) => process,
            Err(e) => {
                error!("[session {}] Error starting transcoder: {}", self.id, e);
                self.transition(SessionState::Failed);
                self.status().closed_at = Some(Utc::now());
                return Err(e);
            }
        };

        info!(
            "[session {}] Transcoder running with pid {}, logging to {}",
            self.id,
            process.pid(),
            log_path.display()
        );
        lifecycle.args = args;
        lifecycle.process = Some(process);
        {
            let mut status = self.status();
            status.ingest_type = Some(ingest_type);
            status.opened_at = Some(Utc::now());
        }
        self.arm_watchdog(&mut lifecycle);
        self.transition(SessionState::Running);
        Ok(())
    }

    /// Checks that the request's content type matches the ingest type.
    /// Never changes session state or counters.
    pub fn validate_request<R>(&self, request: &IngestRequest<R>) -> Result<(), TranscodeError> {
        let ingest_type = self.ingest_type();
        let accepted = match (ingest_type, request.content_type.as_deref()) {
            (Some(t), Some(content_type)) => t.accepts(content_type),
            _ => false,
        };
        if accepted {
            return Ok(());
        }
        Err(TranscodeError::WrongMimetype {
            expected: ingest_type
                .map(|t| t.mime_type().to_string())
                .unwrap_or_else(|| "an open session".to_string()),
            actual: request.content_type.clone(),
        })
    }

    /// Streams the request body into the transcoder.
    ///
    /// Returns the number of bytes forwarded. An empty body closes the
    /// session gracefully (`EOS`); a copy error closes it as `FAILED` and is
    /// reported as [`TranscodeError::TranscodeFailure`]. A concurrent `close`
    /// or a body that stays silent for the inactivity timeout ends the copy
    /// early and closes the session as `EOS`. The body is dropped before
    /// this returns.
    pub async fn write<R>(self: &Arc<Self>, request: IngestRequest<R>) -> Result<u64, TranscodeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut lifecycle = self.lifecycle.lock().await;

        if !self.is_open() {
            return Err(TranscodeError::TranscodeFailure(format!(
                "session {} is not open",
                self.id
            )));
        }

        // The write itself counts as activity.
        lifecycle.watchdog.disarm();
        debug!("[session {}] Writing data to session", self.id);

        if let Err(e) = self.validate_request(&request) {
            warn!("[session {}] Rejected request: {}", self.id, e);
            self.arm_watchdog(&mut lifecycle);
            return Err(e);
        }

        let IngestRequest { mut body, .. } = request;
        let outcome = match lifecycle.process.as_mut() {
            Some(process) => self.forward(process, &mut body).await,
            None => Err(CopyError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transcoder process missing",
            ))),
        };
        drop(body);
        self.status().stats.calls_in += 1;

        match outcome {
            Ok(0) => {
                info!("[session {}] Empty body, closing session for good", self.id);
                self.teardown(&mut lifecycle, SessionState::Eos).await;
                Ok(0)
            }
            Ok(written) => {
                debug!("[session {}] Written {} bytes", self.id, written);
                self.arm_watchdog(&mut lifecycle);
                Ok(written)
            }
            Err(CopyError::Closed) => {
                info!("[session {}] Write interrupted by close", self.id);
                self.teardown(&mut lifecycle, SessionState::Eos).await;
                Err(TranscodeError::TranscodeFailure(format!(
                    "session {} closed during write",
                    self.id
                )))
            }
            Err(CopyError::Idle) => {
                info!(
                    "[session {}] Session timeout after {:?} without body data",
                    self.id, self.settings.timeout
                );
                self.teardown(&mut lifecycle, SessionState::Eos).await;
                Err(TranscodeError::TranscodeFailure(format!(
                    "no data received for {:?}",
                    self.settings.timeout
                )))
            }
            Err(CopyError::Io(e)) => {
                warn!("[session {}] Closing session on broken pipe: {}", self.id, e);
                self.teardown(&mut lifecycle, SessionState::Failed).await;
                Err(TranscodeError::TranscodeFailure(e.to_string()))
            }
        }
    }

    /// Graceful close. Cancels the watchdog and, if the session is running,
    /// stops the transcoder and records its CPU usage. Safe to call any number
    /// of times from any task.
    pub async fn close(&self) {
        // Only a running session has a copy to interrupt. Closing in INIT
        // must not poison a later open.
        if self.is_open() {
            self.closing.cancel();
        }
        let mut lifecycle = self.lifecycle.lock().await;
        self.teardown(&mut lifecycle, SessionState::Eos).await;
    }

    /// Watchdog entry point. Ignores firings that were superseded by a write
    /// while they were waiting for the lifecycle lock.
    pub async fn handle_timeout(&self, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.watchdog.claim_firing(generation) {
            debug!("[session {}] Ignoring stale timeout", self.id);
            return;
        }
        info!(
            "[session {}] Session timeout after {:?} of inactivity",
            self.id,
            lifecycle.watchdog.timeout()
        );
        self.teardown(&mut lifecycle, SessionState::Eos).await;
    }

    async fn forward<R>(
        &self,
        process: &mut TranscoderProcess,
        body: &mut R,
    ) -> Result<u64, CopyError>
    where
        R: AsyncRead + Unpin,
    {
        let idle = self.settings.timeout;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = tokio::select! {
                biased;
                _ = self.closing.cancelled() => return Err(CopyError::Closed),
                read = tokio::time::timeout(idle, body.read(&mut buf)) => match read {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(CopyError::Io(e)),
                    Err(_) => return Err(CopyError::Idle),
                },
            };
            if n == 0 {
                return Ok(written);
            }
            self.status().stats.bytes_in += n as u64;
            tokio::select! {
                biased;
                _ = self.closing.cancelled() => return Err(CopyError::Closed),
                result = process.write_chunk(&buf[..n]) => result.map_err(CopyError::Io)?,
            }
            self.status().stats.bytes_out += n as u64;
            written += n as u64;
        }
    }

    /// The single teardown path shared by close, timeout, end of stream and
    /// write errors. Only the first call on a running session does any work.
    async fn teardown(&self, lifecycle: &mut Lifecycle, outcome: SessionState) {
        lifecycle.watchdog.disarm();

        if !self.transition(outcome) {
            return;
        }
        let Some(mut process) = lifecycle.process.take() else {
            return;
        };
        info!("[session {}] Closing session ({})", self.id, outcome);

        process.close_pipe();

        debug!("[session {}] Sending signal to pid {}", self.id, process.pid());
        if let Err(e) = process.interrupt() {
            // The transcoder may have exited on its own already.
            warn!("[session {}] Sending signal to transcoder failed: {}", self.id, e);
        }

        debug!("[session {}] Waiting on process", self.id);
        match process.wait().await {
            Ok(exit) => {
                info!(
                    "[session {}] Transcoder exited (code {:?}, signal {:?}, user {:?}, system {:?})",
                    self.id, exit.code, exit.signal, exit.user_time, exit.system_time
                );
                let mut status = self.status();
                status.stats.cpu_user = Some(exit.user_time);
                status.stats.cpu_system = Some(exit.system_time);
                status.stats.exit_code = exit.code;
                status.stats.exit_signal = exit.signal;
            }
            Err(e) => {
                warn!("[session {}] Waiting on transcoder failed: {}", self.id, e);
            }
        }
        self.status().closed_at = Some(Utc::now());
    }

    /// Applies a forward state change and notifies the registry. Returns
    /// false (and notifies nobody) for any other change.
    fn transition(&self, next: SessionState) -> bool {
        {
            let mut status = self.status();
            if !status.state.can_transition_to(next) {
                return false;
            }
            status.state = next;
        }
        debug!("[session {}] -> {}", self.id, next);
        self.registry.session_update(self.id, next);
        true
    }

    fn arm_watchdog(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        let session = Arc::downgrade(self);
        lifecycle.watchdog.arm(move |generation| async move {
            if let Some(session) = session.upgrade() {
                session.handle_timeout(generation).await;
            }
        });
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
