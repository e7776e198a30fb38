//! Transcoder child process ownership.
//!
//! A [`TranscoderProcess`] owns the spawned child and the write end of its
//! stdin pipe. The read end and the log file are handed to the child at spawn
//! time and the parent keeps no copy of them.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;

use crate::error_handling::types::TranscodeError;

/// Exit accounting reported by the OS for a reaped transcoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub user_time: Duration,
    pub system_time: Duration,
}

pub struct TranscoderProcess {
    pid: u32,
    child: Option<Child>,
    pipe: Option<ChildStdin>,
}

impl TranscoderProcess {
    /// Opens (or appends to) `log_path` and starts `program` with the pipe's
    /// read end as stdin and the log file as stdout and stderr.
    pub fn spawn(
        program: &Path,
        args: &[String],
        log_path: &Path,
    ) -> Result<Self, TranscodeError> {
        let log_file = open_log_file(log_path)?;
        let log_file_err = log_file.try_clone().map_err(|e| {
            error!("Failed to duplicate log file handle {}: {}", log_path.display(), e);
            TranscodeError::TranscodeStartFailure(format!("Failed to duplicate log file: {}", e))
        })?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(".")
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()
            .map_err(|e| {
                error!("Failed to start transcoder {}: {}", program.display(), e);
                TranscodeError::TranscodeStartFailure(format!(
                    "Failed to start {}: {}",
                    program.display(),
                    e
                ))
            })?;

        let pid = child.id();
        let pipe = match child.stdin.take().map(ChildStdin::from_std) {
            Some(Ok(pipe)) => pipe,
            Some(Err(e)) => {
                error!("Failed to register transcoder pipe for pid {}: {}", pid, e);
                reap_after_failed_start(&mut child);
                return Err(TranscodeError::TranscodeStartFailure(format!(
                    "Failed to register pipe: {}",
                    e
                )));
            }
            None => {
                error!("Transcoder pid {} was started without a stdin pipe", pid);
                reap_after_failed_start(&mut child);
                return Err(TranscodeError::TranscodeStartFailure(
                    "Missing stdin pipe".to_string(),
                ));
            }
        };

        debug!("Started transcoder {} with pid {}", program.display(), pid);
        Ok(Self {
            pid,
            child: Some(child),
            pipe: Some(pipe),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_pipe_open(&self) -> bool {
        self.pipe.is_some()
    }

    /// Writes one chunk into the transcoder's stdin.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self.pipe.as_mut() {
            Some(pipe) => pipe.write_all(chunk).await,
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "transcoder pipe already closed",
            )),
        }
    }

    pub fn close_pipe(&mut self) {
        if self.pipe.take().is_some() {
            debug!("Closed pipe to transcoder pid {}", self.pid);
        }
    }

    /// Requests a graceful exit with `SIGINT`.
    pub fn interrupt(&self) -> io::Result<()> {
        // SAFETY: plain POSIX signal delivery. The child is not reaped before
        // `wait` returns, so the pid cannot have been recycled.
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGINT) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Blocks (on the blocking pool) until the child exits and returns its
    /// exit status together with its own resource usage.
    pub async fn wait(mut self) -> io::Result<ProcessExit> {
        self.close_pipe();
        let child = self.child.take();
        let pid = self.pid as libc::pid_t;

        tokio::task::spawn_blocking(move || {
            let exit = wait_with_rusage(pid);
            // The handle is only released once the pid has been reaped.
            drop(child);
            exit
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

impl Drop for TranscoderProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            warn!(
                "Transcoder pid {} dropped without being closed - killing it",
                self.pid
            );
            if let Err(e) = child.kill() {
                warn!("Failed to kill transcoder pid {}: {}", self.pid, e);
            }
            // SIGKILL cannot be caught, so this wait is short.
            if let Err(e) = child.wait() {
                warn!("Failed to reap transcoder pid {}: {}", self.pid, e);
            }
        }
    }
}

fn open_log_file(log_path: &Path) -> Result<File, TranscodeError> {
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            error!("Failed to create log directory {}: {}", dir.display(), e);
            TranscodeError::TranscodeStartFailure(format!(
                "Failed to create log directory: {}",
                e
            ))
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| {
            error!("Failed to open transcoder log {}: {}", log_path.display(), e);
            TranscodeError::TranscodeStartFailure(format!("Failed to open log file: {}", e))
        })
}

fn reap_after_failed_start(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("Failed to kill transcoder pid {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap transcoder pid {}: {}", child.id(), e);
    }
}

fn wait_with_rusage(pid: libc::pid_t) -> io::Result<ProcessExit> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is a plain C struct for which all-zero is a valid value.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        // SAFETY: both out-pointers reference live locals for the whole call.
        let rc = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if rc == pid {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    let (code, signal) = if libc::WIFEXITED(status) {
        (Some(libc::WEXITSTATUS(status)), None)
    } else if libc::WIFSIGNALED(status) {
        (None, Some(libc::WTERMSIG(status)))
    } else {
        (None, None)
    };

    Ok(ProcessExit {
        code,
        signal,
        user_time: timeval_to_duration(usage.ru_utime),
        system_time: timeval_to_duration(usage.ru_stime),
    })
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec).unwrap_or(0);
    Duration::new(secs, micros.saturating_mul(1000))
}
