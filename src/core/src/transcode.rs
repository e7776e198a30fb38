//! Transcode subsystem.
//!
//! A transcode session feeds ingested media into an external transcoder
//! process through its stdin pipe. The transcoder's stdout and stderr go to a
//! per-session log file, and an inactivity watchdog closes sessions that stop
//! receiving data.
//!
//! Re-exports:
//! - [`TranscodeSession`], [`SessionSettings`]: the session state machine.
//! - [`CommandBuilder`], [`FfmpegCommandBuilder`]: transcoder arguments.
//! - [`IngestType`], [`IngestRequest`], [`SessionState`], [`SessionStats`]: core types.
//!
//! Example (non-running):
//! ```ignore
//! use videoingest::transcode::{IngestRequest, IngestType, TranscodeSession};
//!
//! session.open(IngestType::MpegTs).await?;
//! let written = session
//!     .write(IngestRequest::new(Some("video/mp2t".into()), body))
//!     .await?;
//! session.close().await;
//! ```

pub mod command_builder;
pub mod process;
pub mod session;
pub mod types;
pub mod watchdog;

pub use command_builder::{CommandBuilder, FfmpegCommandBuilder};
pub use session::{SessionSettings, TranscodeSession};
pub use types::{
    IngestRequest, IngestType, SessionId, SessionSnapshot, SessionState, SessionStats,
};
