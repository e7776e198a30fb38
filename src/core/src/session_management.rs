//! Session management.
//!
//! [`SessionManager`] maps stream ids to transcode sessions, creating them on
//! the first ingest request and closing them on request, on shutdown or when
//! they are cleaned up. [`MemoryRegistry`] collects the state transitions
//! every session reports.

/// Registry of session state transitions.
pub mod registry;
/// Submodule for session manager implementation.
pub mod session_manager;

pub use registry::{MemoryRegistry, RegistryEntry, RegistrySummary, SessionRegistry};
pub use session_manager::SessionManager;
