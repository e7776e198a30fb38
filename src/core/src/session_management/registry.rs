//! Session registry.
//!
//! Sessions report every accepted state transition through
//! [`SessionRegistry::session_update`]. The registry is what the rest of the
//! server reads to present aggregate status.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;

use crate::transcode::types::{SessionId, SessionState};

/// Receiver of session state transitions.
///
/// Called synchronously from inside the transition path, possibly from many
/// sessions at once, so implementations must be cheap and must not block.
pub trait SessionRegistry: Send + Sync {
    fn session_update(&self, id: SessionId, state: SessionState);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryEntry {
    pub id: SessionId,
    pub state: SessionState,
    pub updated_at: DateTime<Utc>,
    /// Number of updates received for this id.
    pub transitions: u32,
}

/// Number of registered sessions per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    pub init: usize,
    pub running: usize,
    pub eos: usize,
    pub failed: usize,
}

impl RegistrySummary {
    pub fn total(&self) -> usize {
        self.init + self.running + self.eos + self.failed
    }
}

/// In-memory registry backing the status API.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: Mutex<HashMap<SessionId, RegistryEntry>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SessionId) -> Option<RegistryEntry> {
        self.lock().get(&id).cloned()
    }

    /// All entries, ordered by id.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        let mut list: Vec<RegistryEntry> = self.lock().values().cloned().collect();
        list.sort_by_key(|e| e.id);
        list
    }

    pub fn remove(&self, id: SessionId) -> Option<RegistryEntry> {
        self.lock().remove(&id)
    }

    pub fn summary(&self) -> RegistrySummary {
        let mut summary = RegistrySummary::default();
        for entry in self.lock().values() {
            match entry.state {
                SessionState::Init => summary.init += 1,
                SessionState::Running => summary.running += 1,
                SessionState::Eos => summary.eos += 1,
                SessionState::Failed => summary.failed += 1,
            }
        }
        summary
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionRegistry for MemoryRegistry {
    fn session_update(&self, id: SessionId, state: SessionState) {
        debug!("Registry: session {} is now {}", id, state);
        let now = Utc::now();
        let mut entries = self.lock();
        let entry = entries.entry(id).or_insert(RegistryEntry {
            id,
            state,
            updated_at: now,
            transitions: 0,
        });
        entry.state = state;
        entry.updated_at = now;
        entry.transitions += 1;
    }
}
