//! Session registry
//!
//! Maps connection identities to their [`Session`]. Entries are created on
//! the first command read from a connection and removed when its read loop
//! ends.

use crate::session::Session;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Process-wide session map
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session of a connection, creating it with `make` if absent.
    ///
    /// Returns the session and whether it was created by this call.
    pub fn get_or_create<F>(&self, id: Uuid, make: F) -> (Arc<Session>, bool)
    where
        F: FnOnce() -> Arc<Session>,
    {
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let session = make();
                entry.insert(session.clone());
                tracing::debug!("Registered session {} ({} live)", id, self.sessions.len());
                (session, true)
            }
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Drop a connection's session
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
