//! The set of live sessions.

use std::sync::Arc;

use dashmap::DashMap;

use crate::message::ClientId;
use crate::session::Session;

/// A thread-safe set of live [`Session`]s, keyed by [`ClientId`].
///
/// Backed by `DashMap`, which gives lock-free insert/remove and a
/// `snapshot` that is safe to iterate concurrently with mutation: the
/// iteration observes a consistent view as of the moment each shard is
/// walked, so a broadcast always fans out to the set of sessions present
/// when the snapshot was taken, never a set mutated mid-iteration.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<ClientId, Arc<Session>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id.clone(), session);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// A cheap point-in-time copy of session handles, safe to iterate
    /// outside any lock and concurrently with further inserts/removals.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }
}
