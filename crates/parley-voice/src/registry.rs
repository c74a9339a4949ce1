//! Concurrency-safe collection of active sessions.

use crate::session::Session;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The single shared resource across sessions: a map from session id to
/// live session. `remove` may race between the idle timer, the upstream
/// disconnect path, and the client close path — exactly one caller
/// observes the entry, the rest no-op.
///
/// The registry is lookup-only with respect to session internals: it
/// never mutates a session, so the state machine invariant stays inside
/// [`Session`]'s own methods.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly created session under its id.
    pub async fn insert(&self, session: Arc<Session>) {
        let id = session.id();
        if self
            .sessions
            .write()
            .await
            .insert(id, session)
            .is_some()
        {
            // v4 ids should never collide; if one does, the old entry was
            // already unreachable and the new session wins.
            tracing::warn!(session_id = %id, "replaced existing registry entry");
        }
    }

    /// Looks up a live session by id.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removes a session, returning it if this caller won the race.
    pub async fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(id)
    }

    /// Number of live sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
