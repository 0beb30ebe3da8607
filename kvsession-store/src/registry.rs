//! Process-wide session registry shared by both managers

use kvsession_core::{SessionError, SessionId, SessionResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Id → session map. The lock is held only for the lookup or insert itself.
pub struct SessionRegistry<S: ?Sized> {
    sessions: RwLock<HashMap<SessionId, Arc<S>>>,
}

impl<S: ?Sized + Send + Sync> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::with_capacity(1024)),
        }
    }

    pub async fn insert(&self, session_id: SessionId, session: Arc<S>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, session);
    }

    pub async fn get(&self, session_id: &str) -> SessionResult<Arc<S>> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) => Ok(Arc::clone(session)),
            None => {
                debug!(session_id, "Session not registered");
                Err(SessionError::SessionNotFound {
                    session_id: session_id.to_string(),
                })
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}

impl<S: ?Sized + Send + Sync> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}
