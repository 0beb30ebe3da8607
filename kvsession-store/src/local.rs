//! In-process session backend
//!
//! Sessions live only in this process's memory; `save` has nothing to flush.

use crate::registry::SessionRegistry;
use async_trait::async_trait;
use kvsession_core::{
    AttributeMap, Session, SessionError, SessionId, SessionManager, SessionRef, SessionResult,
    Value,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct LocalSession {
    id: SessionId,
    attributes: RwLock<AttributeMap>,
}

impl LocalSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            attributes: RwLock::new(AttributeMap::with_capacity(16)),
        }
    }

    /// Copy of the current attributes
    pub async fn snapshot(&self) -> AttributeMap {
        self.attributes.read().await.clone()
    }
}

#[async_trait]
impl Session for LocalSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn set(&self, key: &str, value: Value) -> SessionResult<()> {
        let mut attributes = self.attributes.write().await;
        attributes.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> SessionResult<Value> {
        let attributes = self.attributes.read().await;
        attributes
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::KeyNotFound {
                key: key.to_string(),
            })
    }

    async fn del(&self, key: &str) -> SessionResult<()> {
        let mut attributes = self.attributes.write().await;
        attributes.remove(key);
        Ok(())
    }

    async fn save(&self) -> SessionResult<()> {
        Ok(())
    }
}

/// Manager owning [`LocalSession`]s
pub struct LocalSessionManager {
    registry: SessionRegistry<LocalSession>,
}

impl LocalSessionManager {
    pub fn new() -> Self {
        Self {
            registry: SessionRegistry::new(),
        }
    }

    pub async fn create_local_session(&self) -> SessionResult<Arc<LocalSession>> {
        let session_id = SessionId::new();
        let session = Arc::new(LocalSession::new(session_id.clone()));
        self.registry
            .insert(session_id.clone(), Arc::clone(&session))
            .await;

        debug!(session_id = %session_id, "Created local session");
        Ok(session)
    }

    pub async fn get_local(&self, session_id: &str) -> SessionResult<Arc<LocalSession>> {
        self.registry.get(session_id).await
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }
}

impl Default for LocalSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionManager for LocalSessionManager {
    async fn init(&mut self, _address: &str, _options: &[String]) -> SessionResult<()> {
        Ok(())
    }

    async fn create_session(&self) -> SessionResult<SessionRef> {
        let session: SessionRef = self.create_local_session().await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> SessionResult<SessionRef> {
        let session: SessionRef = self.get_local(session_id).await?;
        Ok(session)
    }
}
