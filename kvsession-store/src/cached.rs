//! Write-back cached session backend
//!
//! Attribute reads and writes only touch the local map. The whole map is
//! written to the backing store as one JSON document on `save`, and only when
//! something changed since the last flush; `load` replaces the local map with
//! the stored document.

use crate::connection::{tcp_connector_factory, ConnectorFactory};
use crate::pool::ConnectionPool;
use crate::registry::SessionRegistry;
use crate::resp::{Command, Reply};
use async_trait::async_trait;
use kvsession_core::{
    config_error, AttributeMap, DirtyFlag, ErrorContext, PoolConfig, Session, SessionError,
    SessionId, SessionManager, SessionRef, SessionResult, Value,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct CachedState {
    attributes: AttributeMap,
    flag: DirtyFlag,
}

#[derive(Debug)]
pub struct CachedSession {
    id: SessionId,
    pool: ConnectionPool,
    state: RwLock<CachedState>,
}

impl CachedSession {
    /// Create an empty session bound to `pool`. Nothing is fetched until
    /// [`CachedSession::load`] is called.
    pub fn new(id: SessionId, pool: ConnectionPool) -> Self {
        Self {
            id,
            pool,
            state: RwLock::new(CachedState::default()),
        }
    }

    /// Replace the local attributes with the document stored under this
    /// session's id. On any failure the local state is left as it was.
    pub async fn load(&self) -> SessionResult<()> {
        let mut state = self.state.write().await;

        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|e| self.persistence_failure("load", e))?;
        let reply = connection
            .execute(&Command::get(self.id.as_str()))
            .await
            .map_err(|e| self.persistence_failure("load", e))?;
        drop(connection);

        let payload = match reply {
            Reply::Bulk(Some(payload)) => payload,
            Reply::Bulk(None) => {
                return Err(self.persistence_message("load", "no data stored for session"))
            }
            Reply::Error(message) => return Err(self.persistence_message("load", &message)),
            other => {
                return Err(self.persistence_message(
                    "load",
                    &format!("unexpected GET reply {:?}", other),
                ))
            }
        };

        let attributes: AttributeMap =
            serde_json::from_slice(&payload).map_err(|e| SessionError::Persistence {
                message: format!("Failed to decode stored session {}: {}", self.id, e),
                source: Some(Box::new(e)),
                context: self.context("load"),
            })?;

        debug!(session_id = %self.id, keys = attributes.len(), "Loaded session from backing store");
        state.attributes = attributes;
        state.flag = DirtyFlag::Clean;
        Ok(())
    }

    pub async fn flag(&self) -> DirtyFlag {
        self.state.read().await.flag
    }

    /// Copy of the current local attributes
    pub async fn snapshot(&self) -> AttributeMap {
        self.state.read().await.attributes.clone()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn context(&self, operation: &str) -> ErrorContext {
        ErrorContext::new("cached_session")
            .with_operation(operation)
            .with_metadata("session_id", self.id.as_str())
    }

    fn persistence_message(&self, operation: &str, message: &str) -> SessionError {
        SessionError::Persistence {
            message: format!("{} of session {} failed: {}", operation, self.id, message),
            source: None,
            context: self.context(operation),
        }
    }

    /// Pool exhaustion and rejected credentials keep their own kind; every
    /// other failure during save/load is a persistence failure.
    fn persistence_failure(&self, operation: &str, error: SessionError) -> SessionError {
        match error {
            SessionError::PoolExhausted { .. }
            | SessionError::Authentication { .. }
            | SessionError::Persistence { .. } => error,
            other => SessionError::Persistence {
                message: format!("{} of session {} failed: {}", operation, self.id, other),
                source: Some(Box::new(other)),
                context: self
                    .context(operation)
                    .with_suggestion("Retry once the backing store is reachable"),
            },
        }
    }
}

#[async_trait]
impl Session for CachedSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    async fn set(&self, key: &str, value: Value) -> SessionResult<()> {
        let mut state = self.state.write().await;
        state.attributes.insert(key.to_string(), value);
        state.flag = DirtyFlag::Modified;
        Ok(())
    }

    async fn get(&self, key: &str) -> SessionResult<Value> {
        let state = self.state.read().await;
        state
            .attributes
            .get(key)
            .cloned()
            .ok_or_else(|| SessionError::KeyNotFound {
                key: key.to_string(),
            })
    }

    async fn del(&self, key: &str) -> SessionResult<()> {
        let mut state = self.state.write().await;
        state.attributes.remove(key);
        state.flag = DirtyFlag::Modified;
        Ok(())
    }

    async fn save(&self) -> SessionResult<()> {
        let mut state = self.state.write().await;
        if !state.flag.is_modified() {
            debug!(session_id = %self.id, "Session unchanged, skipping flush");
            return Ok(());
        }

        let payload =
            serde_json::to_string(&state.attributes).map_err(|e| SessionError::Persistence {
                message: format!("Failed to encode session {}: {}", self.id, e),
                source: Some(Box::new(e)),
                context: self.context("save"),
            })?;

        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|e| self.persistence_failure("save", e))?;
        let reply = connection
            .execute(&Command::set(self.id.as_str(), &payload))
            .await
            .map_err(|e| self.persistence_failure("save", e))?;
        drop(connection);

        match reply {
            Reply::Status(_) => {
                state.flag = DirtyFlag::Clean;
                debug!(
                    session_id = %self.id,
                    keys = state.attributes.len(),
                    bytes = payload.len(),
                    "Flushed session to backing store"
                );
                Ok(())
            }
            Reply::Error(message) => Err(self.persistence_message("save", &message)),
            other => Err(self.persistence_message(
                "save",
                &format!("unexpected SET reply {:?}", other),
            )),
        }
    }
}

/// Manager owning [`CachedSession`]s and the pool they share
pub struct CachedSessionManager {
    connector_factory: ConnectorFactory,
    pool_config: PoolConfig,
    pool: Option<ConnectionPool>,
    registry: SessionRegistry<CachedSession>,
}

impl CachedSessionManager {
    /// Manager dialing plain TCP with the default pool limits. Call
    /// [`SessionManager::init`] before creating sessions.
    pub fn new() -> Self {
        Self::with_pool_config(PoolConfig::default())
    }

    pub fn with_pool_config(pool_config: PoolConfig) -> Self {
        Self::with_connector_factory(tcp_connector_factory(), pool_config)
    }

    /// Manager dialing through a custom transport
    pub fn with_connector_factory(
        connector_factory: ConnectorFactory,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            connector_factory,
            pool_config,
            pool: None,
            registry: SessionRegistry::new(),
        }
    }

    /// The pool built by `init`, if it has run
    pub fn pool(&self) -> Option<&ConnectionPool> {
        self.pool.as_ref()
    }

    fn require_pool(&self) -> SessionResult<&ConnectionPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| config_error!("Cached session manager used before init", "cached_manager"))
    }

    pub async fn create_cached_session(&self) -> SessionResult<Arc<CachedSession>> {
        let pool = self.require_pool()?.clone();
        let session_id = SessionId::new();
        let session = Arc::new(CachedSession::new(session_id.clone(), pool));
        self.registry
            .insert(session_id.clone(), Arc::clone(&session))
            .await;

        debug!(session_id = %session_id, "Created cached session");
        Ok(session)
    }

    /// Materialize `session_id` from the backing store on the shared pool and
    /// register it, replacing any session already registered under that id.
    /// The registry is left untouched when the load fails.
    pub async fn load_session(&self, session_id: &str) -> SessionResult<Arc<CachedSession>> {
        let pool = self.require_pool()?.clone();
        let session_id = SessionId::from(session_id);
        let session = Arc::new(CachedSession::new(session_id.clone(), pool));
        session.load().await?;

        self.registry
            .insert(session_id.clone(), Arc::clone(&session))
            .await;

        debug!(session_id = %session_id, "Registered session loaded from backing store");
        Ok(session)
    }

    /// Registry lookup only; an id this process never created or loaded is
    /// `SessionNotFound` even when the backing store holds data for it.
    pub async fn get_cached(&self, session_id: &str) -> SessionResult<Arc<CachedSession>> {
        self.registry.get(session_id).await
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }
}

impl Default for CachedSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionManager for CachedSessionManager {
    async fn init(&mut self, address: &str, options: &[String]) -> SessionResult<()> {
        if address.trim().is_empty() {
            return Err(config_error!(
                "Backing store address must not be empty",
                "cached_manager"
            ));
        }

        let credential = options.first().filter(|c| !c.is_empty()).cloned();
        let connector = (self.connector_factory)(address);
        self.pool = Some(ConnectionPool::new(
            connector,
            credential,
            self.pool_config.clone(),
        ));

        info!(address, "Cached session manager initialized");
        Ok(())
    }

    async fn create_session(&self) -> SessionResult<SessionRef> {
        let session: SessionRef = self.create_cached_session().await?;
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> SessionResult<SessionRef> {
        let session: SessionRef = self.get_cached(session_id).await?;
        Ok(session)
    }
}
