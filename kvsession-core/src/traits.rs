//! Core trait definitions

use crate::error::{ErrorContext, SessionError, SessionResult};
use crate::types::SessionId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Shared handle to a session owned by a manager's registry
pub type SessionRef = Arc<dyn Session>;

/// Per-client key/value bag
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier this session was minted with
    fn id(&self) -> &SessionId;

    /// Store `value` under `key`
    async fn set(&self, key: &str, value: Value) -> SessionResult<()>;

    /// Read the value under `key`, or `KeyNotFound`
    async fn get(&self, key: &str) -> SessionResult<Value>;

    /// Remove `key`; removing an absent key is not an error
    async fn del(&self, key: &str) -> SessionResult<()>;

    /// Flush accumulated mutations to the backing store, if any
    async fn save(&self) -> SessionResult<()>;
}

/// Owner of a registry of sessions
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Bind the manager to a backing store. The first option, when present,
    /// is the store credential.
    async fn init(&mut self, address: &str, options: &[String]) -> SessionResult<()>;

    /// Mint a new session and register it
    async fn create_session(&self) -> SessionResult<SessionRef>;

    /// Look up a registered session, or `SessionNotFound`
    async fn get(&self, session_id: &str) -> SessionResult<SessionRef>;
}

/// Typed accessors layered over the JSON values a [`Session`] stores
#[async_trait]
pub trait SessionExt: Session {
    async fn set_as<T: Serialize + Sync>(&self, key: &str, value: &T) -> SessionResult<()> {
        let value = serde_json::to_value(value).map_err(|e| SessionError::Persistence {
            message: format!("Failed to encode attribute '{}': {}", key, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("session").with_operation("set_as"),
        })?;
        self.set(key, value).await
    }

    async fn get_as<T: DeserializeOwned + Send>(&self, key: &str) -> SessionResult<T> {
        let value = self.get(key).await?;
        serde_json::from_value(value).map_err(|e| SessionError::Persistence {
            message: format!("Failed to decode attribute '{}': {}", key, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("session").with_operation("get_as"),
        })
    }
}

impl<S: Session + ?Sized> SessionExt for S {}
