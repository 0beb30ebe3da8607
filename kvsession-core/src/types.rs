//! Core data type definitions

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use uuid::Uuid;

/// Attribute bag held by every session
pub type AttributeMap = HashMap<String, serde_json::Value>;

/// Opaque session identifier, also used verbatim as the backing-store key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh random (version 4) identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Whether a session's local attributes hold mutations not yet flushed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DirtyFlag {
    #[default]
    Clean,
    Modified,
}

impl DirtyFlag {
    pub fn is_modified(self) -> bool {
        self == DirtyFlag::Modified
    }
}

/// Which session backend a manager is built for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Sessions live only in process memory
    #[default]
    Local,
    /// Write-back cache over a remote key-value store
    Cached,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Cached => "cached",
        }
    }

}

impl std::str::FromStr for BackendKind {
    type Err = crate::error::SessionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(BackendKind::Local),
            "cached" | "redis" => Ok(BackendKind::Cached),
            other => Err(crate::config_error!(
                format!("Unknown session backend '{}'", other),
                "config"
            )),
        }
    }
}

/// Configuration root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvSessionConfig {
    pub backend: BackendKind,
    pub store: StoreConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `host:port` of the backing key-value store
    pub address: String,
    /// Credential sent with AUTH on every freshly dialed connection
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,
    /// Maximum number of open connections (idle + borrowed); 0 means unbounded
    pub max_active: usize,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout_ms: u64,
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_timeout_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 64,
            max_active: 1000,
            idle_timeout_ms: 1000,
        }
    }
}
