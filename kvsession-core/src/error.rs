//! Unified error handling system
//!
//! Provides the session error taxonomy with context, recovery suggestions, and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type SessionResult<T> = Result<T, SessionError>;

/// Error context providing additional information for debugging and recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
    /// Recovery suggestions
    pub recovery_suggestions: Vec<String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
            recovery_suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.recovery_suggestions.push(suggestion.to_string());
        self
    }
}

/// Coarse classification of [`SessionError`] for callers that only branch on the kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    KeyNotFound,
    SessionNotFound,
    PersistenceFailure,
    PoolExhausted,
    AuthFailure,
    Network,
    Protocol,
    Config,
    Io,
}

/// Main error type for the session subsystem
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Key not found: {key}")]
    KeyNotFound { key: String },

    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Connection pool exhausted ({active} of {max_active} connections active)")]
    PoolExhausted {
        active: usize,
        max_active: usize,
        context: ErrorContext,
    },

    #[error("Authentication error: {message}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            SessionError::Persistence { context, .. } => Some(context),
            SessionError::PoolExhausted { context, .. } => Some(context),
            SessionError::Authentication { context, .. } => Some(context),
            SessionError::Network { context, .. } => Some(context),
            SessionError::Protocol { context, .. } => Some(context),
            SessionError::Config { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            SessionError::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            SessionError::Persistence { .. } => ErrorKind::PersistenceFailure,
            SessionError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            SessionError::Authentication { .. } => ErrorKind::AuthFailure,
            SessionError::Network { .. } => ErrorKind::Network,
            SessionError::Protocol { .. } => ErrorKind::Protocol,
            SessionError::Config { .. } => ErrorKind::Config,
            SessionError::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if error is recoverable
    ///
    /// Recoverable errors may succeed when the caller retries; the subsystem
    /// itself never retries.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Network { .. }
                | SessionError::Persistence { .. }
                | SessionError::PoolExhausted { .. }
        )
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            SessionError::KeyNotFound { .. } | SessionError::SessionNotFound { .. } => {
                warn!(error = %self, "Lookup miss");
            }
            SessionError::Network { .. } | SessionError::PoolExhausted { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Backing store unavailable (may be recoverable)"
                );
            }
            SessionError::Config { .. } => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Configuration error"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! persistence_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionError::Persistence {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::SessionError::Persistence {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! network_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionError::Network {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component),
        }
    };
    ($msg:expr, $component:expr, $source:expr) => {
        $crate::SessionError::Network {
            message: $msg.to_string(),
            source: Some(Box::new($source)),
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check that the backing store is reachable"),
        }
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionError::Protocol {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr, $component:expr) => {
        $crate::SessionError::Config {
            message: $msg.to_string(),
            source: None,
            context: $crate::ErrorContext::new($component)
                .with_suggestion("Check your configuration file")
                .with_suggestion("Run 'kvsession config --init' to create default config"),
        }
    };
}
