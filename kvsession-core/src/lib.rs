//! kvsession core - session types, capability traits and ambient infrastructure
//!
//! This crate defines the abstractions shared by every session backend:
//! the `Session`/`SessionManager` capability traits, the error taxonomy,
//! configuration and logging.

pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use serde_json::Value;
pub use tracing;
