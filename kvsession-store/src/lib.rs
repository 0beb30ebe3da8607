//! kvsession store - session backends
//!
//! Two interchangeable implementations of the `Session`/`SessionManager`
//! capabilities from `kvsession-core`:
//!
//! - **Local**: attributes live in process memory only
//! - **Cached**: a write-back cache over a Redis-compatible key-value store,
//!   reached through a pooled, optionally authenticated RESP connection
//!
//! ## Architecture
//!
//! - `resp` / `connection`: wire codec and transports
//! - `pool`: bounded, health-checked connection reuse
//! - `registry`: the id → session map each manager owns
//! - `local` / `cached`: the session and manager implementations
//! - `factory`: backend selection from configuration

pub mod cached;
pub mod connection;
pub mod factory;
pub mod local;
pub mod pool;
pub mod registry;
pub mod resp;

pub use cached::{CachedSession, CachedSessionManager};
pub use connection::{
    tcp_connector_factory, Connection, Connector, ConnectorFactory, TcpConnection, TcpConnector,
};
pub use factory::{create_manager, create_manager_from_config, create_manager_with_pool_config};
pub use local::{LocalSession, LocalSessionManager};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use registry::SessionRegistry;
pub use resp::{read_reply, Command, Reply};
