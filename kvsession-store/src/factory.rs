//! Factory for creating session managers
//!
//! Selects one of the two manager implementations at construction time so
//! callers can hold a `Box<dyn SessionManager>` and switch backends through
//! configuration alone.

use crate::cached::CachedSessionManager;
use crate::local::LocalSessionManager;
use kvsession_core::{BackendKind, KvSessionConfig, PoolConfig, SessionManager, SessionResult};
use tracing::info;

/// Create an uninitialized manager for `kind` with default pool limits
pub fn create_manager(kind: BackendKind) -> Box<dyn SessionManager> {
    create_manager_with_pool_config(kind, PoolConfig::default())
}

pub fn create_manager_with_pool_config(
    kind: BackendKind,
    pool_config: PoolConfig,
) -> Box<dyn SessionManager> {
    match kind {
        BackendKind::Local => Box::new(LocalSessionManager::new()),
        BackendKind::Cached => Box::new(CachedSessionManager::with_pool_config(pool_config)),
    }
}

/// Validate `config`, build the configured manager and run its `init`
pub async fn create_manager_from_config(
    config: &KvSessionConfig,
) -> SessionResult<Box<dyn SessionManager>> {
    config.validate()?;

    let mut manager = create_manager_with_pool_config(config.backend, config.pool.clone());
    manager
        .init(&config.store.address, &config.init_options())
        .await?;

    info!(backend = config.backend.as_str(), "Session manager ready");
    Ok(manager)
}
