//! Connection pool for the backing key-value store
//!
//! Connections are dialed lazily, authenticated once right after dialing, and
//! checked with `PING` every time an idle one is handed out again. Acquisition
//! never waits: once `max_active` connections are open, `get` fails with
//! `PoolExhausted`.

use crate::connection::{tcp_connector_factory, Connection, Connector};
use crate::resp::{Command, Reply};
use kvsession_core::{ErrorContext, PoolConfig, SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Pool occupancy snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections parked and ready for reuse
    pub idle: usize,
    /// Open connections, idle and borrowed
    pub active: usize,
    pub max_idle: usize,
    pub max_active: usize,
}

struct IdleConnection {
    connection: Box<dyn Connection>,
    returned_at: Instant,
}

#[derive(Default)]
struct PoolState {
    /// Most recently returned connection first
    idle: VecDeque<IdleConnection>,
    active: usize,
    closed: bool,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    credential: Option<String>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close idle connections that outlived the idle timeout
    fn prune_stale(&self, state: &mut PoolState) {
        if self.config.idle_timeout_ms == 0 {
            return;
        }
        let timeout = self.config.idle_timeout();
        while state
            .idle
            .back()
            .is_some_and(|idle| idle.returned_at.elapsed() > timeout)
        {
            state.idle.pop_back();
            state.active -= 1;
            debug!(address = %self.connector.address(), "Closed stale idle connection");
        }
    }

    fn release_slot(&self) {
        let mut state = self.lock_state();
        state.active = state.active.saturating_sub(1);
    }

    fn put(&self, connection: Box<dyn Connection>, broken: bool) {
        let mut state = self.lock_state();
        if broken || state.closed {
            state.active = state.active.saturating_sub(1);
            drop(state);
            if broken {
                warn!(address = %self.connector.address(), "Discarded broken connection");
            }
            return;
        }

        state.idle.push_front(IdleConnection {
            connection,
            returned_at: Instant::now(),
        });
        if state.idle.len() > self.config.max_idle {
            state.idle.pop_back();
            state.active -= 1;
        }
    }

    fn exhausted(&self, active: usize, closed: bool) -> SessionError {
        let mut context = ErrorContext::new("connection_pool")
            .with_operation("get")
            .with_metadata("address", self.connector.address());
        if closed {
            context = context.with_metadata("closed", "true");
        } else {
            context = context.with_suggestion("Raise pool.max_active or release connections sooner");
        }
        SessionError::PoolExhausted {
            active,
            max_active: self.config.max_active,
            context,
        }
    }
}

/// Reserved slot in the active count; released on drop unless handed to a
/// [`PooledConnection`]
struct SlotGuard<'a> {
    inner: &'a PoolInner,
    armed: bool,
}

impl SlotGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.release_slot();
        }
    }
}

/// Shared, cloneable handle to a bounded set of store connections
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.connector.address())
            .field("authenticated", &self.inner.credential.is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool dialing through `connector`. A `credential` is sent with
    /// AUTH on every freshly dialed connection.
    pub fn new(
        connector: Arc<dyn Connector>,
        credential: Option<String>,
        config: PoolConfig,
    ) -> Self {
        info!(
            address = %connector.address(),
            authenticated = credential.is_some(),
            max_idle = config.max_idle,
            max_active = config.max_active,
            "Created connection pool"
        );
        Self {
            inner: Arc::new(PoolInner {
                connector,
                credential,
                config,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Create a pool of plain TCP connections to `address`
    pub fn tcp(address: &str, credential: Option<String>, config: PoolConfig) -> Self {
        let factory = tcp_connector_factory();
        Self::new(factory(address), credential, config)
    }

    pub fn address(&self) -> &str {
        self.inner.connector.address()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow a connection, reusing a healthy idle one when possible
    pub async fn get(&self) -> SessionResult<PooledConnection> {
        loop {
            let (reused, slot) = {
                let mut state = self.inner.lock_state();
                if state.closed {
                    return Err(self.inner.exhausted(state.active, true));
                }
                self.inner.prune_stale(&mut state);

                match state.idle.pop_front() {
                    Some(idle) => (
                        Some(idle.connection),
                        SlotGuard {
                            inner: self.inner.as_ref(),
                            armed: true,
                        },
                    ),
                    None => {
                        let max_active = self.inner.config.max_active;
                        if max_active > 0 && state.active >= max_active {
                            return Err(self.inner.exhausted(state.active, false));
                        }
                        state.active += 1;
                        (
                            None,
                            SlotGuard {
                                inner: self.inner.as_ref(),
                                armed: true,
                            },
                        )
                    }
                }
            };

            let connection = match reused {
                Some(mut connection) => match connection.execute(&Command::ping()).await {
                    Ok(Reply::Status(_)) => connection,
                    Ok(reply) => {
                        warn!(address = %self.address(), ?reply, "Liveness PING rejected, discarding connection");
                        continue;
                    }
                    Err(error) => {
                        warn!(address = %self.address(), %error, "Liveness PING failed, discarding connection");
                        continue;
                    }
                },
                None => self.dial().await?,
            };

            slot.disarm();
            return Ok(PooledConnection {
                pool: Arc::clone(&self.inner),
                connection: Some(connection),
                broken: false,
            });
        }
    }

    /// Open and, when a credential is configured, authenticate a connection
    async fn dial(&self) -> SessionResult<Box<dyn Connection>> {
        let mut connection = self.inner.connector.connect().await?;

        if let Some(credential) = &self.inner.credential {
            let rejection = match connection.execute(&Command::auth(credential)).await? {
                Reply::Status(_) => None,
                Reply::Error(message) => Some(message),
                other => Some(format!("unexpected AUTH reply {:?}", other)),
            };
            if let Some(message) = rejection {
                drop(connection);
                warn!(address = %self.address(), %message, "Backing store rejected AUTH");
                return Err(SessionError::Authentication {
                    message,
                    context: ErrorContext::new("connection_pool")
                        .with_operation("dial")
                        .with_metadata("address", self.address())
                        .with_suggestion("Check store.password in the configuration"),
                });
            }
        }

        debug!(address = %self.address(), "Dialed new pooled connection");
        Ok(connection)
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            idle: state.idle.len(),
            active: state.active,
            max_idle: self.inner.config.max_idle,
            max_active: self.inner.config.max_active,
        }
    }

    /// Close idle connections and refuse further borrows. Connections that
    /// are currently borrowed are closed when returned.
    pub fn close(&self) {
        let mut state = self.inner.lock_state();
        state.closed = true;
        let closed = state.idle.len();
        state.active -= closed;
        state.idle.clear();
        info!(address = %self.address(), closed, "Connection pool closed");
    }
}

/// A borrowed connection; goes back to the pool when dropped
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Box<dyn Connection>>,
    broken: bool,
}

impl PooledConnection {
    /// Run `command` on the borrowed connection. A transport failure (or a
    /// cancelled call) marks the connection broken so it is not reused.
    pub async fn execute(&mut self, command: &Command) -> SessionResult<Reply> {
        let Some(connection) = self.connection.as_mut() else {
            return Err(kvsession_core::network_error!(
                "Connection already released",
                "pooled_connection"
            ));
        };

        self.broken = true;
        let reply = connection.execute(command).await?;
        self.broken = false;
        Ok(reply)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.put(connection, self.broken);
        }
    }
}
