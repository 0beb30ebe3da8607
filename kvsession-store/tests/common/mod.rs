//! Common test utilities for the session backends
//!
//! Provides an in-memory stand-in for the backing key-value store that counts
//! every command it receives, plus a loopback RESP server around it.

#![allow(dead_code)]

use async_trait::async_trait;
use kvsession_core::{network_error, PoolConfig, SessionResult};
use kvsession_store::{
    read_reply, Command, Connection, ConnectionPool, Connector, ConnectorFactory, Reply,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpListener;

pub const FAKE_ADDRESS: &str = "fake-store:6379";

/// How the store answers SET
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFailure {
    None,
    /// The connection drops mid-request
    Transport,
    /// The server answers with an error reply
    ErrorReply,
}

/// In-memory key-value store with per-command counters
pub struct FakeStore {
    data: Mutex<HashMap<String, String>>,
    password: Option<String>,
    write_failure: Mutex<WriteFailure>,
    refuse_dials: AtomicBool,
    /// Connections opened before the current generation are dead
    generation: AtomicUsize,
    pub dials: AtomicUsize,
    pub auths: AtomicUsize,
    pub pings: AtomicUsize,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    pub fn with_password(password: &str) -> Arc<Self> {
        Self::build(Some(password.to_string()))
    }

    fn build(password: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(HashMap::new()),
            password,
            write_failure: Mutex::new(WriteFailure::None),
            refuse_dials: AtomicBool::new(false),
            generation: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
            auths: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
        })
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_write_failure(&self, failure: WriteFailure) {
        *self.write_failure.lock().unwrap() = failure;
    }

    pub fn refuse_dials(&self, refuse: bool) {
        self.refuse_dials.store(refuse, Ordering::SeqCst);
    }

    /// Every connection opened so far fails its next command
    pub fn kill_connections(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Apply one command the way the real server would
    pub fn handle(&self, command: &Command, authenticated: &mut bool) -> Reply {
        let name = command.name();
        let args: Vec<String> = command
            .args()
            .iter()
            .map(|arg| String::from_utf8_lossy(arg).into_owned())
            .collect();

        if name == "AUTH" {
            self.auths.fetch_add(1, Ordering::SeqCst);
            return match (&self.password, args.first()) {
                (None, _) => {
                    Reply::Error("ERR Client sent AUTH, but no password is set".to_string())
                }
                (Some(expected), Some(given)) if expected == given => {
                    *authenticated = true;
                    Reply::ok()
                }
                _ => Reply::Error("WRONGPASS invalid username-password pair".to_string()),
            };
        }

        if self.password.is_some() && !*authenticated {
            return Reply::Error("NOAUTH Authentication required.".to_string());
        }

        match (name.as_str(), args.as_slice()) {
            ("PING", _) => {
                self.pings.fetch_add(1, Ordering::SeqCst);
                Reply::Status("PONG".to_string())
            }
            ("GET", [key]) => {
                self.gets.fetch_add(1, Ordering::SeqCst);
                Reply::Bulk(self.value(key).map(String::into_bytes))
            }
            ("SET", [key, value]) => {
                self.sets.fetch_add(1, Ordering::SeqCst);
                if *self.write_failure.lock().unwrap() == WriteFailure::ErrorReply {
                    return Reply::Error(
                        "READONLY You can't write against a read only replica.".to_string(),
                    );
                }
                self.insert(key, value);
                Reply::ok()
            }
            _ => Reply::Error(format!("ERR unknown command '{}'", name)),
        }
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            store: Arc::clone(self),
            address: FAKE_ADDRESS.to_string(),
        })
    }

    pub fn connector_factory(self: &Arc<Self>) -> ConnectorFactory {
        let store = Arc::clone(self);
        Arc::new(move |address: &str| {
            Arc::new(FakeConnector {
                store: Arc::clone(&store),
                address: address.to_string(),
            }) as Arc<dyn Connector>
        })
    }

    pub fn pool(self: &Arc<Self>, credential: Option<&str>, config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(self.connector(), credential.map(str::to_string), config)
    }
}

struct FakeConnector {
    store: Arc<FakeStore>,
    address: String,
}

#[async_trait]
impl Connector for FakeConnector {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> SessionResult<Box<dyn Connection>> {
        if self.store.refuse_dials.load(Ordering::SeqCst) {
            return Err(network_error!(
                format!("Failed to connect to {}", self.address),
                "fake_connector"
            ));
        }
        self.store.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            store: Arc::clone(&self.store),
            generation: self.store.generation.load(Ordering::SeqCst),
            authenticated: false,
        }))
    }
}

struct FakeConnection {
    store: Arc<FakeStore>,
    generation: usize,
    authenticated: bool,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn execute(&mut self, command: &Command) -> SessionResult<Reply> {
        if self.generation != self.store.generation.load(Ordering::SeqCst) {
            return Err(network_error!("Connection reset by peer", "fake_connection"));
        }
        if command.name() == "SET"
            && *self.store.write_failure.lock().unwrap() == WriteFailure::Transport
        {
            self.store.sets.fetch_add(1, Ordering::SeqCst);
            return Err(network_error!("Broken pipe", "fake_connection"));
        }
        Ok(self.store.handle(command, &mut self.authenticated))
    }
}

/// Serve `store` over RESP on a loopback port; returns `host:port`
pub async fn spawn_resp_server(store: Arc<FakeStore>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            store.dials.fetch_add(1, Ordering::SeqCst);
            let store = Arc::clone(&store);

            tokio::spawn(async move {
                let mut stream = BufStream::new(socket);
                let mut authenticated = false;
                loop {
                    let frame = match read_reply(&mut stream).await {
                        Ok(frame) => frame,
                        Err(_) => break,
                    };
                    let reply = match Command::from_reply(frame) {
                        Ok(command) => store.handle(&command, &mut authenticated),
                        Err(error) => Reply::Error(format!("ERR {}", error)),
                    };
                    if stream.write_all(&reply.encode()).await.is_err()
                        || stream.flush().await.is_err()
                    {
                        break;
                    }
                }
            });
        }
    });

    address
}

/// Pool limits small enough to exercise in tests
pub fn small_pool(max_idle: usize, max_active: usize) -> PoolConfig {
    PoolConfig {
        max_idle,
        max_active,
        idle_timeout_ms: 0,
    }
}
