//! Transport connections to the backing key-value store

use crate::resp::{read_reply, Command, Reply};
use async_trait::async_trait;
use kvsession_core::{network_error, SessionResult};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

/// One open request/response channel to the store
#[async_trait]
pub trait Connection: Send {
    /// Send `command` and wait for its reply. Error replies from the server
    /// come back as `Ok(Reply::Error(_))`; `Err` means the transport failed.
    async fn execute(&mut self, command: &Command) -> SessionResult<Reply>;
}

/// Opens new connections to one store address
#[async_trait]
pub trait Connector: Send + Sync {
    fn address(&self) -> &str;

    async fn connect(&self) -> SessionResult<Box<dyn Connection>>;
}

/// Builds the connector a manager dials through once `init` supplies an address
pub type ConnectorFactory = Arc<dyn Fn(&str) -> Arc<dyn Connector> + Send + Sync>;

/// Factory producing plain TCP connectors
pub fn tcp_connector_factory() -> ConnectorFactory {
    Arc::new(|address: &str| Arc::new(TcpConnector::new(address)) as Arc<dyn Connector>)
}

/// Dials `host:port` over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> SessionResult<Box<dyn Connection>> {
        let stream = TcpStream::connect(&self.address).await.map_err(|e| {
            network_error!(
                format!("Failed to connect to {}", self.address),
                "tcp_connector",
                e
            )
        })?;
        stream.set_nodelay(true).map_err(|e| {
            network_error!("Failed to configure TCP_NODELAY", "tcp_connector", e)
        })?;

        debug!(address = %self.address, "Opened TCP connection");
        Ok(Box::new(TcpConnection {
            stream: BufStream::new(stream),
        }))
    }
}

/// RESP over a buffered TCP stream
pub struct TcpConnection {
    stream: BufStream<TcpStream>,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn execute(&mut self, command: &Command) -> SessionResult<Reply> {
        let sent = match self.stream.write_all(&command.encode()).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        sent.map_err(|e| {
            network_error!(
                format!("Failed to send {}", command.name()),
                "tcp_connection",
                e
            )
        })?;

        read_reply(&mut self.stream).await
    }
}
