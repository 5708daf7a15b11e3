//! Backend connection pool.
//!
//! # Responsibilities
//! - Open one [`Connection`] per configured backend target
//! - Hand connections out in strict round-robin order
//! - Close every connection on shutdown

use thiserror::Error;

use crate::backend::{Connection, ConnectionOptions};
use crate::config::BackendConfig;
use crate::load_balancer::{round_robin::RoundRobin, LoadBalancer};
use crate::net::ReceiverError;

/// Errors raised while building a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no backend targets configured")]
    NoTargets,

    #[error("reply port {base} + {offset} is out of range")]
    PortOutOfRange { base: u16, offset: usize },

    #[error("failed to open connection to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: ReceiverError,
    },
}

/// Fixed set of backend connections dispatched round-robin.
#[derive(Debug)]
pub struct ConnectionPool {
    connections: Vec<Connection>,
    balancer: RoundRobin,
}

impl ConnectionPool {
    /// Connect to every target in the configuration.
    ///
    /// With a fixed `receive_port`, target `i` receives replies on
    /// `receive_port + i`.
    pub async fn connect(config: &BackendConfig) -> Result<Self, PoolError> {
        if config.targets.is_empty() {
            return Err(PoolError::NoTargets);
        }

        let mut connections = Vec::with_capacity(config.targets.len());
        for (index, target) in config.targets.iter().enumerate() {
            let receive_port = match config.receive_port {
                Some(base) => Some(
                    u16::try_from(index)
                        .ok()
                        .and_then(|offset| base.checked_add(offset))
                        .ok_or(PoolError::PortOutOfRange { base, offset: index })?,
                ),
                None => None,
            };

            let addr = target.address();
            let options = ConnectionOptions {
                tag: config.tag.clone(),
                backend_addr: addr.clone(),
                receive_host: config.receive_host.clone(),
                receive_port,
                connect_timeout: config.connect_timeout(),
                write_timeout: config.write_timeout(),
            };
            match Connection::connect(options).await {
                Ok(connection) => connections.push(connection),
                Err(source) => {
                    // release the receivers bound so far
                    for connection in &connections {
                        connection.close().await;
                    }
                    return Err(PoolError::Connect { addr, source });
                }
            }
        }

        Ok(Self::from_connections(connections))
    }

    /// Build a pool over already-open connections.
    pub fn from_connections(connections: Vec<Connection>) -> Self {
        tracing::info!(size = connections.len(), "Connection pool ready");
        Self {
            connections,
            balancer: RoundRobin::new(),
        }
    }

    /// Next connection in round-robin order, or `None` for an empty pool.
    pub fn get(&self) -> Option<&Connection> {
        let index = self.balancer.next_index(self.connections.len())?;
        tracing::trace!(index, backend = %self.connections[index].backend_addr(), "Connection selected");
        self.connections.get(index)
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Close every connection.
    pub async fn close_all(&self) {
        for connection in &self.connections {
            connection.close().await;
        }
        tracing::info!("Connection pool closed");
    }
}
