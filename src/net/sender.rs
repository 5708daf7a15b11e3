//! Outbound packet sender with lazy reconnection.
//!
//! # Responsibilities
//! - Hold at most one TCP transport to a fixed backend address
//! - Notice when the backend goes away (peer EOF or read error)
//! - Re-establish the transport on the next send after a loss
//! - Bound every write with a deadline; a backend that stops reading loses
//!   its transport instead of stalling the writer
//!
//! # Design Decisions
//! - The state lives behind an async mutex, so concurrent sends never open
//!   duplicate transports; the lock is the "connecting" phase
//! - No queueing here: a send either writes or fails. Callers that must not
//!   wait on the socket feed a writer task instead (see `backend::connection`)

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Errors raised while sending to a backend.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr} timed out")]
    ConnectTimeout { addr: String },

    #[error("failed to write to {addr}: {source}")]
    Write {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("writing to {addr} timed out")]
    WriteTimeout { addr: String },

    #[error("sender is closed")]
    Closed,
}

/// An established transport plus the task watching it for loss.
struct Transport {
    writer: OwnedWriteHalf,
    alive: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

impl Transport {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

enum SenderState {
    Disconnected,
    Connected(Transport),
    Closed,
}

/// Default deadline for writing one packet.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends encoded packets to one backend address.
pub struct Sender {
    addr: String,
    connect_timeout: Duration,
    write_timeout: Duration,
    state: Mutex<SenderState>,
}

impl Sender {
    /// Create a sender. Nothing is connected until the first send.
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            state: Mutex::new(SenderState::Disconnected),
        }
    }

    /// Replace the per-write deadline.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Backend address (`host:port`).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// True when a live transport is currently held.
    pub async fn is_connected(&self) -> bool {
        matches!(&*self.state.lock().await, SenderState::Connected(transport) if transport.is_alive())
    }

    /// Write one encoded packet, connecting first if needed.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), SendError> {
        let mut state = self.state.lock().await;

        if let SenderState::Connected(transport) = &*state {
            if !transport.is_alive() {
                tracing::info!(addr = %self.addr, "Backend connection lost, reconnecting");
                *state = SenderState::Disconnected;
            }
        }

        if matches!(*state, SenderState::Closed) {
            return Err(SendError::Closed);
        }
        if matches!(*state, SenderState::Disconnected) {
            let transport = self.connect().await?;
            *state = SenderState::Connected(transport);
        }

        if let SenderState::Connected(transport) = &mut *state {
            let written = tokio::time::timeout(self.write_timeout, transport.writer.write_all(bytes)).await;
            let error = match written {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(source)) => SendError::Write {
                    addr: self.addr.clone(),
                    source,
                },
                // a partial write leaves the stream unusable
                Err(_) => SendError::WriteTimeout {
                    addr: self.addr.clone(),
                },
            };
            *state = SenderState::Disconnected;
            return Err(error);
        }
        Ok(())
    }

    /// Drop the transport. Later sends fail with [`SendError::Closed`].
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let SenderState::Connected(transport) = &mut *state {
            let _ = transport.writer.shutdown().await;
        }
        *state = SenderState::Closed;
    }

    async fn connect(&self) -> Result<Transport, SendError> {
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(SendError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(SendError::ConnectTimeout {
                    addr: self.addr.clone(),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(addr = %self.addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let (mut reader, writer) = stream.into_split();
        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let addr = self.addr.clone();
        // Backends never write on this socket; any EOF or error means it is gone.
        let watcher = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            flag.store(false, Ordering::Release);
            tracing::debug!(addr = %addr, "Backend closed the connection");
        });

        tracing::info!(addr = %self.addr, "Connected to backend");
        Ok(Transport {
            writer,
            alive,
            watcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connects_lazily_and_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = Sender::new(addr.to_string(), Duration::from_secs(1));
        assert!(!sender.is_connected().await);

        sender.send(b"hello").await.unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        socket.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert!(sender.is_connected().await);
    }

    #[tokio::test]
    async fn reconnects_after_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = Sender::new(addr.to_string(), Duration::from_secs(1));

        sender.send(b"a").await.unwrap();
        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_connected().await);

        sender.send(b"b").await.unwrap();
        let (mut second, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1];
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"b");
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sender = Sender::new(addr.to_string(), Duration::from_secs(1));
        assert!(sender.send(b"x").await.is_err());
    }

    #[tokio::test]
    async fn stalled_backend_hits_write_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sender = Sender::new(addr.to_string(), Duration::from_secs(1))
            .with_write_timeout(Duration::from_millis(100));

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let blob = vec![0u8; 32 * 1024 * 1024];
        let started = std::time::Instant::now();
        let result = sender.send(&blob).await;
        let _peer = accept.await.unwrap();

        assert!(matches!(result, Err(SendError::WriteTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!sender.is_connected().await);
    }

    #[tokio::test]
    async fn closed_sender_rejects_sends() {
        let sender = Sender::new("127.0.0.1:9", Duration::from_millis(100));
        sender.close().await;
        assert!(matches!(sender.send(b"x").await, Err(SendError::Closed)));
    }
}
