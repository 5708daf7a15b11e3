//! MessagePack packet receiver.
//!
//! # Responsibilities
//! - Bind to a fixed or OS-assigned port
//! - Decode a continuous MessagePack stream per accepted connection
//! - Hand every decoded object, and every `(tag, data)` pair it carries,
//!   to a [`ReceiverEvents`] sink in arrival order
//! - Tear down all connections and the listening socket on close

use rmpv::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::protocol::{Packet, PacketDecoder};

/// Error type for receiver operations.
#[derive(Debug, Error)]
pub enum ReceiverError {
    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The receiver was closed before or while listening.
    #[error("receiver is closed")]
    Closed,
}

/// Sink for decoded traffic.
///
/// Callbacks run on the connection task that decoded the object, so they
/// must not block.
pub trait ReceiverEvents: Send + Sync + 'static {
    /// Called for every fully decoded object.
    fn on_receive(&self, _object: &Value) {}

    /// Called for each `(tag, data)` pair of a message or forward packet.
    fn on_tagged(&self, _tag: &str, _data: Value) {}
}

struct Bound {
    local_addr: SocketAddr,
    tracker: ConnectionTracker,
    accept_task: JoinHandle<()>,
}

enum State {
    Idle,
    Listening(Bound),
    Closed,
}

/// A TCP listener decoding MessagePack packets.
pub struct Receiver {
    host: String,
    port: Option<u16>,
    events: Arc<dyn ReceiverEvents>,
    state: Mutex<State>,
}

impl Receiver {
    /// Create a receiver. With `port = None` an ephemeral port is used.
    pub fn new(host: impl Into<String>, port: Option<u16>, events: Arc<dyn ReceiverEvents>) -> Self {
        Self {
            host: host.into(),
            port,
            events,
            state: Mutex::new(State::Idle),
        }
    }

    /// Start accepting connections and return the bound address.
    ///
    /// Listening twice returns the existing address. Listening after
    /// [`close`](Self::close) returns [`ReceiverError::Closed`] and binds nothing.
    pub async fn listen(&self) -> Result<SocketAddr, ReceiverError> {
        match &*self.lock_state() {
            State::Closed => return Err(ReceiverError::Closed),
            State::Listening(bound) => return Ok(bound.local_addr),
            State::Idle => {}
        }

        let bind_addr = format!("{}:{}", self.host, self.port.unwrap_or(0));
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| ReceiverError::Bind { addr: bind_addr.clone(), source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ReceiverError::Bind { addr: bind_addr.clone(), source })?;

        let mut state = self.lock_state();
        match &*state {
            // closed while the bind was in flight; the listener is dropped here
            State::Closed => return Err(ReceiverError::Closed),
            State::Listening(bound) => return Ok(bound.local_addr),
            State::Idle => {}
        }

        let tracker = ConnectionTracker::new();
        let accept_task = tokio::spawn(accept_loop(listener, tracker.clone(), Arc::clone(&self.events)));
        *state = State::Listening(Bound {
            local_addr,
            tracker,
            accept_task,
        });

        tracing::info!(address = %local_addr, "Receiver listening");
        Ok(local_addr)
    }

    /// Address currently bound, if listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lock_state() {
            State::Listening(bound) => Some(bound.local_addr),
            _ => None,
        }
    }

    /// Port currently bound, if listening.
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Number of peers currently connected.
    pub fn connection_count(&self) -> u64 {
        match &*self.lock_state() {
            State::Listening(bound) => bound.tracker.active_count(),
            _ => 0,
        }
    }

    /// Drop every open connection and release the listening socket.
    ///
    /// Safe to call repeatedly or on a receiver that never listened.
    pub async fn close(&self) {
        let bound = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, State::Closed) {
                State::Listening(bound) => bound,
                _ => return,
            }
        };

        bound.tracker.close_all();
        if let Err(e) = bound.accept_task.await {
            tracing::warn!(error = %e, "Receiver accept task ended abnormally");
        }
        tracing::info!(address = %bound.local_addr, "Receiver closed");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        // the state is only swapped under the lock, so a poisoned guard is still consistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let State::Listening(bound) = &*self.lock_state() {
            bound.tracker.close_all();
        }
    }
}

async fn accept_loop(listener: TcpListener, tracker: ConnectionTracker, events: Arc<dyn ReceiverEvents>) {
    let mut close_rx = tracker.close_receiver();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let guard = tracker.track();
                    tracing::debug!(connection_id = %guard.id(), peer_addr = %peer_addr, "Connection accepted");
                    tokio::spawn(read_loop(stream, guard, tracker.close_receiver(), Arc::clone(&events)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            _ = close_rx.changed() => break,
        }
    }
}

async fn read_loop(
    mut stream: TcpStream,
    guard: ConnectionGuard,
    mut close_rx: watch::Receiver<bool>,
    events: Arc<dyn ReceiverEvents>,
) {
    let mut decoder = PacketDecoder::new();
    'connection: loop {
        tokio::select! {
            read = stream.read_buf(decoder.buffer_mut()) => match read {
                Ok(0) => break,
                Ok(_) => loop {
                    match decoder.decode() {
                        Ok(Some(object)) => dispatch(events.as_ref(), object),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(connection_id = %guard.id(), error = %e, "Dropping connection after malformed packet");
                            break 'connection;
                        }
                    }
                },
                Err(e) => {
                    tracing::debug!(connection_id = %guard.id(), error = %e, "Connection read failed");
                    break;
                }
            },
            _ = close_rx.changed() => break,
        }
    }
}

/// Deliver one decoded object to the sink.
pub(crate) fn dispatch(events: &dyn ReceiverEvents, object: Value) {
    events.on_receive(&object);
    match Packet::from_value(&object) {
        Some(packet) => {
            for (tag, data) in packet.into_pairs() {
                events.on_tagged(&tag, data);
            }
        }
        None => tracing::trace!("Decoded object is neither a message nor a forward packet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_forward, encode_message};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    struct Recorder {
        received: mpsc::UnboundedSender<Value>,
        tagged: mpsc::UnboundedSender<(String, Value)>,
    }

    impl ReceiverEvents for Recorder {
        fn on_receive(&self, object: &Value) {
            let _ = self.received.send(object.clone());
        }

        fn on_tagged(&self, tag: &str, data: Value) {
            let _ = self.tagged.send((tag.to_string(), data));
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<Value>, mpsc::UnboundedReceiver<(String, Value)>) {
        let (received, received_rx) = mpsc::unbounded_channel();
        let (tagged, tagged_rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { received, tagged }), received_rx, tagged_rx)
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let (events, _, _) = recorder();
        let receiver = Receiver::new("127.0.0.1", None, events);
        assert_eq!(receiver.port(), None);

        let addr = receiver.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(receiver.port(), Some(addr.port()));

        receiver.close().await;
        assert_eq!(receiver.port(), None);
    }

    #[tokio::test]
    async fn emits_tagged_pairs_in_order() {
        let (events, mut received, mut tagged) = recorder();
        let receiver = Receiver::new("127.0.0.1", None, events);
        let addr = receiver.listen().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&encode_message("test.message", 1, &"one").unwrap()).await.unwrap();
        stream
            .write_all(&encode_forward("test.message", &[(2, "two"), (3, "three")]).unwrap())
            .await
            .unwrap();

        for expected in ["one", "two", "three"] {
            let (tag, data) = tagged.recv().await.unwrap();
            assert_eq!(tag, "test.message");
            assert_eq!(data, Value::from(expected));
        }
        assert!(received.recv().await.is_some());
        assert!(received.recv().await.is_some());

        receiver.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_relisten() {
        let (events, _, _) = recorder();
        let receiver = Receiver::new("127.0.0.1", None, events);
        receiver.close().await;
        receiver.close().await;
        assert!(matches!(receiver.listen().await, Err(ReceiverError::Closed)));
        assert_eq!(receiver.port(), None);
    }

    #[tokio::test]
    async fn close_drops_open_connections() {
        let (events, _, _) = recorder();
        let receiver = Receiver::new("127.0.0.1", None, events);
        let addr = receiver.listen().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(receiver.connection_count(), 1);

        receiver.close().await;
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
