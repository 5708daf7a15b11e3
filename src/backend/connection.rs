//! A messaging connection to one backend instance.
//!
//! # Responsibilities
//! - Pair an outbound [`Sender`] with an inbound [`Receiver`] whose address
//!   is advertised to the backend as `replyTo`
//! - Emit volatile messages and correlated requests
//! - Arm per-request timeouts
//! - Expose every inbound envelope to passive subscribers
//!
//! Outbound packets go through an unbounded queue drained by one writer
//! task per connection. Callers never wait on the socket, so a stalled
//! backend cannot hold back a reply timeout or other callers.

use chrono::Utc;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::backend::dispatcher::{Dispatcher, ReplyResult};
use crate::backend::ReplyError;
use crate::net::sender::DEFAULT_WRITE_TIMEOUT;
use crate::net::{Receiver, ReceiverError, Sender};
use crate::observability::metrics;
use crate::protocol::{encode_message, Envelope};

/// Settings for one backend connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Tag prefix; packets travel as `<tag>.message`.
    pub tag: String,
    /// Backend address (`host:port`).
    pub backend_addr: String,
    /// Host to bind the reply receiver on, also advertised in `replyTo`.
    pub receive_host: String,
    /// Fixed reply port; `None` picks an ephemeral one.
    pub receive_port: Option<u16>,
    pub connect_timeout: Duration,
    /// Deadline for writing one packet before the transport is dropped.
    pub write_timeout: Duration,
}

impl ConnectionOptions {
    pub fn new(tag: impl Into<String>, backend_addr: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            backend_addr: backend_addr.into(),
            receive_host: "127.0.0.1".to_string(),
            receive_port: None,
            connect_timeout: Duration::from_secs(3),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Milliseconds to wait for a reply; zero or negative waits forever.
    pub timeout_ms: Option<i64>,
}

impl RequestOptions {
    pub fn with_timeout_ms(timeout_ms: i64) -> Self {
        Self {
            timeout_ms: Some(timeout_ms),
        }
    }

    /// The effective timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64))
    }
}

/// A request awaiting its reply.
///
/// Dropping it before the reply arrives forgets the request; a late reply is
/// then discarded.
pub struct PendingReply {
    envelope: Envelope,
    rx: oneshot::Receiver<ReplyResult>,
    dispatcher: Arc<Dispatcher>,
}

impl PendingReply {
    /// The envelope that was sent.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn id(&self) -> &str {
        &self.envelope.id
    }

    /// Wait for the single resolution of this request.
    pub async fn wait(mut self) -> Result<Envelope, ReplyError> {
        (&mut self.rx).await.unwrap_or(Err(ReplyError::Abandoned))
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        // no-op once resolved
        self.dispatcher.cancel(&self.envelope.id);
    }
}

impl fmt::Debug for PendingReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingReply").field("id", &self.envelope.id).finish()
    }
}

/// A packet waiting for the writer task.
struct Outbound {
    id: String,
    message_type: String,
    bytes: Vec<u8>,
}

struct ConnectionInner {
    tag: String,
    reply_to: String,
    sender: Arc<Sender>,
    outbound: mpsc::UnboundedSender<Outbound>,
    writer: AbortHandle,
    receiver: Receiver,
    dispatcher: Arc<Dispatcher>,
}

/// Connection to one backend. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Bind the reply receiver. The sender connects on first use.
    pub async fn connect(options: ConnectionOptions) -> Result<Self, ReceiverError> {
        let dispatcher = Arc::new(Dispatcher::new(&options.tag));
        let receiver = Receiver::new(
            options.receive_host.clone(),
            options.receive_port,
            dispatcher.clone(),
        );
        let local_addr = receiver.listen().await?;
        let reply_to = format!("{}:{}", options.receive_host, local_addr.port());

        tracing::info!(
            tag = %options.tag,
            backend = %options.backend_addr,
            reply_to = %reply_to,
            "Backend connection ready"
        );

        let sender = Arc::new(
            Sender::new(options.backend_addr, options.connect_timeout).with_write_timeout(options.write_timeout),
        );
        let (outbound, queue) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(Arc::clone(&sender), queue)).abort_handle();

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                tag: options.tag,
                reply_to,
                sender,
                outbound,
                writer,
                receiver,
                dispatcher,
            }),
        })
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Backend address this connection sends to.
    pub fn backend_addr(&self) -> &str {
        self.inner.sender.addr()
    }

    /// Address advertised to the backend for replies.
    pub fn reply_to(&self) -> &str {
        &self.inner.reply_to
    }

    /// Port of the reply receiver; `None` once closed.
    pub fn receive_port(&self) -> Option<u16> {
        self.inner.receiver.port()
    }

    /// Queue a volatile message. No reply is expected.
    pub fn emit_message(&self, message_type: impl Into<String>, body: Value) -> Envelope {
        let envelope = Envelope::request(message_type, body);
        self.send(&envelope);
        envelope
    }

    /// Queue a request and register for its reply.
    ///
    /// The returned [`PendingReply`] resolves exactly once: with the reply,
    /// with the backend's error status, or with a gateway timeout.
    pub fn request(
        &self,
        message_type: impl Into<String>,
        body: Value,
        options: RequestOptions,
    ) -> PendingReply {
        let mut envelope = Envelope::request(message_type, body);
        envelope.reply_to = Some(self.inner.reply_to.clone());

        let rx = self.inner.dispatcher.register(&envelope.id);
        if let Some(timeout) = options.timeout() {
            self.inner.dispatcher.arm_timeout(&envelope.id, timeout);
        }
        self.send(&envelope);

        PendingReply {
            envelope,
            rx,
            dispatcher: Arc::clone(&self.inner.dispatcher),
        }
    }

    /// Subscribe to every envelope arriving from the backend.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inner.dispatcher.subscribe()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }

    /// True while the request `id` is waiting for a reply.
    pub fn is_awaiting(&self, id: &str) -> bool {
        self.inner.dispatcher.is_pending(id)
    }

    /// Close sender and receiver. Queued packets are dropped; armed
    /// timeouts still fire.
    pub async fn close(&self) {
        self.inner.writer.abort();
        self.inner.sender.close().await;
        self.inner.receiver.close().await;
        tracing::info!(backend = %self.backend_addr(), "Backend connection closed");
    }

    fn send(&self, envelope: &Envelope) {
        let tag = self.inner.dispatcher.message_tag();
        let bytes = match encode_message(tag, Utc::now().timestamp(), envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(id = %envelope.id, error = %e, "Failed to encode envelope");
                return;
            }
        };

        let outbound = Outbound {
            id: envelope.id.clone(),
            message_type: envelope.message_type.clone(),
            bytes,
        };
        if self.inner.outbound.send(outbound).is_err() {
            metrics::record_backend_send_failure();
            tracing::warn!(id = %envelope.id, backend = %self.backend_addr(), "Writer stopped, message dropped");
        }
    }
}

/// Drain queued packets in order until the connection goes away.
async fn write_loop(sender: Arc<Sender>, mut queue: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(outbound) = queue.recv().await {
        match sender.send(&outbound.bytes).await {
            Ok(()) => {
                metrics::record_backend_message("sent");
                tracing::debug!(
                    id = %outbound.id,
                    message_type = %outbound.message_type,
                    backend = %sender.addr(),
                    "Message sent"
                );
            }
            Err(e) => {
                metrics::record_backend_send_failure();
                tracing::warn!(
                    id = %outbound.id,
                    backend = %sender.addr(),
                    error = %e,
                    "Failed to send message to backend"
                );
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("tag", &self.inner.tag)
            .field("backend", &self.backend_addr())
            .field("reply_to", &self.inner.reply_to)
            .finish()
    }
}
