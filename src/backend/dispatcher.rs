//! Reply correlation and broadcast.
//!
//! Every envelope arriving on `<tag>.message` is broadcast to subscribers.
//! Envelopes carrying `inReplyTo` additionally resolve the pending request
//! with that id, if one is still registered.
//!
//! Removal from the pending table is the single commit point: whichever of
//! reply, timeout or cancellation removes the entry first decides the
//! outcome, and everything after it is a no-op.

use dashmap::DashMap;
use rmpv::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;

use crate::backend::ReplyError;
use crate::net::ReceiverEvents;
use crate::observability::metrics;
use crate::protocol::{codec, Envelope};

/// Capacity of the broadcast channel for unsolicited messages.
const BROADCAST_CAPACITY: usize = 256;

pub(crate) type ReplyResult = Result<Envelope, ReplyError>;

struct Pending {
    tx: oneshot::Sender<ReplyResult>,
    timer: Option<AbortHandle>,
}

/// Correlation table and message fan-out for one backend connection.
pub struct Dispatcher {
    message_tag: String,
    pending: DashMap<String, Pending>,
    messages: broadcast::Sender<Envelope>,
}

impl Dispatcher {
    pub fn new(tag: &str) -> Self {
        let (messages, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            message_tag: format!("{tag}.message"),
            pending: DashMap::new(),
            messages,
        }
    }

    /// Packet tag carrying envelopes for this connection.
    pub fn message_tag(&self) -> &str {
        &self.message_tag
    }

    /// Subscribe to every inbound envelope.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.messages.subscribe()
    }

    /// Register a pending request.
    pub(crate) fn register(&self, id: &str) -> oneshot::Receiver<ReplyResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.to_string(), Pending { tx, timer: None });
        rx
    }

    /// Expire the pending request `id` after `after` unless it resolves first.
    pub(crate) fn arm_timeout(self: &Arc<Self>, id: &str, after: Duration) {
        let dispatcher = Arc::clone(self);
        let timer_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            dispatcher.expire(&timer_id);
        });

        match self.pending.get_mut(id) {
            Some(mut entry) => entry.timer = Some(timer.abort_handle()),
            None => timer.abort(),
        }
    }

    /// Resolve the request a reply answers. Returns false if nothing was waiting.
    pub fn resolve(&self, reply: Envelope) -> bool {
        let Some(id) = reply.in_reply_to.clone() else {
            return false;
        };
        let Some((_, pending)) = self.pending.remove(&id) else {
            return false;
        };
        if let Some(timer) = pending.timer {
            timer.abort();
        }

        let result = match reply.status_code {
            Some(status) if !reply.is_success() => Err(ReplyError::Backend {
                status,
                reply: Box::new(reply),
            }),
            _ => Ok(reply),
        };
        tracing::debug!(id = %id, ok = result.is_ok(), "Reply correlated");
        let _ = pending.tx.send(result);
        true
    }

    /// Fail the request `id` with a gateway timeout.
    pub fn expire(&self, id: &str) -> bool {
        let Some((_, pending)) = self.pending.remove(id) else {
            return false;
        };
        tracing::warn!(id = %id, "No reply from backend before timeout");
        metrics::record_backend_timeout();
        let _ = pending.tx.send(Err(ReplyError::GatewayTimeout));
        true
    }

    /// Forget the request `id` without resolving it.
    pub fn cancel(&self, id: &str) -> bool {
        match self.pending.remove(id) {
            Some((_, pending)) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                tracing::trace!(id = %id, "Pending request cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl ReceiverEvents for Dispatcher {
    fn on_tagged(&self, tag: &str, data: Value) {
        if tag != self.message_tag {
            tracing::trace!(tag = %tag, "Ignoring packet with foreign tag");
            return;
        }

        let envelope: Envelope = match codec::from_value(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding undecodable envelope");
                return;
            }
        };
        metrics::record_backend_message("received");

        // no subscribers is fine
        let _ = self.messages.send(envelope.clone());

        if let Some(in_reply_to) = envelope.in_reply_to.clone() {
            if !self.resolve(envelope) {
                tracing::debug!(in_reply_to = %in_reply_to, "Discarding reply with no pending request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(request_id: &str, status: u16) -> Envelope {
        let mut request = Envelope::request("testRequest", json!({}));
        request.id = request_id.to_string();
        Envelope::reply_to(&request, status, json!("first call"))
    }

    #[tokio::test]
    async fn resolves_once() {
        let dispatcher = Dispatcher::new("test");
        let rx = dispatcher.register("req-1");
        assert!(dispatcher.is_pending("req-1"));

        assert!(dispatcher.resolve(reply("req-1", 200)));
        assert!(!dispatcher.resolve(reply("req-1", 200)));
        assert!(!dispatcher.is_pending("req-1"));

        let envelope = rx.await.unwrap().unwrap();
        assert_eq!(envelope.body, json!("first call"));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let dispatcher = Dispatcher::new("test");
        let rx = dispatcher.register("req-1");
        dispatcher.resolve(reply("req-1", 503));

        match rx.await.unwrap() {
            Err(ReplyError::Backend { status, reply }) => {
                assert_eq!(status, 503);
                assert_eq!(reply.in_reply_to.as_deref(), Some("req-1"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_wins_when_first() {
        let dispatcher = Arc::new(Dispatcher::new("test"));
        let rx = dispatcher.register("req-1");
        dispatcher.arm_timeout("req-1", Duration::from_millis(20));

        assert!(matches!(rx.await.unwrap(), Err(ReplyError::GatewayTimeout)));
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(!dispatcher.resolve(reply("req-1", 200)));
    }

    #[tokio::test]
    async fn reply_disarms_timer() {
        let dispatcher = Arc::new(Dispatcher::new("test"));
        let rx = dispatcher.register("req-1");
        dispatcher.arm_timeout("req-1", Duration::from_millis(20));
        dispatcher.resolve(reply("req-1", 200));

        assert!(rx.await.unwrap().is_ok());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!dispatcher.expire("req-1"));
    }

    #[tokio::test]
    async fn broadcasts_tagged_envelopes() {
        let dispatcher = Dispatcher::new("test");
        let mut messages = dispatcher.subscribe();
        let rx = dispatcher.register("req-1");

        let bytes = rmp_serde::to_vec_named(&reply("req-1", 200)).unwrap();
        let data = rmpv::decode::read_value(&mut &bytes[..]).unwrap();
        dispatcher.on_tagged("other.message", data.clone());
        dispatcher.on_tagged("test.message", data);

        let broadcast = messages.recv().await.unwrap();
        assert_eq!(broadcast.in_reply_to.as_deref(), Some("req-1"));
        assert!(rx.await.unwrap().is_ok());
        assert!(messages.try_recv().is_err());
    }
}
