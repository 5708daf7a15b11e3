//! Shared utilities for integration testing.

#![allow(dead_code)]

use chrono::Utc;
use rmpv::Value as MsgValue;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use search_gateway::net::{Receiver, ReceiverEvents, Sender};
use search_gateway::protocol::{codec, encode_message, Envelope};

/// Decides the replies a mock backend sends for a request: `(status, body)`
/// pairs, sent in order. An empty list means no reply.
pub type Responder = Arc<dyn Fn(&Envelope) -> Vec<(u16, Value)> + Send + Sync>;

pub fn no_reply() -> Responder {
    Arc::new(|_| Vec::new())
}

pub fn reply_with(status: u16, body: Value) -> Responder {
    Arc::new(move |_| vec![(status, body.clone())])
}

/// Outbound senders keyed by `replyTo`, shared by all replies to that address.
#[derive(Clone, Default)]
struct ReplyChannels {
    senders: Arc<Mutex<HashMap<String, Arc<Sender>>>>,
}

impl ReplyChannels {
    fn sender_for(&self, addr: &str) -> Arc<Sender> {
        let mut senders = self.senders.lock().unwrap();
        Arc::clone(
            senders
                .entry(addr.to_string())
                .or_insert_with(|| Arc::new(Sender::new(addr, Duration::from_secs(1)))),
        )
    }

    async fn send(&self, addr: &str, tag: &str, envelope: &Envelope) {
        let bytes = encode_message(tag, Utc::now().timestamp(), envelope).unwrap();
        self.sender_for(addr).send(&bytes).await.unwrap();
    }
}

struct MockEvents {
    message_tag: String,
    responder: Responder,
    requests: mpsc::UnboundedSender<Envelope>,
    replies: ReplyChannels,
}

impl ReceiverEvents for MockEvents {
    fn on_tagged(&self, tag: &str, data: MsgValue) {
        if tag != self.message_tag {
            return;
        }
        let request: Envelope = codec::from_value(data).unwrap();
        let replies = (self.responder)(&request);
        let _ = self.requests.send(request.clone());

        let Some(reply_to) = request.reply_to.clone() else {
            return;
        };
        let channels = self.replies.clone();
        let tag = self.message_tag.clone();
        tokio::spawn(async move {
            for (status, body) in replies {
                let reply = Envelope::reply_to(&request, status, body);
                channels.send(&reply_to, &tag, &reply).await;
            }
        });
    }
}

/// A backend engine stand-in: records every envelope it receives and
/// answers requests through a [`Responder`].
pub struct MockBackend {
    receiver: Receiver,
    addr: SocketAddr,
    message_tag: String,
    requests: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    replies: ReplyChannels,
}

impl MockBackend {
    /// Start on an ephemeral port.
    pub async fn start(tag: &str, responder: Responder) -> Self {
        Self::start_on(tag, None, responder).await
    }

    /// Start on `port`, or an ephemeral port when `None`.
    pub async fn start_on(tag: &str, port: Option<u16>, responder: Responder) -> Self {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let replies = ReplyChannels::default();
        let message_tag = format!("{tag}.message");
        let events = Arc::new(MockEvents {
            message_tag: message_tag.clone(),
            responder,
            requests: requests_tx,
            replies: replies.clone(),
        });
        let receiver = Receiver::new("127.0.0.1", port, events);
        let addr = receiver.listen().await.unwrap();
        Self {
            receiver,
            addr,
            message_tag,
            requests: tokio::sync::Mutex::new(requests_rx),
            replies,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Next received envelope, waiting up to one second.
    pub async fn next_request(&self) -> Envelope {
        let mut requests = self.requests.lock().await;
        tokio::time::timeout(Duration::from_secs(1), requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("mock backend stopped")
    }

    /// Every envelope received so far that has not been taken yet.
    pub async fn drain_requests(&self) -> Vec<Envelope> {
        let mut requests = self.requests.lock().await;
        let mut drained = Vec::new();
        while let Ok(envelope) = requests.try_recv() {
            drained.push(envelope);
        }
        drained
    }

    /// Reply to `request` by hand.
    pub async fn reply(&self, request: &Envelope, status: u16, body: Value) {
        let reply_to = request.reply_to.as_deref().expect("request has no replyTo");
        let reply = Envelope::reply_to(request, status, body);
        self.replies.send(reply_to, &self.message_tag, &reply).await;
    }

    /// Push an unsolicited envelope to `addr`.
    pub async fn push(&self, addr: &str, envelope: &Envelope) {
        self.replies.send(addr, &self.message_tag, envelope).await;
    }

    pub async fn close(&self) {
        self.receiver.close().await;
    }
}

/// Wait until `condition` holds, polling every 10ms for up to one second.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
