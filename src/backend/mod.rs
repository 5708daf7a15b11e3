//! Backend messaging subsystem.
//!
//! # Data Flow
//! ```text
//! Command handler
//!     → connection.rs (build envelope, register reply, arm timeout, queue)
//!     → writer task → net::sender (write [tag, time, envelope])
//!     ... backend works ...
//!     → net::receiver on the replyTo port
//!     → dispatcher.rs (broadcast + resolve pending by inReplyTo)
//!     → PendingReply resolves once
//! ```
//!
//! # Request States
//! ```text
//! SENT → RESOLVED   (reply arrived, any status)
//! SENT → TIMED_OUT  (timer fired first)
//! ```
//! No retries happen at this layer.

pub mod connection;
pub mod dispatcher;

use thiserror::Error;

use crate::protocol::Envelope;

pub use connection::{Connection, ConnectionOptions, PendingReply, RequestOptions};
pub use dispatcher::Dispatcher;

/// Why a request did not produce a successful reply.
#[derive(Debug, Clone, Error)]
pub enum ReplyError {
    /// No reply arrived before the request's timeout.
    #[error("gateway timeout")]
    GatewayTimeout,

    /// The backend replied with a non-success status.
    #[error("backend replied with status {status}")]
    Backend { status: u16, reply: Box<Envelope> },

    /// The request was dropped before it resolved.
    #[error("request abandoned before a reply arrived")]
    Abandoned,
}

impl ReplyError {
    /// HTTP status reported to clients for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ReplyError::GatewayTimeout => 504,
            ReplyError::Backend { status, .. } => *status,
            ReplyError::Abandoned => 502,
        }
    }
}
