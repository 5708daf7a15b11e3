//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound (replies from backends):
//!     receiver.rs (bind, accept loop)
//!     → connection.rs (per-connection tracking, close signal)
//!     → protocol::codec (decode MessagePack stream)
//!     → ReceiverEvents sink
//!
//! Outbound (requests to backends):
//!     encoded packet → sender.rs (lazy connect, write, reconnect on loss)
//! ```
//!
//! # Design Decisions
//! - Receiver and sender are independent: a lost sender transport never
//!   affects the advertised reply port
//! - Closing a receiver force-closes every connection it accepted

pub mod connection;
pub mod receiver;
pub mod sender;

pub use receiver::{Receiver, ReceiverError, ReceiverEvents};
pub use sender::{SendError, Sender};
