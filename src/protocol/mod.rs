//! Backend wire protocol.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     Envelope (envelope.rs)
//!     → packet.rs (wrap as [tag, time, envelope])
//!     → MessagePack bytes → net::sender
//!
//! Inbound:
//!     TCP bytes → codec.rs (incremental MessagePack decode)
//!     → packet.rs (message / forward shapes → (tag, data) pairs)
//!     → envelope.rs (data → Envelope)
//! ```
//!
//! # Design Decisions
//! - MessagePack is decoded into dynamic values first; the packet shape is
//!   interpreted afterwards so unknown traffic never breaks the stream
//! - Envelopes travel as maps with camelCase keys

pub mod codec;
pub mod envelope;
pub mod packet;

pub use codec::{PacketDecoder, ProtocolError};
pub use envelope::Envelope;
pub use packet::{encode_forward, encode_message, Packet};
