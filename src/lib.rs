//! Search Gateway Library
//!
//! HTTP front end for a cluster of search-engine backends speaking a
//! MessagePack forward protocol over TCP.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod net;
pub mod observability;
pub mod protocol;

pub use backend::{Connection, ConnectionOptions, PendingReply, ReplyError, RequestOptions};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::GatewayServer;
pub use lifecycle::{Gateway, Shutdown};
pub use load_balancer::ConnectionPool;
