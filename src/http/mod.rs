//! HTTP command adapter subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, middleware stack)
//!     → request.rs (request ID set and propagated)
//!     → cache middleware (may answer directly)
//!     → commands.rs (HTTP request → backend message body)
//!     → load_balancer pool → backend connection (request + wait)
//!     → response.rs (reply or ReplyError → HTTP response)
//! ```

pub mod commands;
pub mod request;
pub mod response;
pub mod server;

pub use request::{request_id, X_REQUEST_ID};
pub use server::{AppState, GatewayServer};
