//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP command handler
//!     → pool.rs (fixed list of backend connections)
//!     → round_robin.rs (advance the shared cursor)
//!     → Connection handed back to the caller
//! ```
//!
//! # Design Decisions
//! - The pool is fixed-size; it never adds, removes or health-checks
//!   connections
//! - The cursor advances on every dispatch regardless of the outcome

pub mod pool;
pub mod round_robin;

pub use pool::{ConnectionPool, PoolError};
pub use round_robin::RoundRobin;

/// Picks the slot for the next dispatch.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Index in `0..len` of the next slot, or `None` when `len` is zero.
    fn next_index(&self, len: usize) -> Option<usize>;
}
