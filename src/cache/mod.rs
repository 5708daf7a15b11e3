//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request
//!     → middleware.rs (first rule whose pattern matches the path)
//!     → store.rs lookup by path + query
//!         hit  → stored response + `X-Droonga-Cached: yes`
//!         miss → downstream handler → 2xx stored with the rule's ttl
//!
//! Background:
//!     sweeper task → store.rs purge of expired entries
//! ```
//!
//! # Design Decisions
//! - Expiry is lazy; the sweeper only bounds memory held by dead entries
//! - Non-GET requests and unmatched paths never touch the store

pub mod middleware;
pub mod rule;
pub mod store;

pub use middleware::{cache_middleware, CACHED_HEADER};
pub use rule::Rule;
pub use store::{spawn_sweeper, CachedResponse, ResponseCache};
