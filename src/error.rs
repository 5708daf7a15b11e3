//! Top-level error type.

use thiserror::Error;

use crate::config::{ConfigError, ValidationError};
use crate::load_balancer::PoolError;

/// Errors that stop the gateway from starting or serving.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid cache configuration: {0}")]
    Cache(#[from] ValidationError),

    #[error("backend pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
