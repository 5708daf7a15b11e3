//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, timeouts, addresses)
//! - Reject cache rules without a usable pattern
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use regex::Regex;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    InvalidBindAddress(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("backend.tag must not be empty")]
    EmptyTag,

    #[error("backend.targets must list at least one backend")]
    NoTargets,

    #[error("backend.targets[{index}] has an empty host")]
    EmptyTargetHost { index: usize },

    #[error("backend.targets[{index}] has port 0")]
    ZeroTargetPort { index: usize },

    #[error("backend.connect_timeout_ms must be greater than 0")]
    ZeroConnectTimeout,

    #[error("backend.write_timeout_ms must be greater than 0")]
    ZeroWriteTimeout,

    #[error("http.prefix {0:?} must start with '/' and not end with one")]
    InvalidPrefix(String),

    #[error("cache.rules[{index}] has no pattern")]
    MissingPattern { index: usize },

    #[error("cache.rules[{index}] pattern is invalid: {reason}")]
    InvalidPattern { index: usize, reason: String },
}

/// Check the configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let backend = &config.backend;
    if backend.tag.is_empty() {
        errors.push(ValidationError::EmptyTag);
    }
    if backend.targets.is_empty() {
        errors.push(ValidationError::NoTargets);
    }
    for (index, target) in backend.targets.iter().enumerate() {
        if target.host.is_empty() {
            errors.push(ValidationError::EmptyTargetHost { index });
        }
        if target.port == 0 {
            errors.push(ValidationError::ZeroTargetPort { index });
        }
    }
    if backend.connect_timeout_ms == 0 {
        errors.push(ValidationError::ZeroConnectTimeout);
    }
    if backend.write_timeout_ms == 0 {
        errors.push(ValidationError::ZeroWriteTimeout);
    }

    let prefix = &config.http.prefix;
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        errors.push(ValidationError::InvalidPrefix(prefix.clone()));
    }

    for (index, rule) in config.cache.rules.iter().enumerate() {
        match &rule.pattern {
            None => errors.push(ValidationError::MissingPattern { index }),
            Some(pattern) => {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(ValidationError::InvalidPattern {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
