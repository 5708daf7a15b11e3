//! Cache rules.

use regex::Regex;
use std::time::Duration;

use crate::config::{CacheRuleConfig, ValidationError};

/// A path pattern and the lifetime of responses it caches.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Regex,
    ttl: Duration,
}

impl Rule {
    /// Build a rule. A zero `ttl` never expires.
    pub fn new(pattern: &str, ttl: Duration) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            ttl,
        })
    }

    /// Build the rule at `index` of the configured rule list.
    pub fn from_config(config: &CacheRuleConfig, index: usize) -> Result<Self, ValidationError> {
        let pattern = config
            .pattern
            .as_deref()
            .ok_or(ValidationError::MissingPattern { index })?;
        Self::new(pattern, Duration::from_millis(config.ttl_ms)).map_err(|e| {
            ValidationError::InvalidPattern {
                index,
                reason: e.to_string(),
            }
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.is_match(path)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}
