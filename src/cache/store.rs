//! Response storage with per-entry lifetimes.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::rule::Rule;
use crate::config::{CacheConfig, ValidationError};
use crate::observability::metrics;

/// A stored response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    written_at: Instant,
    ttl: Duration,
}

impl CachedResponse {
    /// Fresh while `ttl` is zero or has not yet elapsed.
    pub fn is_fresh(&self, now: Instant) -> bool {
        self.ttl.is_zero() || now.saturating_duration_since(self.written_at) <= self.ttl
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Rules plus the entries they produced, keyed by path and query.
#[derive(Debug)]
pub struct ResponseCache {
    rules: Vec<Rule>,
    entries: DashMap<String, CachedResponse>,
    max_body_bytes: usize,
}

impl ResponseCache {
    pub fn new(rules: Vec<Rule>, max_body_bytes: usize) -> Self {
        Self {
            rules,
            entries: DashMap::new(),
            max_body_bytes,
        }
    }

    /// Build from configuration, rejecting rules without a usable pattern.
    pub fn from_config(config: &CacheConfig) -> Result<Self, ValidationError> {
        let rules = config
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| Rule::from_config(rule, index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules, config.max_body_bytes))
    }

    /// First rule matching `path`.
    pub fn rule_for(&self, path: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Fresh entry for `key`. An expired entry is dropped on the way.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Instant::now();
        {
            let entry = self.entries.get(key)?;
            if entry.is_fresh(now) {
                return Some(entry.clone());
            }
        }
        if self.entries.remove_if(key, |_, entry| !entry.is_fresh(now)).is_some() {
            tracing::debug!(key = %key, "Cache entry expired");
            metrics::record_cache_size(self.entries.len());
        }
        None
    }

    /// Store a response, replacing any previous entry for `key`.
    pub fn insert(&self, key: String, status: StatusCode, headers: HeaderMap, body: Bytes, ttl: Duration) {
        self.entries.insert(
            key,
            CachedResponse {
                status,
                headers,
                body,
                written_at: Instant::now(),
                ttl,
            },
        );
        metrics::record_cache_size(self.entries.len());
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before.saturating_sub(self.entries.len());
        metrics::record_cache_size(self.entries.len());
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Purge expired entries every `interval` until shutdown.
pub fn spawn_sweeper(
    cache: Arc<ResponseCache>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.purge_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Cache sweeper stopping");
                    break;
                }
            }
        }
    })
}
