//! Response cache middleware.
//!
//! Mounted with `axum::middleware::from_fn_with_state` and the shared
//! [`ResponseCache`] as state.

use axum::{
    body::Body,
    extract::State,
    http::{header::HeaderValue, HeaderName, Method, Request, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::cache::store::ResponseCache;
use crate::observability::metrics;

/// Marker header set on responses served from the cache.
pub const CACHED_HEADER: HeaderName = HeaderName::from_static("x-droonga-cached");

/// Cache key: the path plus the exact query string.
fn cache_key(uri: &Uri) -> String {
    match uri.query() {
        Some(query) => format!("{}?{}", uri.path(), query),
        None => uri.path().to_string(),
    }
}

pub async fn cache_middleware(
    State(cache): State<Arc<ResponseCache>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() != Method::GET {
        metrics::record_cache_lookup("bypass");
        return next.run(req).await;
    }
    let Some(ttl) = cache.rule_for(req.uri().path()).map(|rule| rule.ttl()) else {
        metrics::record_cache_lookup("bypass");
        return next.run(req).await;
    };

    let key = cache_key(req.uri());
    if let Some(hit) = cache.get(&key) {
        metrics::record_cache_lookup("hit");
        tracing::debug!(key = %key, "Serving cached response");
        let mut response = hit.into_response();
        response
            .headers_mut()
            .insert(CACHED_HEADER, HeaderValue::from_static("yes"));
        return response;
    }
    metrics::record_cache_lookup("miss");

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to buffer response body");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    if bytes.len() <= cache.max_body_bytes() {
        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Storing response");
        cache.insert(key, parts.status, parts.headers.clone(), bytes.clone(), ttl);
    } else {
        tracing::debug!(key = %key, size = bytes.len(), "Response too large to cache");
    }
    Response::from_parts(parts, Body::from(bytes))
}
