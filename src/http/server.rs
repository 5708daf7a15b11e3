//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the command handlers
//! - Wire up middleware (tracing, request ID, timeout, metrics, cache)
//! - Dispatch commands to a backend connection and await the reply
//! - Serve until the shutdown signal, then drain

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::backend::RequestOptions;
use crate::cache::{cache_middleware, ResponseCache};
use crate::config::GatewayConfig;
use crate::http::commands;
use crate::http::request::{make_request_span, propagate_request_id_layer, set_request_id_layer};
use crate::http::response::{error_response, reply_response};
use crate::load_balancer::ConnectionPool;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    /// Reply timeout applied to every command.
    pub timeout_ms: i64,
}

/// HTTP front end of the gateway.
pub struct GatewayServer {
    router: Router,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, pool: Arc<ConnectionPool>, cache: Arc<ResponseCache>) -> Self {
        let state = AppState {
            pool,
            timeout_ms: config.backend.default_timeout_ms,
        };
        Self {
            router: Self::build_router(config, state, cache),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState, cache: Arc<ResponseCache>) -> Router {
        let prefix = &config.http.prefix;
        Router::new()
            .route(
                &format!("{prefix}/droonga/{{*message_type}}"),
                get(droonga_get).post(droonga_post),
            )
            .route(&format!("{prefix}/tables/{{table}}"), get(table_search))
            .route("/health", get(health))
            .with_state(state)
            .layer(middleware::from_fn_with_state(cache, cache_middleware))
            .layer(middleware::from_fn(record_metrics))
            .layer(TimeoutLayer::new(Duration::from_secs(config.http.request_timeout_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
            .layer(set_request_id_layer())
    }

    /// A clone of the fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn record_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let response = next.run(req).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}

/// Send a command to the next backend and render its reply.
async fn dispatch(state: &AppState, message_type: String, body: Value) -> Response {
    let Some(connection) = state.pool.get() else {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "no backend connection available");
    };

    let pending = connection.request(message_type, body, RequestOptions::with_timeout_ms(state.timeout_ms));
    tracing::debug!(
        id = %pending.id(),
        message_type = %pending.envelope().message_type,
        backend = %connection.backend_addr(),
        "Command dispatched"
    );
    reply_response(pending.wait().await)
}

async fn droonga_get(
    State(state): State<AppState>,
    Path(message_type): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let body = commands::droonga_body(&message_type, commands::query_object(params), state.timeout_ms);
    dispatch(&state, message_type, body).await
}

async fn droonga_post(State(state): State<AppState>, Path(message_type): Path<String>, body: Bytes) -> Response {
    let body = if body.is_empty() {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(error = %e, "Rejecting malformed command body");
                return error_response(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {e}"));
            }
        }
    };
    let body = commands::droonga_body(&message_type, body, state.timeout_ms);
    dispatch(&state, message_type, body).await
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
}

async fn table_search(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<SearchParams>,
) -> Response {
    let body = commands::search_body(&table, params.query.as_deref());
    dispatch(&state, commands::SEARCH_TYPE.to_string(), body).await
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let backends: Vec<&str> = state.pool.connections().iter().map(|c| c.backend_addr()).collect();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": backends,
    }))
}
