//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the response cache from validated rules
//! - Open the backend connection pool
//! - Run the cache sweeper and HTTP server until shutdown
//! - Close backend connections once the server has drained
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener is bound by the caller, so tests can use ephemeral ports

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::cache::{spawn_sweeper, ResponseCache};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::http::GatewayServer;
use crate::lifecycle::Shutdown;
use crate::load_balancer::ConnectionPool;

/// A fully initialized gateway, ready to serve.
pub struct Gateway {
    config: GatewayConfig,
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    server: GatewayServer,
}

impl Gateway {
    /// Initialize every subsystem from a validated configuration.
    pub async fn build(config: GatewayConfig) -> Result<Self, GatewayError> {
        let cache = Arc::new(ResponseCache::from_config(&config.cache)?);
        let pool = Arc::new(ConnectionPool::connect(&config.backend).await?);
        let server = GatewayServer::new(&config, Arc::clone(&pool), Arc::clone(&cache));

        tracing::info!(
            backends = pool.len(),
            cache_rules = config.cache.rules.len(),
            prefix = %config.http.prefix,
            "Gateway initialized"
        );

        Ok(Self {
            config,
            pool,
            cache,
            server,
        })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Serve on `listener` until `shutdown` fires, then close the pool.
    pub async fn serve(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), GatewayError> {
        let sweeper = match self.config.cache.sweep_interval_secs {
            0 => None,
            secs => Some(spawn_sweeper(
                Arc::clone(&self.cache),
                Duration::from_secs(secs),
                shutdown.subscribe(),
            )),
        };

        let served = self.server.run(listener, shutdown.subscribe()).await;

        // the server may have stopped on its own; make sure the sweeper follows
        shutdown.trigger();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "Cache sweeper ended abnormally");
            }
        }
        self.pool.close_all().await;

        served.map_err(GatewayError::from)
    }
}
