//! HTTP API server for parley gateway

pub mod health;
pub mod websocket;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::pipeline::Pipeline;
use crate::session::{ConnectionRegistry, SessionConfig, SharedRegistry};
use crate::{Config, Result};

/// Reason sent to clients when the server shuts down
const SHUTDOWN_REASON: &str = "server shutting down";

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub registry: SharedRegistry,
    pub pipeline: Arc<Pipeline>,
    pub session: SessionConfig,
}

impl ApiState {
    #[must_use]
    pub fn new(pipeline: Arc<Pipeline>, session: SessionConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            pipeline,
            session,
        }
    }

    /// State for a server built from configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(Pipeline::from_config(config)),
            SessionConfig {
                language: config.voice.language.clone(),
                max_history: config.assistant.max_history,
            },
        )
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    // CORS layer for cross-origin requests from browser clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(websocket::router(Arc::clone(&state)))
        .merge(health::router())
        .merge(health::ready_router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    host: String,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, host: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            host: host.into(),
            port,
        }
    }

    /// Registry of the sessions this server accepts
    #[must_use]
    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.state.registry)
    }

    /// Run the API server until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Transport(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// On shutdown every session is notified and closed before the server
    /// drains in-flight connections.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let missing = self.state.pipeline.unavailable();
        if !missing.is_empty() {
            tracing::warn!(stages = ?missing, "some pipeline stages are not configured");
        }
        match listener.local_addr() {
            Ok(addr) => tracing::info!(addr = %addr, "API server listening"),
            Err(e) => tracing::warn!(error = %e, "API server listening on unknown address"),
        }

        let registry = self.registry();
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move {
                shutdown.await;
                registry.close_all(SHUTDOWN_REASON).await;
            })
            .await
            .map_err(|e| crate::Error::Transport(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }
}
