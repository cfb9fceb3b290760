//! Portal HTTP Server
//!
//! Axum-based server: auth endpoints, RPC procedures and pages, each wrapped
//! with the ban sweep and a request-scoped session, plus CORS and graceful
//! shutdown.

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::auth_router;
use crate::portal::config::ServerConfig;
use crate::portal::edge::edge_guard;
use crate::portal::pages::pages_router;
use crate::portal::rpc::rpc_router;
use crate::portal::state::AppState;
use crate::session::attach_request_session;
use crate::sweeper::sweep_expired_bans;

/// Portal server
pub struct PortalServer {
    config: ServerConfig,
    state: AppState,
}

impl PortalServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes and middleware
    pub fn build_router(&self) -> Router {
        let state = &self.state;

        let cors = CorsLayer::new()
            .allow_origin(
                self.config
                    .cors_origins
                    .iter()
                    // A wildcard is invalid alongside credentials
                    .filter(|o| o.as_str() != "*")
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true);

        let with_session = middleware::from_fn_with_state(state.provider.clone(), attach_request_session);
        let with_sweep = middleware::from_fn_with_state(state.sweeper.clone(), sweep_expired_bans);

        // Layers run bottom-up: sweep, then session, then the edge guard
        let auth = auth_router(state.auth.clone())
            .layer(with_session.clone())
            .layer(with_sweep.clone());

        let rpc = rpc_router(state.clone())
            .layer(with_session.clone())
            .layer(with_sweep.clone());

        let pages = pages_router(state.clone())
            .layer(middleware::from_fn_with_state(state.clone(), edge_guard))
            .layer(with_session)
            .layer(with_sweep);

        let mut router = Router::new()
            .route("/api/health", get(health_handler))
            .nest("/api/auth", auth)
            .nest("/api/rpc", rpc)
            .merge(pages)
            .layer(cors);

        if self.config.log_requests {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server and run until shutdown signal
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.config.socket_addr();
        let router = self.build_router();

        info!("Starting portal server on {}", addr);

        if !self.config.is_localhost() {
            warn!(
                "Portal bound to {} - make sure it sits behind TLS and secure cookies are on",
                addr
            );
        }

        info!("Portal available at {}", self.config.base_url());

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Portal server shut down gracefully");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
