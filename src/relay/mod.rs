//! Token relay: a tiny HTTP server that mints short-lived provider
//! credentials so clients never need the long-lived secret.

pub mod error;
pub mod routes;

use crate::config::Config;
use crate::provider::ProviderClient;
use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router as AxumRouter;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::RelayError;

/// Shared state for relay handlers
pub struct RelayState {
    pub provider: ProviderClient,
    pub secret: Option<String>,
}

pub struct RelayServer {
    state: Arc<RelayState>,
    host: String,
    port: u16,
}

impl RelayServer {
    pub fn new(provider: ProviderClient, secret: Option<String>, host: String, port: u16) -> Self {
        Self {
            state: Arc::new(RelayState { provider, secret }),
            host,
            port,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = ProviderClient::new(&config.provider)?;
        Ok(Self::new(
            provider,
            config.relay.api_key.clone(),
            config.relay.host.clone(),
            config.relay.port,
        ))
    }

    /// Build Axum router with all endpoints
    pub fn build_routes(&self) -> AxumRouter {
        AxumRouter::new()
            .route("/health", get(routes::health))
            .route("/token", get(routes::token))
            .with_state(self.state.clone())
            .layer(axum::middleware::from_fn(logging_middleware))
            .layer(TraceLayer::new_for_http())
    }

    /// Start the relay server
    pub async fn start(&self) -> Result<()> {
        let app = self.build_routes();
        let addr = format!("{}:{}", self.host, self.port);

        if self.state.secret.is_none() {
            tracing::warn!("No relay secret configured; GET /token will return errors");
        }

        info!("Starting token relay on {} (Health: /health, Token: /token)", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .context("Failed to bind server")?;

        axum::serve(listener, app).await.context("Server error")?;

        Ok(())
    }
}

/// Logging middleware
async fn logging_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    let status = response.status();
    tracing::info!("{} {} -> {}", method, uri, status);

    response
}
