//! HTTP API Server
//!
//! Read-only status endpoints for operators and `wolfreplicactl status`.

use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::node::ReplicaServer;
use crate::error::{Error, Result};

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    server: Arc<ReplicaServer>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, server: Arc<ReplicaServer>) -> Self {
        Self { config, server }
    }

    /// Create the router
    pub fn create_router(server: Arc<ReplicaServer>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .with_state(server)
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.server));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: u32,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

async fn handle_health(State(server): State<Arc<ReplicaServer>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: server.is_alive(),
        node_id: server.location().id,
    })
}

async fn handle_status(State(server): State<Arc<ReplicaServer>>) -> impl IntoResponse {
    match server.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
                code: format!("{:?}", e.code()),
            }),
        )
            .into_response(),
    }
}
