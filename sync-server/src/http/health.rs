//! Health check endpoint.

use crate::server::ServerContext;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::Arc;

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Protocol version clients must match.
    pub protocol: String,
    /// Number of admitted connections.
    pub connections: usize,
    /// Asset downloads queued or in progress.
    pub downloads: usize,
    /// Asset uploads in progress.
    pub uploads: usize,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(Extension(ctx): Extension<Arc<ServerContext>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        protocol: ctx.version().to_string(),
        connections: ctx.registry().len(),
        downloads: ctx.transfers().downloads(),
        uploads: ctx.transfers().uploads(),
        uptime_seconds: ctx.started_at().elapsed().as_secs(),
    })
}
