//! Prometheus metrics endpoint.

use crate::server::{ServerContext, ServerMetrics};
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Gauges describe current state; counters are monotonic since startup.
pub async fn metrics_handler(Extension(ctx): Extension<Arc<ServerContext>>) -> impl IntoResponse {
    let m = ctx.metrics();

    let connections = ctx.registry().len();
    let downloads = ctx.transfers().downloads();
    let uploads = ctx.transfers().uploads();

    let conns_total = ServerMetrics::get(&m.connections_total);
    let rejected = ServerMetrics::get(&m.handshakes_rejected);
    let applied = ServerMetrics::get(&m.commands_applied);
    let dropped = ServerMetrics::get(&m.commands_dropped);
    let chunks_tx = ServerMetrics::get(&m.chunks_sent);
    let bytes_tx = ServerMetrics::get(&m.bytes_sent);
    let chunks_rx = ServerMetrics::get(&m.chunks_received);
    let bytes_rx = ServerMetrics::get(&m.bytes_received);
    let completed = ServerMetrics::get(&m.transfers_completed);
    let failed = ServerMetrics::get(&m.transfers_failed);

    let body = format!(
        r#"# HELP campaign_server_connections_active Number of admitted connections
# TYPE campaign_server_connections_active gauge
campaign_server_connections_active {connections}

# HELP campaign_server_downloads_active Asset downloads queued or in progress
# TYPE campaign_server_downloads_active gauge
campaign_server_downloads_active {downloads}

# HELP campaign_server_uploads_active Asset uploads in progress
# TYPE campaign_server_uploads_active gauge
campaign_server_uploads_active {uploads}

# HELP campaign_server_info Server information
# TYPE campaign_server_info gauge
campaign_server_info{{version="{version}"}} 1

# HELP campaign_server_connections_total Total connections accepted
# TYPE campaign_server_connections_total counter
campaign_server_connections_total {conns_total}

# HELP campaign_server_handshakes_rejected_total Handshakes answered with an error
# TYPE campaign_server_handshakes_rejected_total counter
campaign_server_handshakes_rejected_total {rejected}

# HELP campaign_server_commands_applied_total Commands applied and forwarded
# TYPE campaign_server_commands_applied_total counter
campaign_server_commands_applied_total {applied}

# HELP campaign_server_commands_dropped_total Commands dropped with a NACK
# TYPE campaign_server_commands_dropped_total counter
campaign_server_commands_dropped_total {dropped}

# HELP campaign_server_chunks_sent_total Asset chunks written to clients
# TYPE campaign_server_chunks_sent_total counter
campaign_server_chunks_sent_total {chunks_tx}

# HELP campaign_server_bytes_sent_total Asset bytes written to clients
# TYPE campaign_server_bytes_sent_total counter
campaign_server_bytes_sent_total {bytes_tx}

# HELP campaign_server_chunks_received_total Asset chunks received from clients
# TYPE campaign_server_chunks_received_total counter
campaign_server_chunks_received_total {chunks_rx}

# HELP campaign_server_bytes_received_total Asset bytes received from clients
# TYPE campaign_server_bytes_received_total counter
campaign_server_bytes_received_total {bytes_rx}

# HELP campaign_server_transfers_completed_total Uploads verified and stored
# TYPE campaign_server_transfers_completed_total counter
campaign_server_transfers_completed_total {completed}

# HELP campaign_server_transfers_failed_total Transfers abandoned
# TYPE campaign_server_transfers_failed_total counter
campaign_server_transfers_failed_total {failed}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
