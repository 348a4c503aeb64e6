//! Background cleanup task for stalled uploads.
//!
//! Runs periodically and abandons inbound transfers that have made no
//! progress within `assets.idle_timeout_secs`. The uploader is told through
//! the transfer's listener.

use crate::config::CleanupConfig;
use crate::server::ServerContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    ctx: Arc<ServerContext>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            let reaped = ctx.transfers().reap_idle();
            if reaped.is_empty() {
                tracing::debug!("Cleanup: no idle transfers");
            } else {
                for (connection, id) in &reaped {
                    tracing::info!("Cleanup: abandoned idle upload {} from {}", id, connection);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{outbound_queue, Outbound};
    use crate::state::CampaignStore;
    use sync_transfer::{AssetStore, MemoryAssetStore};
    use sync_types::{AssetHeader, AssetId, ConnectionId, Message};
    use tokio::sync::mpsc;

    fn test_cleanup_config(interval_secs: u64) -> CleanupConfig {
        CleanupConfig {
            interval_secs,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn cleanup_task_abandons_idle_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.assets.staging = dir.path().to_path_buf();
        config.assets.idle_timeout_secs = 0;
        let ctx = Arc::new(ServerContext::new(
            config,
            Box::new(CampaignStore::default()),
            Arc::new(MemoryAssetStore::new()) as Arc<dyn AssetStore>,
        ));

        let conn = ConnectionId::new(1);
        let (chunk_tx, _chunk_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = outbound_queue(64);
        ctx.transfers().open(
            conn,
            chunk_tx,
            Arc::clone(ctx.store()),
            out_tx,
            Arc::clone(ctx.metrics()),
        );
        let id = AssetId::of(b"never finished");
        ctx.transfers()
            .begin_upload(
                conn,
                AssetHeader {
                    id,
                    name: "slow.png".into(),
                    size: 14,
                },
            )
            .await
            .unwrap();
        assert_eq!(ctx.transfers().uploads(), 1);

        let handle = spawn_cleanup_task(Arc::clone(&ctx), test_cleanup_config(1));
        let failed = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .unwrap();
        handle.abort();

        assert!(matches!(
            failed,
            Some(Outbound::Message(Message::AssetFailed { id: failed_id, .. })) if failed_id == id
        ));
        assert_eq!(ctx.transfers().uploads(), 0);
    }

    #[tokio::test]
    async fn cleanup_task_disabled() {
        let ctx = Arc::new(ServerContext::new(
            Config::default(),
            Box::new(CampaignStore::default()),
            Arc::new(MemoryAssetStore::new()) as Arc<dyn AssetStore>,
        ));

        let config = CleanupConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_cleanup_task(ctx, config);
        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete quickly when disabled")
            .expect("Task should not panic");
    }
}
