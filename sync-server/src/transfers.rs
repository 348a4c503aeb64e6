//! Per-connection asset transfers.
//!
//! Every admitted connection owns two [`AssetTransferManager`]s: one for
//! assets the server streams to it (downloads) and one for assets it
//! streams to the server (uploads). A single pump task walks the
//! connections round-robin and moves one chunk per connection per pass, so
//! a large download to one player cannot starve another. Chunks go through
//! a small bounded queue per connection; when a queue is full that
//! connection is skipped until its writer catches up.

use crate::config::AssetsConfig;
use crate::registry::{Outbound, OutboundSender};
use crate::server::{ServerContext, ServerMetrics};
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sync_transfer::{
    AssetProducer, AssetStore, AssetTransferManager, ConsumerListener, TransferError,
};
use sync_types::{AssetChunk, AssetHeader, AssetId, ConnectionId, Message};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;

/// How long the pump sleeps when no connection made progress and nothing
/// woke it.
const PUMP_IDLE_WAIT: Duration = Duration::from_millis(500);

/// Sender half of a connection's chunk queue.
pub type ChunkSender = mpsc::Sender<AssetChunk>;

struct Outgoing {
    manager: AssetTransferManager,
    chunks: ChunkSender,
}

struct Incoming {
    manager: AssetTransferManager,
    staging: PathBuf,
}

/// Asset transfers for every live connection.
pub struct TransferHub {
    outgoing: DashMap<ConnectionId, Arc<Outgoing>>,
    incoming: DashMap<ConnectionId, Arc<Incoming>>,
    wake: Notify,
    chunk_size: usize,
    staging_root: PathBuf,
    idle_timeout: Duration,
}

impl TransferHub {
    /// Create an empty hub.
    pub fn new(config: &AssetsConfig) -> Self {
        Self {
            outgoing: DashMap::new(),
            incoming: DashMap::new(),
            wake: Notify::new(),
            chunk_size: config.chunk_size,
            staging_root: config.staging.clone(),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    /// Maximum chunk payload.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Set up transfer state for a new connection.
    ///
    /// `chunks` is the connection's bounded chunk queue. Finished uploads
    /// are handed to `store`; failures are reported on `outbound`.
    pub fn open(
        &self,
        connection: ConnectionId,
        chunks: ChunkSender,
        store: Arc<dyn AssetStore>,
        outbound: OutboundSender,
        metrics: Arc<ServerMetrics>,
    ) {
        self.outgoing.insert(
            connection,
            Arc::new(Outgoing {
                manager: AssetTransferManager::new(),
                chunks,
            }),
        );

        let manager = AssetTransferManager::new();
        manager.add_consumer_listener(Arc::new(UploadListener {
            connection,
            store,
            outbound,
            metrics,
        }));
        self.incoming.insert(
            connection,
            Arc::new(Incoming {
                manager,
                staging: self.staging_root.join(connection.to_string()),
            }),
        );
    }

    /// Drop all transfer state for a connection. Returns how many
    /// transfers were still in flight.
    pub fn cancel_transfers_for(&self, connection: ConnectionId) -> usize {
        let mut cancelled = 0;
        if let Some((_, outgoing)) = self.outgoing.remove(&connection) {
            cancelled += outgoing.manager.cancel_all();
        }
        if let Some((_, incoming)) = self.incoming.remove(&connection) {
            cancelled += incoming.manager.cancel_all();
            let _ = std::fs::remove_dir(&incoming.staging);
        }
        self.wake.notify_one();
        cancelled
    }

    /// Queue an asset for streaming to `connection`.
    ///
    /// Looks the asset up in `store`, queues its header on the command
    /// queue, then hands the producer to the pump. The header is therefore
    /// always written before any of its chunks.
    ///
    /// A request for an asset already queued to this connection is
    /// coalesced into the pending transfer: chunks carry no offset, so a
    /// second stream of the same id would corrupt the receiver's copy.
    pub async fn start_download(
        &self,
        connection: ConnectionId,
        id: AssetId,
        store: Arc<dyn AssetStore>,
        outbound: &OutboundSender,
    ) -> Result<(), TransferError> {
        let Some(outgoing) = self.outgoing.get(&connection).map(|e| Arc::clone(e.value())) else {
            return Err(TransferError::Cancelled { id });
        };
        if outgoing.manager.has_producer(&id) {
            tracing::debug!("{} already queued for {}", id, connection);
            return Ok(());
        }
        let producer = tokio::task::spawn_blocking(move || AssetProducer::from_store(&*store, &id))
            .await
            .map_err(|e| TransferError::Store(io::Error::other(e)))??;

        let _ = outbound.send(Outbound::Message(Message::AssetHeader(
            producer.header().clone(),
        )));
        tracing::debug!(
            "Queued {} ({} bytes) for {}",
            producer.header().name,
            producer.header().size,
            connection
        );
        outgoing.manager.add_producer(producer);
        self.wake.notify_one();
        Ok(())
    }

    /// Start receiving an asset from `connection`.
    pub async fn begin_upload(
        &self,
        connection: ConnectionId,
        header: AssetHeader,
    ) -> Result<(), TransferError> {
        let id = header.id;
        let Some(incoming) = self.incoming.get(&connection).map(|e| Arc::clone(e.value())) else {
            return Err(TransferError::Cancelled { id });
        };
        tracing::debug!("{} uploading {} ({} bytes)", connection, header.name, header.size);
        tokio::task::spawn_blocking(move || {
            incoming.manager.start_consumer(&incoming.staging, header)
        })
        .await
        .map_err(|e| TransferError::Store(io::Error::other(e)))?
    }

    /// Apply one uploaded chunk.
    pub async fn receive_chunk(
        &self,
        connection: ConnectionId,
        chunk: AssetChunk,
    ) -> Result<(), TransferError> {
        let id = chunk.id;
        let Some(incoming) = self.incoming.get(&connection).map(|e| Arc::clone(e.value())) else {
            return Err(TransferError::UnexpectedChunk { id });
        };
        tokio::task::spawn_blocking(move || incoming.manager.update(&chunk))
            .await
            .map_err(|e| TransferError::Store(io::Error::other(e)))?
    }

    /// Abandon uploads that have made no progress within the idle timeout.
    pub fn reap_idle(&self) -> Vec<(ConnectionId, AssetId)> {
        let incoming: Vec<_> = self
            .incoming
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        incoming
            .into_iter()
            .flat_map(|(connection, incoming)| {
                incoming
                    .manager
                    .reap_idle(self.idle_timeout)
                    .into_iter()
                    .map(move |id| (connection, id))
            })
            .collect()
    }

    /// Number of downloads queued or in progress.
    pub fn downloads(&self) -> usize {
        self.outgoing.iter().map(|e| e.manager.producer_count()).sum()
    }

    /// Number of uploads in progress.
    pub fn uploads(&self) -> usize {
        self.incoming.iter().map(|e| e.manager.consumers().len()).sum()
    }

    /// Nudge the pump, e.g. after a connection drained its chunk queue.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    fn snapshot(&self) -> Vec<(ConnectionId, Arc<Outgoing>)> {
        let mut all: Vec<_> = self
            .outgoing
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        all.sort_by_key(|(connection, _)| *connection);
        all
    }
}

/// Stores finished uploads and tells the uploader about failures.
struct UploadListener {
    connection: ConnectionId,
    store: Arc<dyn AssetStore>,
    outbound: OutboundSender,
    metrics: Arc<ServerMetrics>,
}

impl UploadListener {
    fn report(&self, id: AssetId, reason: String) {
        ServerMetrics::add(&self.metrics.transfers_failed, 1);
        let _ = self
            .outbound
            .send(Outbound::Message(Message::AssetFailed { id, reason }));
    }
}

impl ConsumerListener for UploadListener {
    fn asset_complete(&self, header: &AssetHeader, path: &Path) {
        match self.store.import(header, path) {
            Ok(info) => {
                ServerMetrics::add(&self.metrics.transfers_completed, 1);
                tracing::info!(
                    "Stored {} ({} bytes) from {}",
                    info.name,
                    info.size,
                    self.connection
                );
            }
            Err(e) => {
                tracing::warn!("Upload {} from {} rejected: {}", header.id, self.connection, e);
                self.report(header.id, e.to_string());
            }
        }
    }

    fn asset_failed(&self, id: &AssetId, error: &TransferError) {
        tracing::warn!("Upload {} from {} failed: {}", id, self.connection, error);
        self.report(*id, error.to_string());
    }
}

/// Spawn the chunk pump.
///
/// Each pass visits every connection with pending downloads once, in
/// connection order, and moves at most one chunk for it. When a pass makes
/// no progress the pump waits for a wake-up, a short timeout or shutdown.
pub fn spawn_pump(ctx: Arc<ServerContext>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Asset pump started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if pump_once(&ctx).await == 0 {
                tokio::select! {
                    _ = ctx.transfers().wake.notified() => {}
                    _ = tokio::time::sleep(PUMP_IDLE_WAIT) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("Asset pump stopped");
    })
}

/// One round-robin pass. Returns how many connections made progress.
async fn pump_once(ctx: &ServerContext) -> usize {
    let hub = ctx.transfers();
    let mut progressed = 0;
    for (connection, outgoing) in hub.snapshot() {
        if !outgoing.manager.has_producers() {
            continue;
        }
        let permit = match outgoing.chunks.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) | Err(TrySendError::Closed(())) => continue,
        };

        let worker = Arc::clone(&outgoing);
        let chunk_size = hub.chunk_size;
        let produced =
            tokio::task::spawn_blocking(move || worker.manager.next_chunk(chunk_size)).await;

        match produced {
            Ok(Ok(Some(chunk))) => {
                permit.send(chunk);
                progressed += 1;
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tracing::warn!("Download to {} failed: {}", connection, e);
                ServerMetrics::add(&ctx.metrics().transfers_failed, 1);
                if let Some(id) = e.asset_id() {
                    ctx.registry().send_to(
                        connection,
                        Message::AssetFailed {
                            id,
                            reason: e.to_string(),
                        },
                    );
                }
                progressed += 1;
            }
            Err(e) => tracing::error!("Asset pump worker panicked: {}", e),
        }
    }
    progressed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{outbound_queue, OutboundReceiver};
    use sync_transfer::MemoryAssetStore;

    fn hub(dir: &Path, chunk_size: usize) -> TransferHub {
        TransferHub::new(&AssetsConfig {
            root: dir.join("assets"),
            staging: dir.join("staging"),
            chunk_size,
            idle_timeout_secs: 120,
        })
    }

    fn open(
        hub: &TransferHub,
        conn: u64,
        depth: usize,
        store: &Arc<MemoryAssetStore>,
    ) -> (
        mpsc::Receiver<AssetChunk>,
        OutboundReceiver,
        OutboundSender,
    ) {
        let (chunk_tx, chunk_rx) = mpsc::channel(depth);
        let (out_tx, out_rx) = outbound_queue(64);
        hub.open(
            ConnectionId::new(conn),
            chunk_tx,
            Arc::clone(store) as Arc<dyn AssetStore>,
            out_tx.clone(),
            Arc::new(ServerMetrics::default()),
        );
        (chunk_rx, out_rx, out_tx)
    }

    #[tokio::test]
    async fn download_queues_header_first() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let info = store.put("map.png", b"0123456789").unwrap();
        let (_chunks, mut out_rx, out_tx) = open(&hub, 1, 4, &store);

        hub.start_download(
            ConnectionId::new(1),
            info.id,
            Arc::clone(&store) as Arc<dyn AssetStore>,
            &out_tx,
        )
        .await
        .unwrap();

        match out_rx.try_recv() {
            Ok(Outbound::Message(Message::AssetHeader(h))) => {
                assert_eq!(h.id, info.id);
                assert_eq!(h.size, 10);
            }
            other => panic!("expected header, got {other:?}"),
        }
        assert_eq!(hub.downloads(), 1);
    }

    #[tokio::test]
    async fn repeated_request_joins_pending_download() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let info = store.put("map.png", b"0123456789").unwrap();
        let (_chunks, mut out_rx, out_tx) = open(&hub, 1, 4, &store);

        for _ in 0..2 {
            hub.start_download(
                ConnectionId::new(1),
                info.id,
                Arc::clone(&store) as Arc<dyn AssetStore>,
                &out_tx,
            )
            .await
            .unwrap();
        }

        assert!(matches!(
            out_rx.try_recv(),
            Ok(Outbound::Message(Message::AssetHeader(h))) if h.id == info.id
        ));
        assert!(out_rx.try_recv().is_err());
        assert_eq!(hub.downloads(), 1);
    }

    #[tokio::test]
    async fn missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let (_chunks, mut out_rx, out_tx) = open(&hub, 1, 4, &store);

        let err = hub
            .start_download(
                ConnectionId::new(1),
                AssetId::of(b"nope"),
                Arc::clone(&store) as Arc<dyn AssetStore>,
                &out_tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NotFound { .. }));
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn upload_lands_in_store() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let (_chunks, mut out_rx, _out_tx) = open(&hub, 7, 4, &store);
        let conn = ConnectionId::new(7);

        let bytes = b"token portrait".to_vec();
        let header = AssetHeader {
            id: AssetId::of(&bytes),
            name: "portrait.png".into(),
            size: bytes.len() as u64,
        };
        hub.begin_upload(conn, header.clone()).await.unwrap();
        assert_eq!(hub.uploads(), 1);
        for piece in bytes.chunks(5) {
            hub.receive_chunk(
                conn,
                AssetChunk {
                    id: header.id,
                    data: piece.to_vec(),
                },
            )
            .await
            .unwrap();
        }

        assert_eq!(hub.uploads(), 0);
        assert_eq!(store.bytes(&header.id), Some(bytes));
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn corrupt_upload_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let (_chunks, mut out_rx, _out_tx) = open(&hub, 1, 4, &store);
        let conn = ConnectionId::new(1);

        let header = AssetHeader {
            id: AssetId::of(b"expected"),
            name: "x".into(),
            size: 3,
        };
        hub.begin_upload(conn, header.clone()).await.unwrap();
        hub.receive_chunk(
            conn,
            AssetChunk {
                id: header.id,
                data: b"abc".to_vec(),
            },
        )
        .await
        .unwrap();

        assert!(!store.has(&header.id));
        assert!(matches!(
            out_rx.try_recv(),
            Ok(Outbound::Message(Message::AssetFailed { id, .. })) if id == header.id
        ));
    }

    #[tokio::test]
    async fn chunk_without_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let _conn = open(&hub, 1, 4, &store);

        let err = hub
            .receive_chunk(
                ConnectionId::new(1),
                AssetChunk {
                    id: AssetId::of(b"x"),
                    data: vec![1],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::UnexpectedChunk { .. }));
    }

    #[tokio::test]
    async fn cancel_transfers_for_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let hub = hub(dir.path(), 4);
        let store = Arc::new(MemoryAssetStore::new());
        let info = store.put("a", &[7u8; 100]).unwrap();
        let (_chunks, _out_rx, out_tx) = open(&hub, 1, 4, &store);
        let conn = ConnectionId::new(1);

        hub.start_download(conn, info.id, Arc::clone(&store) as Arc<dyn AssetStore>, &out_tx)
            .await
            .unwrap();
        hub.begin_upload(
            conn,
            AssetHeader {
                id: AssetId::of(b"upload"),
                name: "u".into(),
                size: 6,
            },
        )
        .await
        .unwrap();

        assert_eq!(hub.cancel_transfers_for(conn), 2);
        assert_eq!(hub.downloads(), 0);
        assert_eq!(hub.uploads(), 0);
        assert_eq!(hub.cancel_transfers_for(conn), 0);
    }
}
