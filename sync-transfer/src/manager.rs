//! Fair multiplexing of many transfers over one channel.
//!
//! Outbound: producers sit in a queue. [`AssetTransferManager::next_chunk`]
//! takes the front producer, asks it for one chunk and requeues it at the
//! back unless it is finished, so every active transfer gets one chunk per
//! cycle no matter how large the others are.
//!
//! Inbound: consumers are keyed by asset id. Chunks are routed to their
//! consumer; finished consumers are removed and listeners notified.
//!
//! All state sits behind one mutex. Listener callbacks run after the lock is
//! released, so a listener may call back into the manager.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use sync_types::{AssetChunk, AssetHeader, AssetId};

use crate::consumer::AssetConsumer;
use crate::error::TransferError;
use crate::lock;
use crate::producer::AssetProducer;

/// Observer of inbound transfers.
pub trait ConsumerListener: Send + Sync {
    /// A consumer was registered.
    fn asset_added(&self, _header: &AssetHeader) {}

    /// A chunk was applied; `percent` is in `0.0..=1.0`.
    fn asset_updated(&self, _id: &AssetId, _percent: f64) {}

    /// Every byte arrived. `path` holds the staged asset; the listener
    /// owns it from here on.
    fn asset_complete(&self, header: &AssetHeader, path: &Path);

    /// The transfer was abandoned and its staging file deleted.
    fn asset_failed(&self, _id: &AssetId, _error: &TransferError) {}
}

/// Progress snapshot for one inbound transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferProgress {
    /// Asset being received.
    pub id: AssetId,
    /// Display name from the header.
    pub name: String,
    /// Fraction received, in `0.0..=1.0`.
    pub percent: f64,
}

struct ActiveConsumer {
    consumer: AssetConsumer,
    last_activity: Instant,
}

#[derive(Default)]
struct Inner {
    producers: VecDeque<AssetProducer>,
    consumers: HashMap<AssetId, ActiveConsumer>,
}

enum Event {
    Added(AssetHeader),
    Updated(AssetId, f64),
    Complete(AssetHeader, PathBuf),
    Failed(AssetId, TransferError),
}

/// Owns the active producers and consumers of one channel.
#[derive(Default)]
pub struct AssetTransferManager {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Arc<dyn ConsumerListener>>>,
}

impl AssetTransferManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outbound transfer at the back of the rotation.
    pub fn add_producer(&self, producer: AssetProducer) {
        debug!(asset = %producer.id(), size = producer.header().size, "producer added");
        lock(&self.inner).producers.push_back(producer);
    }

    /// Whether any outbound transfer has bytes left.
    pub fn has_producers(&self) -> bool {
        !lock(&self.inner).producers.is_empty()
    }

    /// Whether an outbound transfer for `id` is queued.
    ///
    /// Chunks carry no offset, so a second producer for the same id on one
    /// channel would interleave into the receiver's single consumer.
    pub fn has_producer(&self, id: &AssetId) -> bool {
        lock(&self.inner).producers.iter().any(|p| p.id() == *id)
    }

    /// Number of queued outbound transfers.
    pub fn producer_count(&self) -> usize {
        lock(&self.inner).producers.len()
    }

    /// Produce one chunk from the front producer, rotating it to the back
    /// if it still has bytes left.
    ///
    /// Returns `Ok(None)` when no producer is queued. A producer that fails
    /// is dropped and its error returned; the others are untouched.
    pub fn next_chunk(&self, max_size: usize) -> Result<Option<AssetChunk>, TransferError> {
        let mut inner = lock(&self.inner);
        loop {
            let Some(mut producer) = inner.producers.pop_front() else {
                return Ok(None);
            };
            if producer.is_complete() {
                // Zero-length assets have nothing to send after the header.
                continue;
            }
            let chunk = producer.next_chunk(max_size)?;
            if !producer.is_complete() {
                inner.producers.push_back(producer);
            }
            return Ok(Some(chunk));
        }
    }

    /// Drop queued producers for `id`. Returns whether any was queued.
    pub fn cancel_producer(&self, id: &AssetId) -> bool {
        let mut inner = lock(&self.inner);
        let before = inner.producers.len();
        inner.producers.retain(|p| p.id() != *id);
        before != inner.producers.len()
    }

    /// Register an inbound transfer.
    ///
    /// Fails if a consumer for the same asset is already active; the active
    /// transfer is left untouched.
    pub fn add_consumer(&self, consumer: AssetConsumer) -> Result<(), TransferError> {
        let mut events = Vec::new();
        {
            let mut inner = lock(&self.inner);
            Self::insert_consumer(&mut inner, consumer, &mut events)?;
        }
        self.fire(events);
        Ok(())
    }

    /// Create and register a consumer staged under `staging_dir`.
    ///
    /// The duplicate check runs before the staging file is touched, so a
    /// rejected request never truncates an in-flight download.
    pub fn start_consumer(
        &self,
        staging_dir: &Path,
        header: AssetHeader,
    ) -> Result<(), TransferError> {
        let mut events = Vec::new();
        {
            let mut inner = lock(&self.inner);
            if inner.consumers.contains_key(&header.id) {
                return Err(TransferError::AlreadyDownloading { id: header.id });
            }
            let consumer = AssetConsumer::new(staging_dir, header)?;
            Self::insert_consumer(&mut inner, consumer, &mut events)?;
        }
        self.fire(events);
        Ok(())
    }

    fn insert_consumer(
        inner: &mut Inner,
        consumer: AssetConsumer,
        events: &mut Vec<Event>,
    ) -> Result<(), TransferError> {
        let id = consumer.id();
        if inner.consumers.contains_key(&id) {
            return Err(TransferError::AlreadyDownloading { id });
        }
        debug!(asset = %id, size = consumer.header().size, "consumer added");
        events.push(Event::Added(consumer.header().clone()));

        if consumer.is_complete() {
            events.push(Event::Complete(
                consumer.header().clone(),
                consumer.path().to_path_buf(),
            ));
            return Ok(());
        }
        inner.consumers.insert(
            id,
            ActiveConsumer {
                consumer,
                last_activity: Instant::now(),
            },
        );
        Ok(())
    }

    /// Whether an inbound transfer for `id` is active.
    pub fn is_downloading(&self, id: &AssetId) -> bool {
        lock(&self.inner).consumers.contains_key(id)
    }

    /// Route an inbound chunk to its consumer.
    ///
    /// A chunk for an unknown asset is rejected without side effects. A
    /// chunk the consumer cannot apply abandons that transfer and notifies
    /// listeners.
    pub fn update(&self, chunk: &AssetChunk) -> Result<(), TransferError> {
        let mut events = Vec::new();
        let result = {
            let mut inner = lock(&self.inner);
            let Some(active) = inner.consumers.get_mut(&chunk.id) else {
                return Err(TransferError::UnexpectedChunk { id: chunk.id });
            };

            match active.consumer.update(chunk) {
                Ok(()) => {
                    active.last_activity = Instant::now();
                    if active.consumer.is_complete() {
                        if let Some(done) = inner.consumers.remove(&chunk.id) {
                            debug!(asset = %chunk.id, "transfer complete");
                            events.push(Event::Complete(
                                done.consumer.header().clone(),
                                done.consumer.path().to_path_buf(),
                            ));
                        }
                    } else {
                        events.push(Event::Updated(
                            chunk.id,
                            active.consumer.percent_complete(),
                        ));
                    }
                    Ok(())
                }
                Err(e) => {
                    warn!(asset = %chunk.id, error = %e, "transfer abandoned");
                    if let Some(failed) = inner.consumers.remove(&chunk.id) {
                        failed.consumer.discard();
                    }
                    events.push(Event::Failed(chunk.id, e.clone()));
                    Err(e)
                }
            }
        };
        self.fire(events);
        result
    }

    /// Abandon one inbound transfer.
    pub fn cancel_consumer(&self, id: &AssetId) -> bool {
        let removed = lock(&self.inner).consumers.remove(id);
        match removed {
            Some(active) => {
                active.consumer.discard();
                self.fire(vec![Event::Failed(*id, TransferError::Cancelled { id: *id })]);
                true
            }
            None => false,
        }
    }

    /// Progress of every active inbound transfer.
    pub fn consumers(&self) -> Vec<TransferProgress> {
        let inner = lock(&self.inner);
        let mut out: Vec<_> = inner
            .consumers
            .values()
            .map(|a| TransferProgress {
                id: a.consumer.id(),
                name: a.consumer.header().name.clone(),
                percent: a.consumer.percent_complete(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Progress of one inbound transfer.
    pub fn percent_complete(&self, id: &AssetId) -> Option<f64> {
        lock(&self.inner)
            .consumers
            .get(id)
            .map(|a| a.consumer.percent_complete())
    }

    /// Abandon consumers with no progress for `max_idle`. Returns their ids.
    pub fn reap_idle(&self, max_idle: Duration) -> Vec<AssetId> {
        let now = Instant::now();
        let stale: Vec<ActiveConsumer> = {
            let mut inner = lock(&self.inner);
            let ids: Vec<AssetId> = inner
                .consumers
                .iter()
                .filter(|(_, a)| now.duration_since(a.last_activity) >= max_idle)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| inner.consumers.remove(id))
                .collect()
        };

        let mut ids = Vec::with_capacity(stale.len());
        let mut events = Vec::with_capacity(stale.len());
        for active in stale {
            let id = active.consumer.id();
            warn!(asset = %id, "reaping idle transfer");
            active.consumer.discard();
            ids.push(id);
            events.push(Event::Failed(id, TransferError::IdleTimeout { id }));
        }
        self.fire(events);
        ids
    }

    /// Abandon everything: drop all producers, delete all staging files and
    /// report each consumer as cancelled. Returns how many transfers were
    /// dropped.
    pub fn cancel_all(&self) -> usize {
        let (producers, consumers) = {
            let mut inner = lock(&self.inner);
            let producers = inner.producers.len();
            let consumers: Vec<ActiveConsumer> =
                inner.consumers.drain().map(|(_, a)| a).collect();
            inner.producers.clear();
            (producers, consumers)
        };

        let count = producers + consumers.len();
        let events = consumers
            .into_iter()
            .map(|active| {
                let id = active.consumer.id();
                active.consumer.discard();
                Event::Failed(id, TransferError::Cancelled { id })
            })
            .collect();
        self.fire(events);
        count
    }

    /// Alias for [`cancel_all`](Self::cancel_all).
    pub fn flush(&self) {
        self.cancel_all();
    }

    /// Register a listener.
    pub fn add_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Unregister a listener previously added with the same `Arc`.
    pub fn remove_consumer_listener(&self, listener: &Arc<dyn ConsumerListener>) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != listeners.len()
    }

    fn fire(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let listeners = lock(&self.listeners).clone();
        for event in &events {
            for listener in &listeners {
                match event {
                    Event::Added(header) => listener.asset_added(header),
                    Event::Updated(id, pct) => listener.asset_updated(id, *pct),
                    Event::Complete(header, path) => listener.asset_complete(header, path),
                    Event::Failed(id, err) => listener.asset_failed(id, err),
                }
            }
        }
    }
}
