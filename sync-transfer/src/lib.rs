//! # sync-transfer
//!
//! Chunked asset transfer for tabletop campaign sync.
//!
//! Large binary assets (map backgrounds, token images) move as an
//! [`AssetHeader`](sync_types::AssetHeader) followed by a stream of
//! [`AssetChunk`](sync_types::AssetChunk)s. This crate holds both halves of
//! that exchange and the scheduler between them:
//!
//! - [`AssetProducer`] reads a source one window at a time
//! - [`AssetConsumer`] appends chunks to a staging file
//! - [`AssetTransferManager`] rotates producers round-robin so one large
//!   asset never starves the rest, and routes inbound chunks to consumers
//! - [`AssetStore`] is the content-addressed backing store, with
//!   [`FsAssetStore`] and [`MemoryAssetStore`] implementations
//!
//! ## Example
//!
//! ```rust,ignore
//! use tabletop_sync_transfer::{AssetProducer, AssetTransferManager, MemoryAssetStore, AssetStore};
//!
//! let store = MemoryAssetStore::new();
//! let info = store.put("map.png", &bytes)?;
//!
//! let outbound = AssetTransferManager::new();
//! outbound.add_producer(AssetProducer::from_store(&store, &info.id)?);
//! while let Some(chunk) = outbound.next_chunk(64 * 1024)? {
//!     send(chunk);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod consumer;
mod error;
mod manager;
mod producer;
mod store;

pub use consumer::AssetConsumer;
pub use error::TransferError;
pub use manager::{AssetTransferManager, ConsumerListener, TransferProgress};
pub use producer::AssetProducer;
pub use store::{hash_file, AssetStore, FsAssetStore, MemoryAssetStore};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// Transfer state stays consistent across a panicking listener, so a
// poisoned lock is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
