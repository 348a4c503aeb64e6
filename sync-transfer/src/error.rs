//! Error types for sync-transfer.

use thiserror::Error;

use sync_types::AssetId;

/// Errors that can occur during an asset transfer.
///
/// Every variant is scoped to a single transfer; none of them affect other
/// transfers running through the same manager.
#[derive(Error, Debug)]
pub enum TransferError {
    /// A consumer for this asset is already registered.
    #[error("asset {id} is already being downloaded")]
    AlreadyDownloading {
        /// Asset in flight.
        id: AssetId,
    },

    /// A chunk arrived for an asset nobody is receiving.
    #[error("not expecting chunk for asset {id}")]
    UnexpectedChunk {
        /// Asset named by the chunk.
        id: AssetId,
    },

    /// A chunk would push the consumer past the declared size.
    #[error("asset {id} overflow: {received} bytes received, {size} declared")]
    Overflow {
        /// Asset being received.
        id: AssetId,
        /// Declared size.
        size: u64,
        /// Bytes received including the offending chunk.
        received: u64,
    },

    /// The producer's source ended before the declared length.
    #[error("asset {id} source ended at {read} of {expected} bytes")]
    SourceTruncated {
        /// Asset being sent.
        id: AssetId,
        /// Declared length.
        expected: u64,
        /// Bytes read before end of data.
        read: u64,
    },

    /// Received bytes do not hash to the announced id.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Announced id.
        expected: AssetId,
        /// Hash of the received bytes.
        actual: AssetId,
    },

    /// Asset not present in the store.
    #[error("asset not found: {id}")]
    NotFound {
        /// Missing asset.
        id: AssetId,
    },

    /// Transfer abandoned by the owner (disconnect, flush, shutdown).
    #[error("transfer of asset {id} cancelled")]
    Cancelled {
        /// Abandoned asset.
        id: AssetId,
    },

    /// Transfer made no progress within the idle timeout.
    #[error("transfer of asset {id} timed out")]
    IdleTimeout {
        /// Stalled asset.
        id: AssetId,
    },

    /// Reading a source or writing a staging file failed.
    #[error("I/O error on asset {id}: {source}")]
    Io {
        /// Asset involved.
        id: AssetId,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Store-level I/O not tied to one transfer.
    #[error("store error: {0}")]
    Store(#[from] std::io::Error),
}

impl TransferError {
    /// The asset this error concerns, if any.
    pub fn asset_id(&self) -> Option<AssetId> {
        match self {
            Self::AlreadyDownloading { id }
            | Self::UnexpectedChunk { id }
            | Self::Overflow { id, .. }
            | Self::SourceTruncated { id, .. }
            | Self::NotFound { id }
            | Self::Cancelled { id }
            | Self::IdleTimeout { id }
            | Self::Io { id, .. } => Some(*id),
            Self::HashMismatch { expected, .. } => Some(*expected),
            Self::Store(_) => None,
        }
    }

    pub(crate) fn io(id: AssetId) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::Io { id, source }
    }
}

// io::Error is not Clone; listeners and callers each get their own copy.
impl Clone for TransferError {
    fn clone(&self) -> Self {
        fn copy_io(e: &std::io::Error) -> std::io::Error {
            std::io::Error::new(e.kind(), e.to_string())
        }
        match self {
            Self::AlreadyDownloading { id } => Self::AlreadyDownloading { id: *id },
            Self::UnexpectedChunk { id } => Self::UnexpectedChunk { id: *id },
            Self::Overflow { id, size, received } => Self::Overflow {
                id: *id,
                size: *size,
                received: *received,
            },
            Self::SourceTruncated { id, expected, read } => Self::SourceTruncated {
                id: *id,
                expected: *expected,
                read: *read,
            },
            Self::HashMismatch { expected, actual } => Self::HashMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::NotFound { id } => Self::NotFound { id: *id },
            Self::Cancelled { id } => Self::Cancelled { id: *id },
            Self::IdleTimeout { id } => Self::IdleTimeout { id: *id },
            Self::Io { id, source } => Self::Io {
                id: *id,
                source: copy_io(source),
            },
            Self::Store(e) => Self::Store(copy_io(e)),
        }
    }
}
