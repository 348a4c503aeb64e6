//! Error types for the wire layer.

use thiserror::Error;

/// Errors that can occur encoding, decoding or framing messages.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Frame length prefix exceeds the limit
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced size
        size: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Transport I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
