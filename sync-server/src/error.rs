//! Error types for the campaign server.

use sync_types::{AssetId, ConnectionId, Guid, SyncError};
use sync_transfer::TransferError;

/// Main error type for server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Asset transfer or store error.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol layer errors. Each ends the offending connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame encode/decode or transport failure.
    #[error("wire error: {0}")]
    Wire(#[from] SyncError),

    /// Unexpected message type.
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// Expected message type.
        expected: String,
        /// Actual message type received.
        actual: String,
    },

    /// The client did not send its handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The peer closed before completing the handshake.
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,

    /// A handshake was sent on an already admitted connection.
    #[error("duplicate handshake on {0}")]
    DuplicateHello(ConnectionId),

    /// Handshake rejected; the reason was sent to the client.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// The outbound queue filled up because the peer stopped reading.
    #[error("{0} is not reading; outbound queue full")]
    SlowConsumer(ConnectionId),
}

/// Why a command could not be applied to the campaign.
///
/// These never close the connection; the command is dropped and the sender
/// receives a NACK.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// No zone with this id.
    #[error("unknown zone {0}")]
    UnknownZone(Guid),

    /// No token with this id on the zone.
    #[error("unknown token {token} on zone {zone}")]
    UnknownToken {
        /// Zone searched.
        zone: Guid,
        /// Missing token.
        token: Guid,
    },

    /// No label with this id on the zone.
    #[error("unknown label {label} on zone {zone}")]
    UnknownLabel {
        /// Zone searched.
        zone: Guid,
        /// Missing label.
        label: Guid,
    },

    /// No asset metadata with this id.
    #[error("unknown asset {0}")]
    UnknownAsset(AssetId),

    /// No drawing with this id on the zone.
    #[error("unknown drawable {drawable} on zone {zone}")]
    UnknownDrawable {
        /// Zone searched.
        zone: Guid,
        /// Missing drawing.
        drawable: Guid,
    },

    /// The sender's role may not issue this command.
    #[error("{command} requires the GM role")]
    NotPermitted {
        /// Command kind.
        command: &'static str,
    },

    /// No connected player has this name.
    #[error("no player named {0}")]
    UnknownPlayer(String),
}

/// Directory heartbeat errors. Logged, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The HTTP request failed.
    #[error("directory request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The directory answered with a non-success status.
    #[error("directory returned HTTP {0}")]
    Status(u16),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for state mutations.
pub type StateResult<T> = std::result::Result<T, StateError>;
