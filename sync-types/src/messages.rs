//! Protocol messages exchanged between client and server.
//!
//! Every frame on the wire carries exactly one [`Message`].

use serde::{Deserialize, Serialize};

use crate::{
    AssetChunk, AssetHeader, AssetId, Command, HandshakeRequest, HandshakeResponse, Identity,
    SyncError,
};

/// All possible protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Initial handshake, client to server, exactly once
    Hello(HandshakeRequest),
    /// Server response to Hello
    HelloResponse(HandshakeResponse),
    /// Campaign command, either direction
    Command(Command),
    /// A participant joined
    PlayerConnected(Identity),
    /// A participant left
    PlayerDisconnected(Identity),
    /// Start of an asset transfer
    AssetHeader(AssetHeader),
    /// Asset bytes
    AssetChunk(AssetChunk),
    /// An asset transfer was abandoned
    AssetFailed {
        /// Asset that failed
        id: AssetId,
        /// Human-readable reason
        reason: String,
    },
    /// A command was dropped without being applied
    Nack(Nack),
    /// Graceful disconnect
    Bye {
        /// Why the connection is closing
        reason: String,
    },
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }

    /// Short name of the message variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello(_) => "hello",
            Message::HelloResponse(_) => "hello_response",
            Message::Command(cmd) => cmd.kind(),
            Message::PlayerConnected(_) => "player_connected",
            Message::PlayerDisconnected(_) => "player_disconnected",
            Message::AssetHeader(_) => "asset_header",
            Message::AssetChunk(_) => "asset_chunk",
            Message::AssetFailed { .. } => "asset_failed",
            Message::Nack(_) => "nack",
            Message::Bye { .. } => "bye",
        }
    }
}

impl From<Command> for Message {
    fn from(cmd: Command) -> Self {
        Message::Command(cmd)
    }
}

/// Negative acknowledgment for a dropped command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    /// Kind of the dropped command, or `"unknown"` if it could not be decoded
    pub command: String,
    /// Why it was dropped
    pub reason: String,
}

impl Nack {
    /// Build a NACK for a command kind.
    pub fn new(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Token;
    use crate::{Guid, Role, ServerPolicy};

    #[test]
    fn hello_roundtrip() {
        let msg = Message::Hello(HandshakeRequest::new(
            "Bob",
            Some("secret".into()),
            Role::Player,
        ));
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(Message::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn hello_response_carries_policy() {
        let policy = ServerPolicy {
            movement_locked: true,
            ..ServerPolicy::default()
        };
        let msg = Message::HelloResponse(HandshakeResponse::ok(policy.clone()));
        let restored = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        match restored {
            Message::HelloResponse(resp) => assert_eq!(resp.policy, Some(policy)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn command_message_kind_delegates() {
        let msg: Message = Command::PutToken {
            zone: Guid::new(),
            token: Token::default(),
        }
        .into();
        assert_eq!(msg.kind(), "putToken");
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result = Message::from_bytes(&[0xc1, 0x00, 0xff]);
        assert!(matches!(result, Err(SyncError::Deserialization(_))));
    }

    #[test]
    fn nack_roundtrip() {
        let msg = Message::Nack(Nack::new("putToken", "unknown zone"));
        let restored = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, msg);
    }
}
