//! Handshake payloads and server policy.

use serde::{Deserialize, Serialize};

/// Protocol version string. Client and server must match exactly.
pub const PROTOCOL_VERSION: &str = concat!("tabletop-sync/", env!("CARGO_PKG_VERSION"));

/// Role a participant joins with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Game master; authenticated with the GM password.
    Gm,
    /// Regular player; authenticated with the player password.
    Player,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Gm => write!(f, "GM"),
            Role::Player => write!(f, "PLAYER"),
        }
    }
}

/// A participant as seen by everyone else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Display name, unique per session (case-insensitive).
    pub name: String,
    /// Role the participant joined with.
    pub role: Role,
}

impl Identity {
    /// Build an identity.
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    /// Whether this identity is a GM.
    pub fn is_gm(&self) -> bool {
        self.role == Role::Gm
    }
}

/// First message a client sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    /// Requested display name.
    pub name: String,
    /// Password for the requested role. `None` is treated as empty.
    pub password: Option<String>,
    /// Requested role.
    pub role: Role,
    /// Client protocol version.
    pub version: String,
}

impl HandshakeRequest {
    /// Build a request for the current protocol version.
    pub fn new(name: impl Into<String>, password: Option<String>, role: Role) -> Self {
        Self {
            name: name.into(),
            password,
            role,
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// Outcome code of a handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    /// Not yet decided.
    #[default]
    Unknown,
    /// Accepted.
    Ok,
    /// Rejected; see the message.
    Error,
}

/// Server reply to a [`HandshakeRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Outcome.
    pub code: ResponseCode,
    /// Human-readable rejection reason.
    pub message: Option<String>,
    /// Server policy, present on success.
    pub policy: Option<ServerPolicy>,
}

impl HandshakeResponse {
    /// Successful response carrying the current policy.
    pub fn ok(policy: ServerPolicy) -> Self {
        Self {
            code: ResponseCode::Ok,
            message: None,
            policy: Some(policy),
        }
    }

    /// Rejection with a reason.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Error,
            message: Some(message.into()),
            policy: None,
        }
    }

    /// Whether the handshake succeeded.
    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}

/// Session-wide rules the GM can change at runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPolicy {
    /// Players may only move tokens they own.
    pub strict_token_movement: bool,
    /// Token movement is locked for players.
    pub movement_locked: bool,
    /// Players may reveal vision through fog.
    pub players_can_reveal_vision: bool,
    /// Each player sees only what their tokens see.
    pub use_individual_views: bool,
    /// Players may only impersonate tokens they own.
    pub restricted_impersonation: bool,
    /// Campaign macros are sent to players.
    pub players_receive_campaign_macros: bool,
}
