//! # sync-types
//!
//! Wire vocabulary for tabletop campaign synchronization.
//!
//! This crate provides the types shared by the server and client crates:
//! - [`Guid`], [`AssetId`], [`ConnectionId`] - Identity types
//! - [`model`] - The campaign model carried by commands
//! - [`Command`] - Every campaign mutation and query
//! - [`HandshakeRequest`], [`HandshakeResponse`], [`ServerPolicy`] - Admission
//! - [`AssetHeader`], [`AssetChunk`] - Chunked asset transfer units
//! - [`Message`] and [`framing`] - The frame-level protocol
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod command;
mod error;
pub mod framing;
mod handshake;
mod ids;
mod messages;
pub mod model;
mod transfer;

pub use command::Command;
pub use error::SyncError;
pub use framing::{
    read_message, write_message, CHUNK_ENVELOPE_OVERHEAD, MAX_CHUNK_PAYLOAD, MAX_FRAME_SIZE,
};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, Identity, ResponseCode, Role, ServerPolicy,
    PROTOCOL_VERSION,
};
pub use ids::{AssetId, ConnectionId, Guid};
pub use messages::{Message, Nack};
pub use transfer::{AssetChunk, AssetHeader};
