//! # sync-server
//!
//! Authoritative campaign server for tabletop sessions.
//!
//! This crate implements a server that:
//! - Accepts TCP connections from GM and player clients
//! - Admits each one through a password/name/version handshake
//! - Applies every campaign command to one authoritative copy and forwards
//!   it to all other connections in a single global order
//! - Streams assets in chunks, round-robin across connections, and accepts
//!   uploads verified against their content hash
//!
//! ## Architecture
//!
//! ```text
//! GM ───────┐                      ┌─── Player
//!           │   framed MessagePack │
//!           ├─────────────────────►│
//!       ┌───┴──────────────────────┴───┐
//!       │        campaign-server       │
//!       │  registry ─ router ─ state   │
//!       │  transfer hub ─ asset store  │
//!       └──────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! - Hello → HelloResponse, roster, `setCampaign` snapshot (handshake)
//! - Command → applied and forwarded to everyone but the sender, or Nack
//! - getAsset → AssetHeader, AssetChunk… (requester only)
//! - AssetHeader, AssetChunk… → stored once the hash checks out
//! - Bye (either side)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cleanup;
pub mod config;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod state;
pub mod transfers;

pub use config::Config;
pub use error::{ServerError, StateError};
pub use protocol::{CampaignServer, ShutdownHandle};
pub use router::CommandRouter;
pub use server::{ServerContext, ServerMetrics};
pub use state::{AuthoritativeState, CampaignStore};
